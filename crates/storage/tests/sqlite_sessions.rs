use serde_json::Value;
use tabletalk_protocol::{CodeExecutionRecord, StructuredMessage, assemble_message};
use tabletalk_storage::{
    ChatMessage, ChatRole, ChatSession, DatasetProfile, IdentityPolicy, SessionRepository,
    SqliteKvStore, derive_dataset_id, parse_rows,
};

const ROWS: &str = r#"[
    {"product":"tea","units":"12"},
    {"product":"coffee","units":"30"}
]"#;

#[tokio::test]
async fn conversation_resumes_from_disk_for_identical_upload() {
    let temp = tempfile::tempdir().expect("temp dir");
    let location = temp.path().join("sessions.sqlite3");
    let location = location.to_str().expect("utf-8 temp path");

    let rows = parse_rows(ROWS).expect("rows");
    let dataset_id =
        derive_dataset_id(&rows, Some("shop.csv"), IdentityPolicy::Resume, 0).expect("id");
    let profile = serde_json::to_value(DatasetProfile::from_rows(&rows)).expect("profile json");

    {
        let repository = SessionRepository::new(SqliteKvStore::open(location).await.expect("open"));
        repository
            .save_session(
                &dataset_id,
                ChatSession::for_dataset(rows.clone(), Some("shop.csv".to_string()), profile),
            )
            .expect("saved");
        repository
            .append_message(&dataset_id, ChatMessage::user("total units?"))
            .expect("user turn");
        let answer = assemble_message(
            "🤖 **Executing:** `run_python_code`\n```python\ndf.units.astype(int).sum()\n```\n**Code Output:**\n```\n42\n```\nThere are 42 units in total.",
        );
        repository
            .append_message(&dataset_id, ChatMessage::assistant(answer))
            .expect("assistant turn");
        repository
            .set_current_dataset_id(Some(&dataset_id))
            .expect("current set");
    }

    let reupload = parse_rows(ROWS).expect("rows");
    let same_id =
        derive_dataset_id(&reupload, Some("shop.csv"), IdentityPolicy::Resume, 99).expect("id");
    assert_eq!(same_id, dataset_id);

    let repository = SessionRepository::new(SqliteKvStore::open(location).await.expect("reopen"));
    assert_eq!(
        repository.current_dataset_id().expect("readable"),
        Some(dataset_id.clone())
    );

    let session = repository
        .get_session(&same_id)
        .expect("readable")
        .expect("session resumed");
    let roles = session
        .messages
        .iter()
        .map(|message| message.role)
        .collect::<Vec<_>>();
    assert_eq!(
        roles,
        vec![ChatRole::Assistant, ChatRole::User, ChatRole::Assistant]
    );

    let answer: &StructuredMessage = &session.messages[2].message;
    assert_eq!(answer.text, "There are 42 units in total.");
    assert_eq!(
        answer.code,
        vec![CodeExecutionRecord {
            tool: "run_python_code".to_string(),
            code: "df.units.astype(int).sum()".to_string(),
        }]
    );
    assert_eq!(answer.outputs, vec!["42".to_string()]);
    assert_eq!(session.profile["numeric_columns"], serde_json::json!(["units"]));
    assert_ne!(session.profile, Value::Null);
}
