use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt};

use super::error::{SerializeSnafu, SessionNotFoundSnafu, StorageResult};
use super::export::ChatExport;
use super::ids::DatasetId;
use super::kv::KeyValueStore;
use super::types::{ChatMessage, ChatSession};
use super::unix_timestamp_millis;

pub const SESSIONS_KEY: &str = "chat_sessions";
pub const CURRENT_DATASET_KEY: &str = "current_dataset_id";

pub type SessionMap = BTreeMap<DatasetId, ChatSession>;
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub id: DatasetId,
    pub session: ChatSession,
}

/// Chat sessions keyed by dataset, persisted as one JSON document.
pub struct SessionRepository<S> {
    store: S,
    clock: Clock,
}

impl<S> fmt::Debug for SessionRepository<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionRepository")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<S> SessionRepository<S>
where
    S: KeyValueStore,
{
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(unix_timestamp_millis))
    }

    pub fn with_clock(store: S, clock: Clock) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now_ms(&self) -> u64 {
        (self.clock)()
    }

    /// Every stored session. A payload that no longer parses reads as empty.
    pub fn all_sessions(&self) -> StorageResult<SessionMap> {
        let Some(raw) = self.store.get(SESSIONS_KEY)? else {
            return Ok(SessionMap::new());
        };

        match serde_json::from_str(&raw) {
            Ok(sessions) => Ok(sessions),
            Err(error) => {
                tracing::warn!(
                    key = SESSIONS_KEY,
                    payload_len = raw.len(),
                    %error,
                    "stored chat sessions are unreadable, starting empty"
                );
                Ok(SessionMap::new())
            }
        }
    }

    pub fn get_session(&self, dataset_id: &DatasetId) -> StorageResult<Option<ChatSession>> {
        Ok(self.all_sessions()?.remove(dataset_id))
    }

    /// Stores the session, stamping it with the current time.
    pub fn save_session(
        &self,
        dataset_id: &DatasetId,
        mut session: ChatSession,
    ) -> StorageResult<ChatSession> {
        let mut sessions = self.all_sessions()?;
        session.last_updated_ms = self.now_ms();
        sessions.insert(dataset_id.clone(), session.clone());
        self.write_sessions(&sessions)?;

        tracing::debug!(
            dataset_id = %dataset_id,
            messages = session.messages.len(),
            "chat session saved"
        );
        Ok(session)
    }

    pub fn append_message(
        &self,
        dataset_id: &DatasetId,
        message: ChatMessage,
    ) -> StorageResult<ChatSession> {
        let mut session = self
            .get_session(dataset_id)?
            .context(SessionNotFoundSnafu {
                stage: "append-message-load-session",
                dataset_id: dataset_id.to_string(),
            })?;
        session.messages.push(message);
        self.save_session(dataset_id, session)
    }

    /// Returns whether a session was removed.
    pub fn delete_session(&self, dataset_id: &DatasetId) -> StorageResult<bool> {
        let mut sessions = self.all_sessions()?;
        let removed = sessions.remove(dataset_id).is_some();
        if removed {
            self.write_sessions(&sessions)?;
            tracing::debug!(dataset_id = %dataset_id, "chat session deleted");
        }
        Ok(removed)
    }

    /// Sessions ordered by most recent save first.
    pub fn list_sessions(&self) -> StorageResult<Vec<StoredSession>> {
        let mut listed = self
            .all_sessions()?
            .into_iter()
            .map(|(id, session)| StoredSession { id, session })
            .collect::<Vec<_>>();
        listed.sort_by(|left, right| {
            right
                .session
                .last_updated_ms
                .cmp(&left.session.last_updated_ms)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    /// Case-insensitive match against each session's display name.
    pub fn search_sessions(&self, query: &str) -> StorageResult<Vec<StoredSession>> {
        let needle = query.trim().to_lowercase();
        let mut listed = self.list_sessions()?;
        listed.retain(|stored| {
            stored
                .session
                .display_name()
                .to_lowercase()
                .contains(&needle)
        });
        Ok(listed)
    }

    pub fn clear_all(&self) -> StorageResult<()> {
        self.store.delete(SESSIONS_KEY)?;
        tracing::debug!("all chat sessions cleared");
        Ok(())
    }

    pub fn current_dataset_id(&self) -> StorageResult<Option<DatasetId>> {
        Ok(self.store.get(CURRENT_DATASET_KEY)?.map(DatasetId::from))
    }

    /// `None` clears the active dataset.
    pub fn set_current_dataset_id(&self, dataset_id: Option<&DatasetId>) -> StorageResult<()> {
        match dataset_id {
            Some(dataset_id) => self.store.set(CURRENT_DATASET_KEY, dataset_id.as_str()),
            None => self.store.delete(CURRENT_DATASET_KEY),
        }
    }

    pub fn export_session(&self, dataset_id: &DatasetId) -> StorageResult<ChatExport> {
        let session = self
            .get_session(dataset_id)?
            .context(SessionNotFoundSnafu {
                stage: "export-load-session",
                dataset_id: dataset_id.to_string(),
            })?;
        Ok(ChatExport::from_session(&session, self.now_ms()))
    }

    fn write_sessions(&self, sessions: &SessionMap) -> StorageResult<()> {
        let payload = serde_json::to_string(sessions).context(SerializeSnafu {
            stage: "write-sessions",
            what: "chat sessions",
        })?;
        self.store.set(SESSIONS_KEY, &payload)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use serde_json::Value;
    use tabletalk_protocol::StructuredMessage;

    use super::*;
    use crate::dataset::parse_rows;
    use crate::error::StorageError;
    use crate::kv::MemoryStore;

    fn ticking_repository() -> SessionRepository<Arc<MemoryStore>> {
        let ticks = Arc::new(AtomicU64::new(1_000));
        SessionRepository::with_clock(
            Arc::new(MemoryStore::new()),
            Arc::new(move || ticks.fetch_add(1, Ordering::SeqCst)),
        )
    }

    fn session(filename: &str) -> ChatSession {
        let rows = parse_rows(r#"[{"x":1}]"#).expect("rows");
        ChatSession::for_dataset(rows, Some(filename.to_string()), Value::Null)
    }

    #[test]
    fn saved_session_reads_back_with_timestamp() {
        let repository = ticking_repository();
        let id = DatasetId::from("dataset_a");

        let saved = repository
            .save_session(&id, session("a.csv"))
            .expect("saved");
        let loaded = repository.get_session(&id).expect("readable");

        assert_eq!(saved.last_updated_ms, 1_000);
        assert_eq!(loaded, Some(saved));
        assert_eq!(repository.get_session(&"missing".into()).expect("readable"), None);
    }

    #[test]
    fn appending_restamps_and_keeps_order() {
        let repository = ticking_repository();
        let id = DatasetId::from("dataset_a");
        repository.save_session(&id, session("a.csv")).expect("saved");

        let updated = repository
            .append_message(&id, ChatMessage::user("mean of x?"))
            .expect("appended");
        let updated = repository
            .append_message(&id, ChatMessage::assistant(StructuredMessage::narrative("1")))
            .expect("appended");

        assert_eq!(updated.messages.len(), 3);
        assert_eq!(updated.messages[1].message.text, "mean of x?");
        assert_eq!(updated.last_updated_ms, 1_002);
    }

    #[test]
    fn appending_to_unknown_session_fails() {
        let repository = ticking_repository();
        let error = repository
            .append_message(&"dataset_none".into(), ChatMessage::user("hi"))
            .expect_err("no session");

        assert!(matches!(error, StorageError::SessionNotFound { .. }));
    }

    #[test]
    fn list_is_most_recent_first_and_search_uses_display_name() {
        let repository = ticking_repository();
        repository
            .save_session(&"dataset_old".into(), session("Sales-2023.csv"))
            .expect("saved");
        repository
            .save_session(&"dataset_new".into(), session("inventory.csv"))
            .expect("saved");
        let mut named = session("sales-2024.csv");
        named.name = Some("Quarterly SALES".to_string());
        repository
            .save_session(&"dataset_named".into(), named)
            .expect("saved");

        let order = repository
            .list_sessions()
            .expect("listed")
            .into_iter()
            .map(|stored| stored.id.into_inner())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["dataset_named", "dataset_new", "dataset_old"]);

        let found = repository
            .search_sessions("sales")
            .expect("searched")
            .into_iter()
            .map(|stored| stored.id.into_inner())
            .collect::<Vec<_>>();
        assert_eq!(found, vec!["dataset_named", "dataset_old"]);
        assert_eq!(repository.search_sessions("").expect("searched").len(), 3);
    }

    #[test]
    fn delete_and_clear_remove_sessions() {
        let repository = ticking_repository();
        repository.save_session(&"dataset_a".into(), session("a.csv")).expect("saved");
        repository.save_session(&"dataset_b".into(), session("b.csv")).expect("saved");

        assert!(repository.delete_session(&"dataset_a".into()).expect("deleted"));
        assert!(!repository.delete_session(&"dataset_a".into()).expect("idempotent"));
        assert_eq!(repository.all_sessions().expect("readable").len(), 1);

        repository.clear_all().expect("cleared");
        assert!(repository.all_sessions().expect("readable").is_empty());
        assert_eq!(repository.store().get(SESSIONS_KEY).expect("readable"), None);
    }

    #[test]
    fn unreadable_payload_reads_as_empty() {
        let repository = ticking_repository();
        repository
            .store()
            .set(SESSIONS_KEY, "{not json")
            .expect("writable");

        assert!(repository.all_sessions().expect("tolerated").is_empty());

        repository.save_session(&"dataset_a".into(), session("a.csv")).expect("saved");
        assert_eq!(repository.all_sessions().expect("readable").len(), 1);
    }

    #[test]
    fn current_dataset_can_be_set_and_cleared() {
        let repository = ticking_repository();
        assert_eq!(repository.current_dataset_id().expect("readable"), None);

        let id = DatasetId::from("dataset_a");
        repository.set_current_dataset_id(Some(&id)).expect("set");
        assert_eq!(repository.current_dataset_id().expect("readable"), Some(id));

        repository.set_current_dataset_id(None).expect("cleared");
        assert_eq!(repository.current_dataset_id().expect("readable"), None);
    }

    #[test]
    fn export_summarizes_dataset_and_copies_messages() {
        let repository = ticking_repository();
        let id = DatasetId::from("dataset_a");
        repository.save_session(&id, session("a.csv")).expect("saved");

        let export = repository.export_session(&id).expect("exported");
        assert_eq!(export.exported_at_ms, 1_001);
        assert_eq!(export.messages.len(), 1);
        assert_eq!(
            export.dataset.as_ref().map(|summary| summary.rows),
            Some(1)
        );

        let error = repository
            .export_session(&"dataset_none".into())
            .expect_err("unknown session");
        assert!(matches!(error, StorageError::SessionNotFound { .. }));
    }
}
