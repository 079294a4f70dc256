use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabletalk_protocol::StructuredMessage;

use super::dataset::{DatasetSummary, Row};
use super::ids::MessageId;

pub const UNTITLED_DATASET: &str = "Untitled Dataset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: ChatRole,
    #[serde(flatten)]
    pub message: StructuredMessage,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            role: ChatRole::User,
            message: StructuredMessage::narrative(text),
        }
    }

    pub fn assistant(message: StructuredMessage) -> Self {
        Self {
            id: MessageId::new_v7(),
            role: ChatRole::Assistant,
            message,
        }
    }
}

/// Everything kept for one dataset's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub dataset: Vec<Row>,
    /// Derived statistics; shape is owned by the profiling step.
    #[serde(default)]
    pub profile: Value,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Unix milliseconds of the last save, stamped by the repository.
    #[serde(default)]
    pub last_updated_ms: u64,
}

impl ChatSession {
    /// New session for a freshly loaded dataset, opened with the welcome
    /// message that summarizes its shape.
    pub fn for_dataset(dataset: Vec<Row>, filename: Option<String>, profile: Value) -> Self {
        let summary = DatasetSummary::from_rows(&dataset);
        Self {
            name: None,
            filename,
            dataset,
            profile,
            messages: vec![ChatMessage::assistant(StructuredMessage::narrative(
                welcome_text(&summary),
            ))],
            last_updated_ms: 0,
        }
    }

    /// Label shown in session lists: name, then filename, then a fallback.
    pub fn display_name(&self) -> &str {
        [self.name.as_deref(), self.filename.as_deref()]
            .into_iter()
            .flatten()
            .find(|label| !label.is_empty())
            .unwrap_or(UNTITLED_DATASET)
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary::from_rows(&self.dataset)
    }
}

fn welcome_text(summary: &DatasetSummary) -> String {
    format!(
        "✅ Dataset loaded successfully!\n\nShape: {} rows × {} columns\nColumns: {}\n\nYou can now ask me questions about your dataset!",
        summary.rows,
        summary.columns.len(),
        summary.columns.join(", ")
    )
}
