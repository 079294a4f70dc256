use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::dataset::DatasetSummary;
use super::error::{SerializeSnafu, StorageResult};
use super::types::{ChatMessage, ChatSession};

/// Downloadable snapshot of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatExport {
    pub exported_at_ms: u64,
    pub dataset: Option<DatasetSummary>,
    pub messages: Vec<ChatMessage>,
}

impl ChatExport {
    pub fn from_session(session: &ChatSession, exported_at_ms: u64) -> Self {
        Self {
            exported_at_ms,
            dataset: (!session.dataset.is_empty()).then(|| session.summary()),
            messages: session.messages.clone(),
        }
    }

    pub fn to_json_pretty(&self) -> StorageResult<String> {
        serde_json::to_string_pretty(self).context(SerializeSnafu {
            stage: "export-to-json",
            what: "chat export",
        })
    }
}
