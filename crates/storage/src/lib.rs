use std::time::{SystemTime, UNIX_EPOCH};

pub mod dataset;
pub mod error;
pub mod export;
pub mod ids;
pub mod kv;
pub mod profile;
pub mod sessions;
pub mod sqlite;
pub mod types;

pub use dataset::{
    DATASET_ID_PREFIX, DatasetFingerprint, DatasetSummary, IdentityPolicy, Row, UNKNOWN_FILENAME,
    derive_dataset_id, parse_rows,
};
pub use error::{StorageError, StorageResult};
pub use export::ChatExport;
pub use ids::{DatasetId, MessageId};
pub use kv::{KeyValueStore, MemoryStore};
pub use profile::{ColumnStats, DatasetProfile};
pub use sessions::{
    CURRENT_DATASET_KEY, Clock, SESSIONS_KEY, SessionMap, SessionRepository, StoredSession,
};
pub use sqlite::SqliteKvStore;
pub use types::{ChatMessage, ChatRole, ChatSession, UNTITLED_DATASET};

/// Wall-clock unix time in milliseconds; zero if the clock predates the epoch.
pub fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}
