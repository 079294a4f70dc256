use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use snafu::{ResultExt, ensure};

use super::error::{DeserializeSnafu, EmptyDatasetSnafu, SerializeSnafu, StorageResult};
use super::ids::DatasetId;

pub const DATASET_ID_PREFIX: &str = "dataset_";
pub const UNKNOWN_FILENAME: &str = "unknown";
const SAMPLE_ROWS: usize = 3;
const SAMPLE_VALUES_PER_ROW: usize = 3;
const ID_HASH_HEX_CHARS: usize = 16;

/// One uploaded row: column name to cell value, in column order.
pub type Row = serde_json::Map<String, Value>;

/// Whether re-uploading identical content resumes the earlier session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Same content and filename always map to the same id.
    #[default]
    Resume,
    /// Every upload gets a fresh id salted with the upload time.
    FreshPerUpload,
}

/// Shape of a dataset as shown to the user and written to exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub columns: Vec<String>,
}

impl DatasetSummary {
    pub fn from_rows(rows: &[Row]) -> Self {
        Self {
            rows: rows.len(),
            columns: column_names(rows),
        }
    }
}

/// Cheap identity material for a dataset.
///
/// Covers the row count, the ordered column names, the first three values
/// of the first three rows and the filename.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetFingerprint {
    pub rows: usize,
    pub columns: Vec<String>,
    pub sample: Vec<Vec<Value>>,
    pub filename: String,
}

impl DatasetFingerprint {
    pub fn from_rows(rows: &[Row], filename: Option<&str>) -> StorageResult<Self> {
        ensure!(
            !rows.is_empty(),
            EmptyDatasetSnafu {
                stage: "fingerprint-dataset",
            }
        );

        let sample = rows
            .iter()
            .take(SAMPLE_ROWS)
            .map(|row| row.values().take(SAMPLE_VALUES_PER_ROW).cloned().collect())
            .collect();
        let filename = filename
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_FILENAME)
            .to_string();

        Ok(Self {
            rows: rows.len(),
            columns: column_names(rows),
            sample,
            filename,
        })
    }

    /// Lowercase hex SHA-256 of the fingerprint's canonical JSON.
    pub fn digest_hex(&self) -> StorageResult<String> {
        let canonical = serde_json::to_vec(self).context(SerializeSnafu {
            stage: "fingerprint-canonical-json",
            what: "dataset fingerprint",
        })?;

        Ok(Sha256::digest(&canonical)
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect())
    }

    pub fn dataset_id(&self, policy: IdentityPolicy, now_ms: u64) -> StorageResult<DatasetId> {
        let digest = self.digest_hex()?;
        let hash = &digest[..ID_HASH_HEX_CHARS];

        let raw = match policy {
            IdentityPolicy::Resume => format!("{DATASET_ID_PREFIX}{hash}"),
            IdentityPolicy::FreshPerUpload => format!("{DATASET_ID_PREFIX}{hash}_{now_ms}"),
        };
        Ok(DatasetId::new(raw))
    }
}

/// Derives the session key for an uploaded dataset.
pub fn derive_dataset_id(
    rows: &[Row],
    filename: Option<&str>,
    policy: IdentityPolicy,
    now_ms: u64,
) -> StorageResult<DatasetId> {
    DatasetFingerprint::from_rows(rows, filename)?.dataset_id(policy, now_ms)
}

/// Parses a JSON array of row objects.
pub fn parse_rows(json: &str) -> StorageResult<Vec<Row>> {
    serde_json::from_str(json).context(DeserializeSnafu {
        stage: "parse-dataset-rows",
        what: "dataset rows",
    })
}

/// Column names in the order the first row lists them.
fn column_names(rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}
