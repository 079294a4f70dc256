use std::time::Duration;

use futures::TryStreamExt;
use reqwest::StatusCode;
use serde::Serialize;
use snafu::ResultExt;

use super::error::{
    AuthSnafu, BoxError, BuildClientSnafu, ConnectionSnafu, ServerSnafu, TransportResult,
};
use super::reader::ChunkReader;
use super::session::StreamSession;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CHAT_PATH: &str = "/chat/";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One dataset row as uploaded by the user: column name to cell value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// JSON body of a chat request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<Vec<Row>>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            dataset: None,
        }
    }

    /// Attaches the in-memory dataset. An empty dataset is not sent.
    pub fn with_dataset(mut self, rows: Vec<Row>) -> Self {
        self.dataset = if rows.is_empty() { None } else { Some(rows) };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub endpoint: String,
    pub chat_path: String,
    pub api_token: Option<String>,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            api_token: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim().to_string(),
            ..Self::default()
        }
    }

    pub fn with_api_token(mut self, api_token: impl Into<String>) -> Self {
        let api_token = api_token.into().trim().to_string();
        self.api_token = if api_token.is_empty() {
            None
        } else {
            Some(api_token)
        };
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn chat_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        let path = self.chat_path.trim();
        if path.is_empty() {
            return format!("{endpoint}/");
        }

        format!("{endpoint}/{}", path.trim_start_matches('/'))
    }
}

/// Opens streaming chat requests against the backend.
#[derive(Debug, Clone)]
pub struct StreamTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl StreamTransport {
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "build-client",
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sends the request and returns a session over the streamed body.
    ///
    /// Fails with `Connection` when no response arrives at all, `Auth` on 401
    /// and `Server` (with the body text) on any other non-success status.
    pub async fn open(&self, request: &ChatRequest) -> TransportResult<StreamSession> {
        let url = self.config.chat_url();
        let dataset_rows = request.dataset.as_ref().map_or(0, Vec::len);

        let mut builder = self.client.post(&url).json(request);
        if let Some(api_token) = &self.config.api_token {
            builder = builder.bearer_auth(api_token);
        }

        let response = builder.send().await.context(ConnectionSnafu {
            stage: "open-send-request",
            endpoint: url.clone(),
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(endpoint = %url, "chat backend rejected credentials");
            return AuthSnafu {
                stage: "open-check-status",
                status: status.as_u16(),
            }
            .fail();
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                endpoint = %url,
                status = status.as_u16(),
                body_len = body.len(),
                "chat backend returned a failure status"
            );
            return ServerSnafu {
                stage: "open-check-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        tracing::debug!(endpoint = %url, dataset_rows, "chat stream opened");

        let body = response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(BoxError::from);

        Ok(StreamSession::new(
            ChunkReader::from_stream(body),
            self.config.idle_timeout,
        ))
    }
}
