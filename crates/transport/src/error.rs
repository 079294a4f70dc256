use std::time::Duration;

use snafu::Snafu;

/// Type-erased failure reported by a chunk source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type TransportResult<T> = Result<T, TransportError>;

/// Terminal failures for one chat request. None of them are retried here.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("failed to build HTTP client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("could not reach chat backend at {endpoint}: {source}"))]
    Connection {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("chat backend rejected the request credentials (status {status})"))]
    Auth { stage: &'static str, status: u16 },
    #[snafu(display("chat backend returned status {status}: {body}"))]
    Server {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display(
        "no data received from chat backend for {idle:?} (after {received_bytes} bytes)"
    ))]
    StreamTimeout {
        stage: &'static str,
        idle: Duration,
        received_bytes: usize,
    },
    #[snafu(display("chunk decoder was fed after it had been flushed"))]
    DecoderClosed { stage: &'static str },
    #[snafu(display("response body failed after {received_bytes} bytes: {source}"))]
    ReadChunk {
        stage: &'static str,
        received_bytes: usize,
        source: BoxError,
    },
}

impl TransportError {
    /// Text shown to the person who submitted the question.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection { endpoint, .. } => format!(
                "Failed to connect to the backend at {endpoint}. Make sure the backend is \
                 running, CORS is properly configured and no firewall is blocking the connection."
            ),
            Self::BuildClient { .. } => {
                "Failed to prepare the connection to the chat service.".to_string()
            }
            Self::Auth { .. } => "Server authentication error. Please try again.".to_string(),
            Self::Server { status, body, .. } => format!("Server error: {status} {body}"),
            Self::StreamTimeout { .. } => "Request timed out. The backend may be processing a \
                 large request. Check the backend console for errors, try a simpler question, \
                 or wait a moment and try again."
                .to_string(),
            Self::ReadChunk { .. } => {
                "The response stream was interrupted before it finished. Please try again."
                    .to_string()
            }
            Self::DecoderClosed { .. } => format!("Error: {self}"),
        }
    }

    /// Returns true when the server answered, i.e. the transport itself opened.
    pub fn transport_opened(&self) -> bool {
        !matches!(self, Self::BuildClient { .. } | Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_keeps_status_and_body_for_diagnostics() {
        let error = TransportError::Server {
            stage: "test",
            status: 502,
            body: "upstream exploded".to_string(),
        };

        assert_eq!(error.user_message(), "Server error: 502 upstream exploded");
        assert!(error.to_string().contains("upstream exploded"));
        assert!(error.transport_opened());
    }

    #[test]
    fn sub_second_idle_window_is_reported_exactly() {
        let timeout = TransportError::StreamTimeout {
            stage: "test",
            idle: Duration::from_millis(300),
            received_bytes: 8,
        };

        assert!(timeout.to_string().contains("300ms"));
    }

    #[test]
    fn auth_and_timeout_map_to_distinct_messages() {
        let auth = TransportError::Auth {
            stage: "test",
            status: 401,
        };
        let timeout = TransportError::StreamTimeout {
            stage: "test",
            idle: Duration::from_secs(120),
            received_bytes: 4,
        };

        assert!(auth.user_message().contains("authentication"));
        assert!(timeout.user_message().contains("timed out"));
        assert!(timeout.to_string().contains("120s"));
    }
}
