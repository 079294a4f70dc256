#![deny(unsafe_code)]

//! Streaming transport for the dataset chat backend.
//!
//! A request is one JSON POST; the answer is an unframed UTF-8 text body read
//! chunk by chunk under an inactivity timeout, with cooperative cancellation.

/// HTTP request setup and status classification.
pub mod client;
/// Incremental UTF-8 decoding across chunk boundaries.
pub mod decoder;
pub mod error;
/// Cancellable read handle over the response body.
pub mod reader;
/// Read loop for one in-flight response.
pub mod session;
pub mod timer;

pub use client::{
    ChatRequest, DEFAULT_CHAT_PATH, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT,
    DEFAULT_IDLE_TIMEOUT, Row, StreamTransport, TransportConfig,
};
pub use decoder::ChunkDecoder;
pub use error::{BoxError, TransportError, TransportResult};
pub use reader::{ChunkReader, ChunkStream, RawChunk};
pub use session::{StreamOutcome, StreamSession, StreamSessionId};
pub use timer::InactivityTimer;
pub use tokio_util::sync::CancellationToken;
