#![deny(unsafe_code)]

//! Structured-message extraction for streamed analysis answers.
//!
//! Answers are plain text carrying inline markers: base64 plot images,
//! executing-tool announcements, fenced code and code output blocks. The
//! extractor finds them, the assembler pairs announcements with code and
//! strips every consumed span from the narrative.

pub mod assemble;
pub mod config;
/// Marker scans over full or partial answer text.
pub mod extract;
pub mod message;
pub mod pairing;

pub use assemble::{Assembly, MessageAssembler, assemble_message};
pub use config::{
    DEFAULT_EXECUTABLE_TOOL, DEFAULT_IMAGE_MIME_TYPE, DEFAULT_MAX_LOOKAHEAD_CHARS,
    DEFAULT_MIN_NARRATIVE_CHARS, ProtocolConfig,
};
pub use extract::{
    CodeSpan, ExecutingMarker, Extraction, ImagePreview, ImageSpan, OutputSpan, extract,
    preview_images,
};
pub use message::{CodeExecutionRecord, ImageResource, StructuredMessage};
pub use pairing::{Pair, Pairing, UnpairedMarker, UnpairedReason, pair_markers};
