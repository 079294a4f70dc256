use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// One executed-code announcement paired with the code it ran.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeExecutionRecord {
    pub tool: String,
    pub code: String,
}

/// Displayable image carried inline in the answer as base64.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageResource {
    pub mime_type: String,
    pub data_base64: String,
}

impl ImageResource {
    pub fn new(mime_type: impl Into<String>, data_base64: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_base64: data_base64.into(),
        }
    }

    /// `data:` URI usable directly as an image source.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data_base64)
    }

    /// Decodes the payload into raw image bytes.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.data_base64.as_bytes())
    }
}

/// Renderable form of one assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredMessage {
    /// Narrative prose with every consumed span removed.
    pub text: String,
    #[serde(default)]
    pub code: Vec<CodeExecutionRecord>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageResource>,
}

impl StructuredMessage {
    /// Message with prose only, e.g. a user turn or a partial answer.
    pub fn narrative(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn has_attachments(&self) -> bool {
        !self.code.is_empty() || !self.outputs.is_empty() || !self.images.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && !self.has_attachments()
    }

    /// True when the prose is shorter than `min_chars` while code, output or
    /// images are present. Presentation layers show a placeholder then.
    pub fn needs_placeholder(&self, min_chars: usize) -> bool {
        self.has_attachments() && self.text.chars().count() < min_chars
    }
}
