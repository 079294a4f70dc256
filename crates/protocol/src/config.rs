use serde::{Deserialize, Serialize};

/// Tool whose executing marker announces a runnable code block.
pub const DEFAULT_EXECUTABLE_TOOL: &str = "run_python_code";
/// Largest marker-to-fence distance, in characters, that still pairs.
pub const DEFAULT_MAX_LOOKAHEAD_CHARS: usize = 2000;
pub const DEFAULT_MIN_NARRATIVE_CHARS: usize = 10;
pub const DEFAULT_IMAGE_MIME_TYPE: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_executable_tool")]
    pub executable_tool: String,
    #[serde(default = "default_max_lookahead_chars")]
    pub max_lookahead_chars: usize,
    #[serde(default = "default_min_narrative_chars")]
    pub min_narrative_chars: usize,
    #[serde(default = "default_image_mime_type")]
    pub image_mime_type: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            executable_tool: default_executable_tool(),
            max_lookahead_chars: default_max_lookahead_chars(),
            min_narrative_chars: default_min_narrative_chars(),
            image_mime_type: default_image_mime_type(),
        }
    }
}

impl ProtocolConfig {
    pub fn with_max_lookahead_chars(mut self, max_lookahead_chars: usize) -> Self {
        self.max_lookahead_chars = max_lookahead_chars;
        self
    }

    pub fn with_executable_tool(mut self, executable_tool: impl Into<String>) -> Self {
        self.executable_tool = executable_tool.into();
        self
    }

    /// Replaces blank or zero values with the reference defaults.
    pub fn normalized(mut self) -> Self {
        self.executable_tool = self.executable_tool.trim().to_string();
        if self.executable_tool.is_empty() {
            self.executable_tool = default_executable_tool();
        }
        if self.max_lookahead_chars == 0 {
            self.max_lookahead_chars = default_max_lookahead_chars();
        }
        self.image_mime_type = self.image_mime_type.trim().to_string();
        if self.image_mime_type.is_empty() {
            self.image_mime_type = default_image_mime_type();
        }
        self
    }
}

fn default_executable_tool() -> String {
    DEFAULT_EXECUTABLE_TOOL.to_string()
}

fn default_max_lookahead_chars() -> usize {
    DEFAULT_MAX_LOOKAHEAD_CHARS
}

fn default_min_narrative_chars() -> usize {
    DEFAULT_MIN_NARRATIVE_CHARS
}

fn default_image_mime_type() -> String {
    DEFAULT_IMAGE_MIME_TYPE.to_string()
}
