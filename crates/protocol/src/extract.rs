use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::config::ProtocolConfig;
use super::message::ImageResource;

pub const IMAGE_MARKER: &str = "PLOT_IMG_BASE64:";
pub const EXECUTING_MARKER_PREFIX: &str = "🤖 **Executing:** ";
pub const CODE_OUTPUT_HEADER: &str = "**Code Output:**";
pub const EXECUTABLE_LANGUAGE_TAG: &str = "python";

static IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"PLOT_IMG_BASE64:([A-Za-z0-9+/=]+)").expect("image marker pattern is valid")
});

static EXECUTING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"🤖 \*\*Executing:\*\* `([^`]+)`").expect("executing marker pattern is valid")
});

static CODE_FENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```([A-Za-z0-9_+.-]*)\n((?s:.*?))```").expect("code fence pattern is valid")
});

static OUTPUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*Code Output:\*\*\n```\n((?s:.*?))```").expect("output block pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpan {
    pub payload: String,
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutingMarker {
    pub tool: String,
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSpan {
    pub code: String,
    pub range: Range<usize>,
    /// Info string after the opening fence; empty when untagged.
    pub language: String,
    /// Fence carried the `python` language tag.
    pub is_executable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpan {
    pub text: String,
    pub range: Range<usize>,
}

macro_rules! span_offset {
    ($($span:ty),+ $(,)?) => {
        $(
            impl $span {
                /// Byte offset of the span start in the scanned text.
                pub fn offset(&self) -> usize {
                    self.range.start
                }
            }
        )+
    };
}

span_offset!(ImageSpan, ExecutingMarker, CodeSpan, OutputSpan);

/// Every marker found in one answer, each list in encounter order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub images: Vec<ImageSpan>,
    pub markers: Vec<ExecutingMarker>,
    pub code_spans: Vec<CodeSpan>,
    pub outputs: Vec<OutputSpan>,
}

/// Runs the four independent scans over the full text.
pub fn extract(text: &str) -> Extraction {
    Extraction {
        images: scan_images(text),
        markers: scan_executing_markers(text),
        code_spans: scan_code_fences(text),
        outputs: scan_output_blocks(text),
    }
}

pub fn scan_images(text: &str) -> Vec<ImageSpan> {
    IMAGE_PATTERN
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let payload = captures.get(1)?;
            Some(ImageSpan {
                payload: payload.as_str().to_string(),
                range: whole.range(),
            })
        })
        .collect()
}

pub fn scan_executing_markers(text: &str) -> Vec<ExecutingMarker> {
    EXECUTING_PATTERN
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let tool = captures.get(1)?;
            Some(ExecutingMarker {
                tool: tool.as_str().to_string(),
                range: whole.range(),
            })
        })
        .collect()
}

/// Fences are matched non-overlapping, left to right, shortest body first.
pub fn scan_code_fences(text: &str) -> Vec<CodeSpan> {
    CODE_FENCE_PATTERN
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let language = captures.get(1).map_or("", |tag| tag.as_str());
            let body = captures.get(2)?;
            Some(CodeSpan {
                code: body.as_str().trim().to_string(),
                range: whole.range(),
                language: language.to_string(),
                is_executable: language == EXECUTABLE_LANGUAGE_TAG,
            })
        })
        .collect()
}

pub fn scan_output_blocks(text: &str) -> Vec<OutputSpan> {
    OUTPUT_PATTERN
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let body = captures.get(1)?;
            Some(OutputSpan {
                text: body.as_str().trim().to_string(),
                range: whole.range(),
            })
        })
        .collect()
}

/// Images visible in a partially received answer.
///
/// Only images are surfaced while streaming; code, outputs and prose wait
/// for the completed text.
pub fn preview_images(partial: &str, config: &ProtocolConfig) -> Vec<ImageResource> {
    scan_images(partial)
        .into_iter()
        .map(|image| ImageResource::new(config.image_mime_type.clone(), image.payload))
        .collect()
}

/// Counts image markers in a growing buffer, scanning only the new suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePreview {
    scanned: usize,
    seen: usize,
}

impl ImagePreview {
    pub fn new() -> Self {
        Self::default()
    }

    /// Markers seen so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Returns how many markers `buffer` gained since the previous call.
    ///
    /// `buffer` must extend the text passed before. The scan restarts just
    /// early enough to catch a marker split across two updates; a marker
    /// starting there cannot have been complete in the earlier text.
    pub fn update(&mut self, buffer: &str) -> usize {
        let mut start = self
            .scanned
            .saturating_sub(IMAGE_MARKER.len() - 1)
            .min(buffer.len());
        while !buffer.is_char_boundary(start) {
            start -= 1;
        }

        let found = buffer[start..].matches(IMAGE_MARKER).count();
        self.scanned = buffer.len();
        self.seen += found;
        found
    }
}
