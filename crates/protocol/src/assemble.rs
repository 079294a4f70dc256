use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::config::ProtocolConfig;
use super::extract::{Extraction, extract};
use super::message::{CodeExecutionRecord, ImageResource, StructuredMessage};
use super::pairing::{UnpairedMarker, pair_markers};

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{4,}").expect("newline run pattern is valid"));

/// Assembled message plus the executing markers that produced no record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembly {
    pub message: StructuredMessage,
    pub unpaired: Vec<UnpairedMarker>,
}

/// Turns a completed answer into a [`StructuredMessage`].
///
/// Assembly never fails: text without recognizable markers comes back as a
/// narrative-only message.
#[derive(Debug, Clone, Default)]
pub struct MessageAssembler {
    config: ProtocolConfig,
}

impl MessageAssembler {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn assemble(&self, text: &str) -> Assembly {
        let Extraction {
            images,
            markers,
            code_spans,
            outputs,
        } = extract(text);
        let pairing = pair_markers(text, &markers, &code_spans, &self.config);

        let mut consumed = Vec::with_capacity(
            images.len() + markers.len() + pairing.pairs.len() + outputs.len(),
        );
        consumed.extend(images.iter().map(|image| image.range.clone()));
        consumed.extend(markers.iter().map(|marker| marker.range.clone()));
        consumed.extend(
            pairing
                .pairs
                .iter()
                .map(|pair| code_spans[pair.code].range.clone()),
        );
        consumed.extend(outputs.iter().map(|output| output.range.clone()));

        let code = pairing
            .pairs
            .iter()
            .map(|pair| CodeExecutionRecord {
                tool: markers[pair.marker].tool.clone(),
                code: code_spans[pair.code].code.clone(),
            })
            .collect::<Vec<_>>();

        let mut message = StructuredMessage {
            text: normalize_narrative(&remove_consumed(text, consumed)),
            code,
            outputs: outputs.into_iter().map(|output| output.text).collect(),
            images: images
                .into_iter()
                .map(|image| ImageResource::new(self.config.image_mime_type.clone(), image.payload))
                .collect(),
        };

        if message.needs_placeholder(self.config.min_narrative_chars) && !message.text.is_empty() {
            tracing::debug!(
                narrative_chars = message.text.chars().count(),
                min_chars = self.config.min_narrative_chars,
                "short narrative cleared beside attachments"
            );
            message.text.clear();
        }

        for unpaired in &pairing.unpaired {
            tracing::debug!(
                tool = %unpaired.marker.tool,
                offset = unpaired.marker.offset(),
                reason = ?unpaired.reason,
                "executing marker produced no code record"
            );
        }

        Assembly {
            message,
            unpaired: pairing.unpaired,
        }
    }

    /// Convenience for callers that do not inspect unpaired markers.
    pub fn parse(&self, text: &str) -> StructuredMessage {
        self.assemble(text).message
    }
}

/// Assembles with the default configuration.
pub fn assemble_message(text: &str) -> StructuredMessage {
    MessageAssembler::default().parse(text)
}

/// Removes every consumed range; overlapping ranges remove their union once.
///
/// A block that opens a paragraph of the remaining narrative takes the
/// paragraph break after it along, so dropping a block between two paragraphs
/// leaves a single blank line.
fn remove_consumed(text: &str, mut consumed: Vec<Range<usize>>) -> String {
    consumed.sort_by_key(|range| (range.start, range.end));

    let mut narrative = String::with_capacity(text.len());
    let mut cursor = 0;
    for range in consumed {
        if range.end <= cursor {
            continue;
        }
        if range.start > cursor {
            narrative.push_str(&text[cursor..range.start]);
        }
        cursor = range.end;

        if narrative.is_empty() || narrative.ends_with("\n\n") {
            cursor += text.as_bytes()[cursor..]
                .iter()
                .take(2)
                .take_while(|byte| **byte == b'\n')
                .count();
        }
    }
    narrative.push_str(&text[cursor..]);

    narrative
}

fn normalize_narrative(narrative: &str) -> String {
    EXCESS_NEWLINES
        .replace_all(narrative, "\n\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::UnpairedReason;

    #[test]
    fn plain_text_is_all_narrative() {
        let message = assemble_message("  The average is 4.2.\n");

        assert_eq!(message, StructuredMessage::narrative("The average is 4.2."));
    }

    #[test]
    fn long_newline_runs_collapse_to_three() {
        let message = assemble_message("one\n\n\n\n\n\ntwo");
        assert_eq!(message.text, "one\n\n\ntwo");
    }

    #[test]
    fn inline_block_keeps_surrounding_text() {
        let message = assemble_message("before PLOT_IMG_BASE64:QUJD after");

        assert_eq!(message.text, "before  after");
        assert_eq!(message.images.len(), 1);
    }

    #[test]
    fn overlapping_spans_are_removed_once() {
        let text = concat!(
            "Intro paragraph here.\n\n",
            "🤖 **Executing:** `run_python_code`\n\n",
            "```python\nprint('PLOT_IMG_BASE64:QUJD')\n```\n\n",
            "Closing remarks follow."
        );
        let message = assemble_message(text);

        assert_eq!(message.text, "Intro paragraph here.\n\nClosing remarks follow.");
        assert_eq!(message.images.len(), 1);
        assert_eq!(message.code.len(), 1);
    }

    #[test]
    fn unpaired_fence_stays_in_narrative() {
        let text = "Use a fence like:\n```\nprint(1)\n```\nto show code.";
        let message = assemble_message(text);

        assert_eq!(message.text, text);
        assert!(message.code.is_empty());
    }

    #[test]
    fn short_narrative_beside_attachments_is_cleared() {
        let message = assemble_message("Done.\nPLOT_IMG_BASE64:QUJD");

        assert_eq!(message.text, "");
        assert!(message.needs_placeholder(10));
    }

    #[test]
    fn unpaired_markers_are_reported() {
        let text = "🤖 **Executing:** `run_python_code`\nno code followed";
        let assembly = MessageAssembler::default().assemble(text);

        assert_eq!(assembly.message.text, "no code followed");
        assert_eq!(assembly.unpaired.len(), 1);
        assert_eq!(assembly.unpaired[0].reason, UnpairedReason::NoQualifyingCode);
    }

    #[test]
    fn configured_tool_is_the_executable_one() {
        let assembler =
            MessageAssembler::new(ProtocolConfig::default().with_executable_tool("run_r_code"));
        let text = "🤖 **Executing:** `run_r_code`\n```python\nsummary(df)\n```";

        let message = assembler.parse(text);
        assert_eq!(
            message.code,
            vec![CodeExecutionRecord {
                tool: "run_r_code".to_string(),
                code: "summary(df)".to_string(),
            }]
        );
    }
}
