use std::fmt::Write as _;

use tabletalk_protocol::StructuredMessage;

pub const PLACEHOLDER_TEXT: &str =
    "Analysis completed. Review the code, output, and visualizations above.";

/// Terminal rendering of an assembled answer: code, outputs and images
/// first, then the narrative.
pub fn render_message(message: &StructuredMessage, min_narrative_chars: usize) -> String {
    let mut rendered = String::new();

    for record in &message.code {
        let _ = writeln!(rendered, "── code ({}) ──\n{}\n", record.tool, record.code);
    }
    for output in &message.outputs {
        let _ = writeln!(rendered, "── output ──\n{output}\n");
    }
    match message.images.len() {
        0 => {}
        1 => rendered.push_str("[1 image]\n\n"),
        count => {
            let _ = writeln!(rendered, "[{count} images]\n");
        }
    }

    if message.needs_placeholder(min_narrative_chars) {
        rendered.push_str(PLACEHOLDER_TEXT);
    } else {
        rendered.push_str(&message.text);
    }

    rendered.trim_end().to_string()
}

/// Age of a timestamp the way the session list shows it.
pub fn relative_time(now_ms: u64, then_ms: u64) -> String {
    let minutes = now_ms.saturating_sub(then_ms) / 60_000;
    let hours = minutes / 60;
    let days = hours / 24;

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else {
        format!("{days}d ago")
    }
}

#[cfg(test)]
mod tests {
    use tabletalk_protocol::{CodeExecutionRecord, ImageResource};

    use super::*;

    #[test]
    fn attachments_render_before_narrative() {
        let message = StructuredMessage {
            text: "Sales peaked in March.".to_string(),
            code: vec![CodeExecutionRecord {
                tool: "run_python_code".to_string(),
                code: "df.plot()".to_string(),
            }],
            outputs: vec!["ok".to_string()],
            images: vec![ImageResource::new("image/png", "QUJD")],
        };

        assert_eq!(
            render_message(&message, 10),
            "── code (run_python_code) ──\ndf.plot()\n\n── output ──\nok\n\n[1 image]\n\nSales peaked in March."
        );
    }

    #[test]
    fn sparse_narrative_gets_placeholder() {
        let message = StructuredMessage {
            outputs: vec!["42".to_string()],
            ..StructuredMessage::default()
        };

        assert!(render_message(&message, 10).ends_with(PLACEHOLDER_TEXT));
    }

    #[test]
    fn relative_time_buckets() {
        let now = 10 * 24 * 3_600_000;
        assert_eq!(relative_time(now, now - 30_000), "Just now");
        assert_eq!(relative_time(now, now - 5 * 60_000), "5m ago");
        assert_eq!(relative_time(now, now - 3 * 3_600_000), "3h ago");
        assert_eq!(relative_time(now, now - 9 * 24 * 3_600_000), "9d ago");
        assert_eq!(relative_time(now, now + 1), "Just now");
    }
}
