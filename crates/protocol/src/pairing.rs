use super::config::ProtocolConfig;
use super::extract::{CodeSpan, ExecutingMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnpairedReason {
    /// The marker names a tool other than the executable one.
    NonExecutableTool,
    /// No unclaimed tagged fence starts after the marker within the lookahead.
    NoQualifyingCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpairedMarker {
    pub marker: ExecutingMarker,
    pub reason: UnpairedReason,
}

/// Indices into the extracted marker and code span lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub marker: usize,
    pub code: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pairing {
    pub pairs: Vec<Pair>,
    pub unpaired: Vec<UnpairedMarker>,
}

/// Pairs each executing marker with the first qualifying code fence.
///
/// Markers are visited in encounter order and a fence, once claimed, is not
/// offered to later markers. A fence qualifies when it carries the `python`
/// tag, starts after the marker and lies fewer than `max_lookahead_chars`
/// characters away.
pub fn pair_markers(
    text: &str,
    markers: &[ExecutingMarker],
    code_spans: &[CodeSpan],
    config: &ProtocolConfig,
) -> Pairing {
    let mut claimed = vec![false; code_spans.len()];
    let mut pairing = Pairing::default();

    for (marker_index, marker) in markers.iter().enumerate() {
        if marker.tool != config.executable_tool {
            pairing.unpaired.push(UnpairedMarker {
                marker: marker.clone(),
                reason: UnpairedReason::NonExecutableTool,
            });
            continue;
        }

        let found = code_spans
            .iter()
            .enumerate()
            .find(|(code_index, code)| {
                !claimed[*code_index]
                    && code.is_executable
                    && code.offset() > marker.offset()
                    && char_distance(text, marker.offset(), code.offset())
                        < config.max_lookahead_chars
            })
            .map(|(code_index, _)| code_index);

        match found {
            Some(code_index) => {
                claimed[code_index] = true;
                pairing.pairs.push(Pair {
                    marker: marker_index,
                    code: code_index,
                });
            }
            None => pairing.unpaired.push(UnpairedMarker {
                marker: marker.clone(),
                reason: UnpairedReason::NoQualifyingCode,
            }),
        }
    }

    pairing
}

fn char_distance(text: &str, from: usize, to: usize) -> usize {
    text.get(from..to)
        .map_or(usize::MAX, |between| between.chars().count())
}
