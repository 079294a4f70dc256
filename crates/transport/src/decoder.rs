use snafu::ensure;

use super::error::{DecoderClosedSnafu, TransportResult};

const REPLACEMENT_CHARACTER: char = '\u{FFFD}';

/// Stateful UTF-8 decoder for a chunked byte stream.
///
/// Bytes of a character that straddles two chunks are held back until the
/// rest of the sequence arrives, so emitted text never contains a split
/// character. Malformed sequences decode to U+FFFD instead of failing.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
    flushed: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one chunk and returns the text it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> TransportResult<String> {
        ensure!(
            !self.flushed,
            DecoderClosedSnafu {
                stage: "decoder-feed",
            }
        );

        self.pending.extend_from_slice(chunk);
        let mut text = String::with_capacity(self.pending.len());
        let consumed = decode_complete_prefix(&self.pending, &mut text);
        self.pending.drain(..consumed);
        Ok(text)
    }

    /// Emits whatever the decoder still holds and closes it.
    ///
    /// A sequence left incomplete by the end of the stream becomes one U+FFFD.
    /// Flushing again yields an empty string.
    pub fn flush(&mut self) -> String {
        if self.flushed {
            return String::new();
        }
        self.flushed = true;

        let mut text = String::new();
        let consumed = decode_complete_prefix(&self.pending, &mut text);
        if consumed < self.pending.len() {
            text.push(REPLACEMENT_CHARACTER);
        }
        self.pending.clear();
        text
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

/// Appends the decodable prefix of `bytes` to `out` and returns how many bytes it used.
///
/// Stops in front of a trailing sequence that could still be completed by more input.
fn decode_complete_prefix(bytes: &[u8], out: &mut String) -> usize {
    let mut cursor = 0;

    loop {
        let rest = &bytes[cursor..];
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                return bytes.len();
            }
            Err(error) => {
                let valid_len = error.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&rest[..valid_len]) {
                    out.push_str(valid);
                }

                match error.error_len() {
                    Some(invalid_len) => {
                        out.push(REPLACEMENT_CHARACTER);
                        cursor += valid_len + invalid_len;
                    }
                    None => return cursor + valid_len,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    const SAMPLE: &str = "Résumé 📊 naïve → 数据 done";

    fn decode_chunks(chunks: &[&[u8]]) -> String {
        let mut decoder = ChunkDecoder::new();
        let mut text = String::new();
        for chunk in chunks {
            text.push_str(&decoder.feed(chunk).expect("decoder open"));
        }
        text.push_str(&decoder.flush());
        text
    }

    #[test]
    fn every_two_way_split_round_trips() {
        let bytes = SAMPLE.as_bytes();
        for split in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(split);
            assert_eq!(decode_chunks(&[head, tail]), SAMPLE, "split at {split}");
        }
    }

    #[test]
    fn every_three_way_split_round_trips() {
        let bytes = SAMPLE.as_bytes();
        for first in 0..=bytes.len() {
            for second in first..=bytes.len() {
                let chunks = [&bytes[..first], &bytes[first..second], &bytes[second..]];
                assert_eq!(decode_chunks(&chunks), SAMPLE, "splits at {first}/{second}");
            }
        }
    }

    #[test]
    fn byte_at_a_time_never_emits_partial_characters() {
        let mut decoder = ChunkDecoder::new();
        let mut emitted = Vec::new();
        for byte in "📊".as_bytes() {
            emitted.push(decoder.feed(&[*byte]).expect("decoder open"));
        }

        assert_eq!(emitted, vec!["", "", "", "📊"]);
        assert_eq!(decoder.pending_bytes(), 0);
        assert_eq!(decoder.flush(), "");
    }

    #[test]
    fn incomplete_tail_at_flush_becomes_replacement() {
        let mut decoder = ChunkDecoder::new();
        let emoji = "📊".as_bytes();

        assert_eq!(decoder.feed(b"ok ").expect("decoder open"), "ok ");
        assert_eq!(decoder.feed(&emoji[..2]).expect("decoder open"), "");
        assert_eq!(decoder.flush(), "\u{FFFD}");
    }

    #[test]
    fn malformed_bytes_are_replaced_not_buffered() {
        let mut decoder = ChunkDecoder::new();
        let text = decoder.feed(b"a\xFFb").expect("decoder open");

        assert_eq!(text, "a\u{FFFD}b");
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn feed_after_flush_is_rejected() {
        let mut decoder = ChunkDecoder::new();
        decoder.feed(b"hello").expect("decoder open");
        assert_eq!(decoder.flush(), "");
        assert!(decoder.is_flushed());
        assert_eq!(decoder.flush(), "");

        let error = decoder.feed(b"late").expect_err("decoder closed");
        assert!(matches!(error, TransportError::DecoderClosed { .. }));
    }
}
