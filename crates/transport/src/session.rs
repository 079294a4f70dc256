use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::decoder::ChunkDecoder;
use super::error::{StreamTimeoutSnafu, TransportError, TransportResult};
use super::reader::ChunkReader;
use super::timer::InactivityTimer;

static NEXT_STREAM_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier for one streaming request, used to correlate log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn next() -> Self {
        Self(NEXT_STREAM_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StreamSessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "stream-{}", self.0)
    }
}

/// How a stream that did not fail came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The backend closed the body; holds the full decoded text.
    Completed(String),
    /// The caller cancelled; holds the text received up to that point.
    Cancelled(String),
}

impl StreamOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Completed(text) | Self::Cancelled(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Completed(text) | Self::Cancelled(text) => text,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// State owned by one in-flight response: decoder, buffer, reader and cancel flag.
///
/// The buffer is only handed out through the progress callback (borrowed) and
/// the final [`StreamOutcome`] (owned), so nothing else can mutate it.
pub struct StreamSession {
    id: StreamSessionId,
    reader: ChunkReader,
    decoder: ChunkDecoder,
    buffer: String,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl StreamSession {
    pub fn new(reader: ChunkReader, idle_timeout: Duration) -> Self {
        Self {
            id: StreamSessionId::next(),
            reader,
            decoder: ChunkDecoder::new(),
            buffer: String::new(),
            idle_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Ties the session to a token owned by the caller, e.g. a Ctrl-C handler.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> StreamSessionId {
        self.id
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Token that stops [`run`](Self::run) cleanly when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Reads the body to completion.
    ///
    /// Each iteration races the next read against the inactivity timer and the
    /// cancel token. `on_progress` gets the whole buffer after every received
    /// chunk. Text already passed to `on_progress` stays valid when this fails.
    pub async fn run<F>(mut self, mut on_progress: F) -> TransportResult<StreamOutcome>
    where
        F: FnMut(&str),
    {
        let mut timer = InactivityTimer::new(self.idle_timeout);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.reader.release();
                    tracing::debug!(
                        session = %self.id,
                        received_bytes = self.reader.received_bytes(),
                        "stream cancelled by caller"
                    );
                    return Ok(StreamOutcome::Cancelled(self.buffer));
                }
                next_chunk = self.reader.read() => {
                    match next_chunk {
                        Some(Ok(chunk)) => {
                            timer.reset();
                            let increment = self.decoder.feed(&chunk)?;
                            self.buffer.push_str(&increment);
                            tracing::trace!(
                                session = %self.id,
                                chunk_bytes = chunk.len(),
                                buffer_len = self.buffer.len(),
                                "received stream chunk"
                            );
                            on_progress(&self.buffer);
                        }
                        Some(Err(source)) => {
                            let received_bytes = self.reader.received_bytes();
                            self.reader.release();
                            tracing::warn!(
                                session = %self.id,
                                received_bytes,
                                error = %source,
                                "response body failed mid-stream"
                            );
                            return Err(TransportError::ReadChunk {
                                stage: "stream-read-chunk",
                                received_bytes,
                                source,
                            });
                        }
                        None => break,
                    }
                }
                _ = &mut timer => {
                    self.reader.release();
                    tracing::warn!(
                        session = %self.id,
                        idle = ?self.idle_timeout,
                        received_bytes = self.reader.received_bytes(),
                        "stream stalled past the inactivity window"
                    );
                    return StreamTimeoutSnafu {
                        stage: "stream-inactivity-timeout",
                        idle: self.idle_timeout,
                        received_bytes: self.reader.received_bytes(),
                    }
                    .fail();
                }
            }
        }

        let residue = self.decoder.flush();
        if !residue.is_empty() {
            self.buffer.push_str(&residue);
            on_progress(&self.buffer);
        }

        tracing::debug!(
            session = %self.id,
            received_bytes = self.reader.received_bytes(),
            received_chunks = self.reader.received_chunks(),
            "stream completed"
        );
        Ok(StreamOutcome::Completed(self.buffer))
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StreamSession")
            .field("id", &self.id)
            .field("reader", &self.reader)
            .field("buffer_len", &self.buffer.len())
            .field("idle_timeout", &self.idle_timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use futures::stream::{self, StreamExt};
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::BoxError;
    use crate::reader::RawChunk;

    const IDLE: Duration = Duration::from_secs(120);

    fn stalled_after(chunks: Vec<RawChunk>) -> ChunkReader {
        let head = stream::iter(chunks.into_iter().map(Ok::<_, BoxError>));
        ChunkReader::from_stream(head.chain(stream::pending()))
    }

    #[tokio::test]
    async fn accumulates_chunks_and_reports_progress_per_chunk() {
        let reader = ChunkReader::from_chunks(vec![
            b"Hello".to_vec(),
            b", ".to_vec(),
            b"world".to_vec(),
        ]);
        let mut snapshots = Vec::new();

        let outcome = StreamSession::new(reader, IDLE)
            .run(|text| snapshots.push(text.to_string()))
            .await
            .expect("stream completes");

        assert_eq!(outcome, StreamOutcome::Completed("Hello, world".to_string()));
        assert_eq!(snapshots, vec!["Hello", "Hello, ", "Hello, world"]);
    }

    #[tokio::test]
    async fn multibyte_characters_split_across_chunks_survive() {
        let bytes = "plot ✅ 📈".as_bytes().to_vec();
        let chunks = bytes.chunks(3).map(<[u8]>::to_vec).collect::<Vec<_>>();

        let outcome = StreamSession::new(ChunkReader::from_chunks(chunks), IDLE)
            .run(|text| assert!(!text.contains('\u{FFFD}')))
            .await
            .expect("stream completes");

        assert_eq!(outcome.text(), "plot ✅ 📈");
    }

    #[tokio::test]
    async fn truncated_character_is_flushed_as_replacement() {
        let emoji = "📈".as_bytes();
        let reader = ChunkReader::from_chunks(vec![b"x".to_vec(), emoji[..3].to_vec()]);
        let mut progress_calls = 0;

        let outcome = StreamSession::new(reader, IDLE)
            .run(|_| progress_calls += 1)
            .await
            .expect("stream completes");

        assert_eq!(outcome.text(), "x\u{FFFD}");
        assert_eq!(progress_calls, 3);
    }

    fn channel_reader() -> (mpsc::Sender<RawChunk>, ChunkReader) {
        let (sender, receiver) = mpsc::channel(8);
        let source = stream::unfold(receiver, |mut receiver| async move {
            let chunk = receiver.recv().await?;
            Some((Ok::<_, BoxError>(chunk), receiver))
        });
        (sender, ChunkReader::from_stream(source))
    }

    #[tokio::test]
    async fn cancelling_drops_the_chunk_source() {
        let (sender, reader) = channel_reader();
        sender.send(b"first".to_vec()).await.expect("chunk queued");
        let session = StreamSession::new(reader, IDLE);
        let cancel = session.cancel_token();

        let outcome = session
            .run(move |_| cancel.cancel())
            .await
            .expect("cancel is not an error");

        assert_eq!(outcome, StreamOutcome::Cancelled("first".to_string()));
        assert!(sender.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn timing_out_drops_the_chunk_source() {
        let (sender, reader) = channel_reader();
        sender.send(b"first".to_vec()).await.expect("chunk queued");

        let error = StreamSession::new(reader, IDLE)
            .run(|_| {})
            .await
            .expect_err("stream stalls");

        assert!(matches!(error, TransportError::StreamTimeout { .. }));
        assert!(sender.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn stall_after_first_chunk_times_out_after_one_progress_call() {
        let mut progress_calls = 0;
        let mut last_seen = String::new();

        let error = StreamSession::new(stalled_after(vec![b"partial".to_vec()]), IDLE)
            .run(|text| {
                progress_calls += 1;
                last_seen = text.to_string();
            })
            .await
            .expect_err("stream stalls");

        assert!(matches!(
            error,
            TransportError::StreamTimeout {
                idle,
                received_bytes: 7,
                ..
            } if idle == IDLE
        ));
        assert_eq!(progress_calls, 1);
        assert_eq!(last_seen, "partial");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_window_restarts_on_every_chunk() {
        // Four chunks spaced 100s apart: 300s in total, never 120s of silence.
        let paced = stream::unfold(0_u8, |sent| async move {
            if sent == 4 {
                return None;
            }
            if sent > 0 {
                tokio::time::sleep(Duration::from_secs(100)).await;
            }
            Some((Ok::<_, BoxError>(vec![b'a' + sent]), sent + 1))
        });

        let outcome = StreamSession::new(ChunkReader::from_stream(paced), IDLE)
            .run(|_| {})
            .await
            .expect("activity keeps the stream alive");

        assert_eq!(outcome.text(), "abcd");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_a_clean_stop_with_partial_text() {
        let session = StreamSession::new(stalled_after(vec![b"first".to_vec()]), IDLE);
        let cancel = session.cancel_token();

        let outcome = session
            .run(move |_| cancel.cancel())
            .await
            .expect("cancel is not an error");

        assert_eq!(outcome, StreamOutcome::Cancelled("first".to_string()));
        assert!(outcome.is_cancelled());
    }

    #[tokio::test]
    async fn external_token_cancels_before_any_data() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = StreamSession::new(stalled_after(Vec::new()), IDLE)
            .with_cancel_token(cancel)
            .run(|_| panic!("no progress expected"))
            .await
            .expect("cancel is not an error");

        assert_eq!(outcome, StreamOutcome::Cancelled(String::new()));
    }

    #[tokio::test]
    async fn body_failure_mid_stream_is_terminal() {
        let failing = stream::iter(vec![
            Ok(b"half".to_vec()),
            Err(BoxError::from(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))),
            Ok(b"never".to_vec()),
        ]);
        let mut last_seen = String::new();

        let error = StreamSession::new(ChunkReader::from_stream(failing), IDLE)
            .run(|text| last_seen = text.to_string())
            .await
            .expect_err("body fails");

        assert!(matches!(
            error,
            TransportError::ReadChunk {
                received_bytes: 4,
                ..
            }
        ));
        assert_eq!(last_seen, "half");
    }

    #[test]
    fn session_ids_are_unique() {
        let first = StreamSessionId::next();
        let second = StreamSessionId::next();

        assert_ne!(first, second);
        assert!(first.to_string().starts_with("stream-"));
    }
}
