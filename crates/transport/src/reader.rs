use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};

use super::error::BoxError;

/// One delivery of bytes from the transport. A character may straddle two chunks.
pub type RawChunk = Vec<u8>;

pub type ChunkStream = BoxStream<'static, Result<RawChunk, BoxError>>;

/// Cancellable read handle over a chunked response body.
///
/// Releasing the reader drops the underlying body, which aborts any IO still
/// in flight. Reads after release or end of stream return `None`.
pub struct ChunkReader {
    source: Option<ChunkStream>,
    received_bytes: usize,
    received_chunks: usize,
}

impl ChunkReader {
    pub fn new(source: ChunkStream) -> Self {
        Self {
            source: Some(source),
            received_bytes: 0,
            received_chunks: 0,
        }
    }

    pub fn from_stream<S>(source: S) -> Self
    where
        S: Stream<Item = Result<RawChunk, BoxError>> + Send + 'static,
    {
        Self::new(source.boxed())
    }

    /// Replays an in-memory chunk sequence, e.g. a recorded response.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = RawChunk>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(chunks.into_iter().map(Ok)))
    }

    /// Waits for the next chunk. Dropping the returned future loses no data.
    pub async fn read(&mut self) -> Option<Result<RawChunk, BoxError>> {
        let source = self.source.as_mut()?;
        let next = source.next().await;

        match &next {
            Some(Ok(chunk)) => {
                self.received_bytes += chunk.len();
                self.received_chunks += 1;
            }
            Some(Err(_)) => {}
            None => self.source = None,
        }

        next
    }

    pub fn release(&mut self) {
        self.source = None;
    }

    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }

    pub fn received_bytes(&self) -> usize {
        self.received_bytes
    }

    pub fn received_chunks(&self) -> usize {
        self.received_chunks
    }
}

impl std::fmt::Debug for ChunkReader {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ChunkReader")
            .field("released", &self.is_released())
            .field("received_bytes", &self.received_bytes)
            .field("received_chunks", &self.received_chunks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_chunks_and_releases_at_end_of_stream() {
        let mut reader = ChunkReader::from_chunks(vec![b"ab".to_vec(), b"cde".to_vec()]);

        assert_eq!(reader.read().await.map(Result::ok), Some(Some(b"ab".to_vec())));
        assert_eq!(reader.read().await.map(Result::ok), Some(Some(b"cde".to_vec())));
        assert!(reader.read().await.is_none());
        assert!(reader.is_released());
        assert_eq!(reader.received_bytes(), 5);
        assert_eq!(reader.received_chunks(), 2);
    }

    #[tokio::test]
    async fn release_stops_further_reads() {
        let mut reader = ChunkReader::from_chunks(vec![b"ab".to_vec(), b"cd".to_vec()]);
        reader.read().await;
        reader.release();

        assert!(reader.read().await.is_none());
        assert_eq!(reader.received_chunks(), 1);
    }
}
