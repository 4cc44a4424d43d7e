use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use crate::ch::ByteBuf;
use crate::error::{BridgeError, Result};
use crate::query::StreamOptions;

// blocks in flight before the producer suspends
const WRITE_QUEUE_BLOCKS: usize = 8;

type Chunk = std::result::Result<Bytes, std::io::Error>;

/// Writer side of a chunked response. Encoded rows are coalesced into blocks
/// of `max_block_size` bytes and pushed through a bounded channel; a full
/// queue suspends the producer, a dropped consumer (client disconnect or
/// route timeout) turns every further write into `WriterClosed`.
pub struct ResponseWriter {
    tx: mpsc::Sender<Chunk>,
    pending: Vec<u8>,
    max_block_size: usize,
}

impl ResponseWriter {
    pub fn channel(options: &StreamOptions) -> (ResponseWriter, mpsc::Receiver<Chunk>) {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_BLOCKS);
        let writer = ResponseWriter {
            tx,
            pending: Vec::with_capacity(options.max_block_size),
            max_block_size: options.max_block_size,
        };
        (writer, rx)
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn write(&mut self, buf: ByteBuf) -> Result<()> {
        if !self.is_open() {
            return Err(BridgeError::WriterClosed);
        }

        self.pending.extend_from_slice(buf.as_bytes());
        if self.pending.len() >= self.max_block_size {
            self.flush().await?;
        }

        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let block = Bytes::from(std::mem::take(&mut self.pending));
        self.tx.send(Ok(block)).await.map_err(|_| BridgeError::WriterClosed)
    }

    /// Flushes whatever is buffered and closes the stream.
    pub async fn finish(mut self) -> Result<()> {
        self.flush().await
    }

    /// Ends the stream with an error so the client sees a truncated body
    /// instead of a silently complete one.
    pub async fn fail(self, error: &BridgeError) {
        let _ = self
            .tx
            .send(Err(std::io::Error::other(error.to_string())))
            .await;
    }
}

/// Adapts the receiver half into a body stream for `Body::from_stream`.
pub fn body_stream(rx: mpsc::Receiver<Chunk>) -> impl Stream<Item = Chunk> {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|chunk| (chunk, rx)) })
}
