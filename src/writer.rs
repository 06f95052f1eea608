//! Dedicated writer task for outbound traffic.
//!
//! The worker never touches the socket: it queues pre-encoded frames on an
//! mpsc channel and a single task drains them, batching whatever is ready
//! into one vectored write.
//!
//! ```text
//! Worker ─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Socket
//! ```

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::{Result, SpanwireError};
use crate::protocol::{ClientMessage, HandshakeMessage};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 32;

/// Bytes ready to be written, framing included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub bytes: Bytes,
}

impl OutboundFrame {
    /// The 40-byte hello, sent unframed.
    pub fn hello(hello: &HandshakeMessage) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(&hello.encode()),
        }
    }

    /// A length-prefixed client message.
    pub fn message(message: &ClientMessage) -> Self {
        Self {
            bytes: message.to_frame(),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the outbound queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for queueing frames on the writer task. Cheap to clone.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame, waiting for channel space.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| SpanwireError::ConnectionClosed)
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly once every handle is dropped, or with an error
/// on the first failed write.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
        trace!(frames = batch.len(), "outbound batch written");
    }
    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch with vectored I/O, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(SpanwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering everything after the first `skip_bytes` bytes.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.size();
        if skip_bytes < end && frame.size() > 0 {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.bytes[start..]));
        }
        offset = end;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientRecord, HELLO_SIZE};
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    fn record_frame() -> OutboundFrame {
        OutboundFrame::message(&ClientMessage::Record(ClientRecord::start(3)))
    }

    #[test]
    fn test_outbound_sizes() {
        assert_eq!(
            OutboundFrame::hello(&HandshakeMessage::expected()).size(),
            HELLO_SIZE
        );
        // prefix + code + u32 + u8
        assert_eq!(record_frame().size(), 4 + 1 + 5);
    }

    #[test]
    fn test_build_remaining_slices() {
        let batch = vec![record_frame(), record_frame()];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);

        let slices = build_remaining_slices(&batch, 4);
        assert_eq!(slices[0].len(), 6);
        assert_eq!(slices[1].len(), 10);

        let slices = build_remaining_slices(&batch, 10);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 10);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| record_frame()).collect();

        write_batch(&mut buf, &batch).await.unwrap();
        assert_eq!(buf.into_inner().len(), 50);
    }

    #[tokio::test]
    async fn test_writer_task_preserves_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle
            .send(OutboundFrame::hello(&HandshakeMessage::expected()))
            .await
            .unwrap();
        handle.send(record_frame()).await.unwrap();

        let mut buf = vec![0u8; HELLO_SIZE + 10];
        tokio::time::timeout(Duration::from_secs(1), server.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(&buf[..4], b"BP3D");
        assert_eq!(&buf[HELLO_SIZE..HELLO_SIZE + 4], &6u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_send_after_writer_stopped() {
        let (client, server) = duplex(16);
        drop(server);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(record_frame()).await.unwrap();
        assert!(task.await.unwrap().is_err());
        assert!(matches!(
            handle.send(record_frame()).await,
            Err(SpanwireError::ConnectionClosed)
        ));
    }
}
