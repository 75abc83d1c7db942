//! Dedicated writer task: the single writer per socket.
//!
//! All commands funnel through an mpsc channel into one task that owns
//! the write half, so commands reach the broker in send order and no two
//! writers ever interleave bytes. The read loop uses the same handle to
//! enqueue heartbeat NOPs without contending for a lock.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{NsqError, Result};

/// Channel capacity for queued commands. Commands are small; this only
/// bounds how far a producer can run ahead of the socket.
const CHANNEL_CAPACITY: usize = 64;

/// Handle for enqueueing encoded commands onto the writer task.
///
/// Cheaply cloneable; every sender on the connection shares one.
#[derive(Clone, Debug)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Enqueue pre-encoded command bytes.
    ///
    /// Fails with [`NsqError::Connection`] once the writer task has shut
    /// down (socket closed or connection dropped).
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        self.tx
            .send(bytes)
            .await
            .map_err(|_| NsqError::Connection("connection is closed for writing".into()))
    }
}

/// Spawn the writer task owning the socket's write half.
pub(crate) fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Drains the channel and writes each command; exits when every handle
/// is dropped or the socket rejects a write.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = write_command(&mut writer, &bytes).await {
            tracing::debug!("writer task stopping: {e}");
            rx.close();
            break;
        }
    }
}

async fn write_command<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}
