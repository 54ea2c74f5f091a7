// src/core/io/output.rs

//! The write side of the replication connection.
//!
//! Every outbound message is one RESP array of bulk strings, written and
//! flushed while the caller holds the writer lock, so frames from the reader
//! (handshake, GETACK replies) and the heartbeat never interleave.

use crate::core::RedsyncError;
use crate::core::protocol::RespFrame;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::debug;

pub struct CommandWriter {
    inner: BufWriter<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl CommandWriter {
    pub fn new<W>(inner: W, buffer_size: usize) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: BufWriter::with_capacity(buffer_size, Box::new(inner)),
        }
    }

    /// Writes one framed command and flushes it.
    pub async fn write_command(
        &mut self,
        command: &str,
        args: &[&[u8]],
    ) -> Result<(), RedsyncError> {
        let encoded = RespFrame::command(command, args).encode_to_vec();
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Best-effort variant: failures are logged and swallowed. Used on paths
    /// (heartbeat, GETACK replies) where the reader will observe and report
    /// the same transport fault.
    pub async fn write_command_quietly(&mut self, command: &str, args: &[&[u8]]) {
        if let Err(e) = self.write_command(command, args).await {
            debug!("suppressed write failure for {command}: {e}");
        }
    }

    /// Shuts the write half down, completing any buffered output first.
    pub async fn shutdown(&mut self) -> Result<(), RedsyncError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
