// src/core/io/prefetch.rs

//! An async read-ahead buffer.
//!
//! A background task drains the socket into a bounded channel of chunks, so
//! the reader can fall behind (e.g. while applying a large snapshot) without
//! stalling the primary's send window. The channel bound caps the read-ahead
//! at roughly the configured byte budget.

use bytes::{Bytes, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The chunk size the prefetch task reads from the socket.
const PREFETCH_CHUNK: usize = 8 * 1024;

/// An `AsyncRead` fed by a background prefetch task.
pub struct PrefetchReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
    task: JoinHandle<()>,
}

impl PrefetchReader {
    /// Spawns the prefetch task over `source`, buffering up to `cached_bytes`
    /// ahead of the consumer.
    pub fn spawn<R>(mut source: R, cached_bytes: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let capacity = (cached_bytes / PREFETCH_CHUNK).max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(async move {
            loop {
                let mut chunk = BytesMut::with_capacity(PREFETCH_CHUNK);
                match source.read_buf(&mut chunk).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(Ok(chunk.freeze())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });
        Self {
            rx,
            current: Bytes::new(),
            task,
        }
    }
}

impl AsyncRead for PrefetchReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.current.is_empty() {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.current = bytes,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                // Channel closed: the prefetch task saw EOF.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = this.current.len().min(buf.remaining());
        buf.put_slice(&this.current.split_to(n));
        Poll::Ready(Ok(()))
    }
}

impl Drop for PrefetchReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}
