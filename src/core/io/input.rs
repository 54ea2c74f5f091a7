// src/core/io/input.rs

//! The buffered input stream the replication reader parses from.
//!
//! `ReplInput` owns the read side of the connection (directly or through the
//! prefetch buffer) and provides the byte-level primitives the parsers need:
//! single-byte and exact-length reads, skipping with or without touching the
//! offset mark, a raw-byte tap, an optional token-bucket throttle, and CRC64
//! accumulation for the snapshot phase.

use crate::core::RedsyncError;
use crate::core::events::RawByteListener;
use crate::core::io::rate_limit::TokenBucket;
use bytes::{Bytes, BytesMut};
use crc::{CRC_64_REDIS, Crc, Digest};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

pub struct ReplInput {
    inner: Box<dyn AsyncRead + Send + Sync + Unpin>,
    buf: BytesMut,
    buffer_size: usize,
    limiter: Option<TokenBucket>,
    raw_listeners: Vec<Arc<dyn RawByteListener>>,
    /// Bytes consumed (and counted) since the last `mark()`.
    mark: Option<u64>,
    checksum: Option<Digest<'static, u64>>,
}

impl ReplInput {
    pub fn new<R>(inner: R, buffer_size: usize) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        Self {
            inner: Box::new(inner),
            buf: BytesMut::with_capacity(buffer_size),
            buffer_size,
            limiter: None,
            raw_listeners: Vec::new(),
            mark: None,
            checksum: None,
        }
    }

    /// Caps the read rate at `bytes_per_sec`.
    pub fn set_rate_limit(&mut self, bytes_per_sec: u64) {
        self.limiter = Some(TokenBucket::new(bytes_per_sec));
    }

    /// Installs the raw-byte tap. Listeners see every byte read from the
    /// socket, in order, before any higher layer consumes it.
    pub fn set_raw_listeners(&mut self, listeners: Vec<Arc<dyn RawByteListener>>) {
        self.raw_listeners = listeners;
    }

    pub fn clear_raw_listeners(&mut self) {
        self.raw_listeners.clear();
    }

    /// Starts counting consumed bytes.
    pub fn mark(&mut self) {
        self.mark = Some(0);
    }

    /// Stops counting and returns the number of bytes consumed since
    /// `mark()`, excluding skips made with `count = false`.
    pub fn unmark(&mut self) -> u64 {
        self.mark.take().unwrap_or(0)
    }

    /// Starts CRC64 accumulation over subsequently consumed bytes.
    pub fn begin_checksum(&mut self) {
        self.checksum = Some(CRC64.digest());
    }

    /// Stops accumulation and returns the digest.
    pub fn finish_checksum(&mut self) -> u64 {
        self.checksum.take().map(|d| d.finalize()).unwrap_or(0)
    }

    pub async fn read_u8(&mut self) -> Result<u8, RedsyncError> {
        if self.buf.is_empty() {
            self.fill().await?;
        }
        let consumed = self.buf.split_to(1);
        self.note_consumed(&consumed, true);
        Ok(consumed[0])
    }

    /// Reads exactly `len` bytes.
    pub async fn read_exact(&mut self, len: usize) -> Result<Bytes, RedsyncError> {
        let mut out = BytesMut::with_capacity(len);
        while out.len() < len {
            if self.buf.is_empty() {
                self.fill().await?;
            }
            let take = (len - out.len()).min(self.buf.len());
            let chunk = self.buf.split_to(take);
            self.note_consumed(&chunk, true);
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Discards `len` bytes. When `count` is false the bytes bypass the
    /// offset mark; the disk-less snapshot trailer must not appear in the
    /// replication offset.
    pub async fn skip(&mut self, len: u64, count: bool) -> Result<(), RedsyncError> {
        let mut remaining = len;
        while remaining > 0 {
            if self.buf.is_empty() {
                self.fill().await?;
            }
            let take = remaining.min(self.buf.len() as u64) as usize;
            let chunk = self.buf.split_to(take);
            self.note_consumed(&chunk, count);
            remaining -= take as u64;
        }
        Ok(())
    }

    /// Refills the (empty) buffer with one read from the underlying stream,
    /// notifying the raw tap and honoring the rate limit.
    async fn fill(&mut self) -> Result<(), RedsyncError> {
        self.buf.reserve(self.buffer_size);
        let n = self.inner.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(RedsyncError::ConnectionClosed);
        }
        for listener in &self.raw_listeners {
            listener.on_bytes(&self.buf[..]);
        }
        if let Some(limiter) = &mut self.limiter {
            limiter.acquire(n as u64).await;
        }
        Ok(())
    }

    fn note_consumed(&mut self, bytes: &[u8], count: bool) {
        if count {
            if let Some(mark) = self.mark.as_mut() {
                *mark += bytes.len() as u64;
            }
        }
        if let Some(digest) = self.checksum.as_mut() {
            digest.update(bytes);
        }
    }
}
