// src/core/protocol/reply_parser.rs

//! The streaming RESP parser for the replication reader.
//!
//! Unlike a codec over an in-memory buffer, this parser pulls bytes from the
//! buffered [`ReplInput`] on demand. That makes two things possible that a
//! framed decoder cannot express:
//!
//! - handing the payload of a huge bulk (the RDB snapshot) to a
//!   [`BulkReplyHandler`] instead of materializing it, and
//! - reporting the exact on-wire length of a parsed frame through the input's
//!   mark counter, which is how the replication offset is advanced.

use crate::core::RedsyncError;
use crate::core::io::ReplInput;
use crate::core::protocol::RespFrame;
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

// Limits on malformed or hostile frames.
const MAX_ARRAY_ELEMENTS: i64 = 1024 * 1024;
const MAX_BULK_STRING_SIZE: i64 = 512 * 1024 * 1024; // 512MB, the server-side cap

/// Consumes the payload of a bulk reply directly from the input stream.
///
/// `len` is the advertised payload length; `-1` denotes disk-less mode, where
/// the payload is self-delimiting and followed by an out-of-band terminator.
/// The returned bytes stand in for the reply value of the parse call.
#[async_trait]
pub trait BulkReplyHandler: Send {
    async fn handle(&mut self, len: i64, input: &mut ReplInput) -> Result<Bytes, RedsyncError>;
}

/// Decodes one top-level RESP value per call.
pub struct ReplyParser;

impl ReplyParser {
    /// Parses the next frame from the stream.
    pub async fn parse(input: &mut ReplInput) -> Result<RespFrame, RedsyncError> {
        parse_value(input).await
    }

    /// Parses the next frame and reports how many wire bytes it occupied.
    ///
    /// The byte count is exactly what the primary counts against the
    /// replication offset for this frame, framing bytes included.
    pub async fn parse_counted(input: &mut ReplInput) -> Result<(RespFrame, u64), RedsyncError> {
        input.mark();
        let result = parse_value(input).await;
        let len = input.unmark();
        result.map(|frame| (frame, len))
    }

    /// Parses a bulk reply whose payload must not be buffered, handing the
    /// stream to `handler` instead.
    ///
    /// No trailing CRLF is consumed: the snapshot transfer is not terminated
    /// by one.
    pub async fn parse_bulk_with<H>(
        input: &mut ReplInput,
        handler: &mut H,
    ) -> Result<Bytes, RedsyncError>
    where
        H: BulkReplyHandler + ?Sized,
    {
        match input.read_u8().await? {
            b'$' => {
                let len = read_integer_line(input).await?;
                handler.handle(len, input).await
            }
            b'-' => {
                let line = read_line(input).await?;
                Err(RedsyncError::Replication(
                    String::from_utf8_lossy(&line).into_owned(),
                ))
            }
            other => Err(RedsyncError::Protocol(format!(
                "expected bulk reply ('$'), got prefix 0x{other:02x}"
            ))),
        }
    }
}

/// Reads one CRLF-terminated line, excluding the terminator. A bare CR or LF
/// inside the line is a framing error.
async fn read_line(input: &mut ReplInput) -> Result<Vec<u8>, RedsyncError> {
    let mut line = Vec::new();
    loop {
        match input.read_u8().await? {
            b'\r' => {
                let next = input.read_u8().await?;
                if next != b'\n' {
                    return Err(RedsyncError::Protocol(
                        "CR not followed by LF in RESP line".into(),
                    ));
                }
                return Ok(line);
            }
            b'\n' => {
                return Err(RedsyncError::Protocol("bare LF in RESP line".into()));
            }
            b => line.push(b),
        }
    }
}

/// Reads a line and parses it as a base-10 signed integer.
async fn read_integer_line(input: &mut ReplInput) -> Result<i64, RedsyncError> {
    let line = read_line(input).await?;
    let s = std::str::from_utf8(&line)
        .map_err(|_| RedsyncError::Protocol("non-ASCII integer line".into()))?;
    s.parse::<i64>()
        .map_err(|_| RedsyncError::Protocol(format!("invalid integer line: {s:?}")))
}

/// Parses a value, dispatching on the type prefix. Arrays recurse through a
/// boxed future since the element count is unbounded.
fn parse_value(
    input: &mut ReplInput,
) -> Pin<Box<dyn Future<Output = Result<RespFrame, RedsyncError>> + Send + '_>> {
    Box::pin(async move {
        match input.read_u8().await? {
            b'+' => {
                let line = read_line(input).await?;
                Ok(RespFrame::SimpleString(
                    String::from_utf8_lossy(&line).into_owned(),
                ))
            }
            b'-' => {
                let line = read_line(input).await?;
                Ok(RespFrame::Error(
                    String::from_utf8_lossy(&line).into_owned(),
                ))
            }
            b':' => Ok(RespFrame::Integer(read_integer_line(input).await?)),
            b'$' => {
                let len = read_integer_line(input).await?;
                if len == -1 {
                    return Ok(RespFrame::Null);
                }
                if !(0..=MAX_BULK_STRING_SIZE).contains(&len) {
                    return Err(RedsyncError::Protocol(format!(
                        "bulk length out of range: {len}"
                    )));
                }
                let payload = input.read_exact(len as usize).await?;
                expect_crlf(input).await?;
                Ok(RespFrame::BulkString(payload))
            }
            b'*' => {
                let count = read_integer_line(input).await?;
                if count == -1 {
                    return Ok(RespFrame::NullArray);
                }
                if !(0..=MAX_ARRAY_ELEMENTS).contains(&count) {
                    return Err(RedsyncError::Protocol(format!(
                        "array length out of range: {count}"
                    )));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(parse_value(input).await?);
                }
                Ok(RespFrame::Array(items))
            }
            other => Err(RedsyncError::Protocol(format!(
                "unexpected reply prefix: 0x{other:02x}"
            ))),
        }
    })
}

async fn expect_crlf(input: &mut ReplInput) -> Result<(), RedsyncError> {
    if input.read_u8().await? != b'\r' || input.read_u8().await? != b'\n' {
        return Err(RedsyncError::Protocol(
            "bulk payload not terminated by CRLF".into(),
        ));
    }
    Ok(())
}
