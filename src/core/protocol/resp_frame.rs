// src/core/protocol/resp_frame.rs

//! The RESP frame structure and its encoder.
//!
//! Decoding is handled by the streaming [`super::ReplyParser`], which works
//! against the buffered replication input rather than an in-memory slice.

use bytes::{BufMut, Bytes, BytesMut};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
pub(crate) const CRLF: &[u8] = b"\r\n";

/// An enum representing a single frame in the RESP protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Encodes this frame into `dst` according to the RESP specification.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            RespFrame::SimpleString(s) => {
                dst.put_u8(b'+');
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.put_u8(b'-');
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.put_u8(b':');
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.put_u8(b'$');
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
            RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
            RespFrame::Array(arr) => {
                dst.put_u8(b'*');
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    // Recursively encode each frame in the array.
                    frame.encode(dst);
                }
            }
        }
    }

    /// A convenience method to encode a frame into a `Vec<u8>`.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Builds the frame for an outbound command: a RESP array of bulk strings.
    pub fn command(command: &str, args: &[&[u8]]) -> RespFrame {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(RespFrame::BulkString(Bytes::copy_from_slice(
            command.as_bytes(),
        )));
        for arg in args {
            items.push(RespFrame::BulkString(Bytes::copy_from_slice(arg)));
        }
        RespFrame::Array(items)
    }

    /// A lossy textual rendering of the frame, used for reply inspection
    /// during the handshake and for log lines.
    pub fn as_text(&self) -> String {
        match self {
            RespFrame::SimpleString(s) | RespFrame::Error(s) => s.clone(),
            RespFrame::Integer(i) => i.to_string(),
            RespFrame::BulkString(b) => String::from_utf8_lossy(b).into_owned(),
            RespFrame::Null | RespFrame::NullArray => String::new(),
            RespFrame::Array(arr) => arr
                .iter()
                .map(RespFrame::as_text)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Returns the payload of a bulk string frame.
    pub fn bulk(&self) -> Option<&Bytes> {
        match self {
            RespFrame::BulkString(b) => Some(b),
            _ => None,
        }
    }
}
