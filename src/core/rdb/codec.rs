// src/core/rdb/codec.rs

//! Primitive decoders for the RDB byte format: length encodings, string
//! encodings (raw, integer, LZF-compressed), and the two double formats.
//!
//! These are public so that external [`super::RdbValueDecoder`]s can reuse
//! them for the value type codes this crate does not decode itself.

use crate::core::RedsyncError;
use crate::core::io::ReplInput;
use bytes::Bytes;

const LEN_6BIT: u8 = 0b00;
const LEN_14BIT: u8 = 0b01;
const LEN_32BIT: u8 = 0x80;
const LEN_64BIT: u8 = 0x81;
const LEN_ENCODED: u8 = 0b11;

pub const ENC_INT8: u8 = 0;
pub const ENC_INT16: u8 = 1;
pub const ENC_INT32: u8 = 2;
pub const ENC_LZF: u8 = 3;

/// The result of reading a length prefix: either an actual length or a
/// special string-encoding discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdbLength {
    Len(u64),
    Encoded(u8),
}

pub async fn read_length_kind(input: &mut ReplInput) -> Result<RdbLength, RedsyncError> {
    let first = input.read_u8().await?;
    match first >> 6 {
        LEN_6BIT => Ok(RdbLength::Len((first & 0x3F) as u64)),
        LEN_14BIT => {
            let second = input.read_u8().await?;
            Ok(RdbLength::Len((((first & 0x3F) as u64) << 8) | second as u64))
        }
        LEN_ENCODED => Ok(RdbLength::Encoded(first & 0x3F)),
        _ => match first {
            LEN_32BIT => {
                let raw = input.read_exact(4).await?;
                Ok(RdbLength::Len(
                    u32::from_be_bytes(raw[..].try_into().unwrap()) as u64,
                ))
            }
            LEN_64BIT => {
                let raw = input.read_exact(8).await?;
                Ok(RdbLength::Len(u64::from_be_bytes(
                    raw[..].try_into().unwrap(),
                )))
            }
            other => Err(RedsyncError::Protocol(format!(
                "invalid RDB length prefix: 0x{other:02x}"
            ))),
        },
    }
}

/// Reads a plain length; a string-encoding discriminator here is malformed.
pub async fn read_length(input: &mut ReplInput) -> Result<u64, RedsyncError> {
    match read_length_kind(input).await? {
        RdbLength::Len(n) => Ok(n),
        RdbLength::Encoded(e) => Err(RedsyncError::Protocol(format!(
            "expected RDB length, got string encoding {e}"
        ))),
    }
}

/// Reads an RDB string: raw bytes, an integer rendered back to its decimal
/// form, or an LZF-compressed blob.
pub async fn read_string(input: &mut ReplInput) -> Result<Bytes, RedsyncError> {
    match read_length_kind(input).await? {
        RdbLength::Len(n) => input.read_exact(n as usize).await,
        RdbLength::Encoded(ENC_INT8) => {
            let raw = input.read_exact(1).await?;
            Ok(Bytes::from((raw[0] as i8).to_string()))
        }
        RdbLength::Encoded(ENC_INT16) => {
            let raw = input.read_exact(2).await?;
            let v = i16::from_le_bytes(raw[..].try_into().unwrap());
            Ok(Bytes::from(v.to_string()))
        }
        RdbLength::Encoded(ENC_INT32) => {
            let raw = input.read_exact(4).await?;
            let v = i32::from_le_bytes(raw[..].try_into().unwrap());
            Ok(Bytes::from(v.to_string()))
        }
        RdbLength::Encoded(ENC_LZF) => {
            let compressed_len = read_length(input).await?;
            let uncompressed_len = read_length(input).await?;
            let compressed = input.read_exact(compressed_len as usize).await?;
            let out = lzf_decompress(&compressed, uncompressed_len as usize)?;
            Ok(Bytes::from(out))
        }
        RdbLength::Encoded(other) => Err(RedsyncError::Protocol(format!(
            "unknown RDB string encoding: {other}"
        ))),
    }
}

/// Reads the legacy sorted-set score format: a length-prefixed decimal
/// rendering, with single-byte sentinels for the non-finite values.
pub async fn read_double(input: &mut ReplInput) -> Result<f64, RedsyncError> {
    let len = input.read_u8().await?;
    match len {
        255 => Ok(f64::NEG_INFINITY),
        254 => Ok(f64::INFINITY),
        253 => Ok(f64::NAN),
        _ => {
            let raw = input.read_exact(len as usize).await?;
            let s = std::str::from_utf8(&raw)
                .map_err(|_| RedsyncError::Protocol("non-ASCII double".into()))?;
            s.parse::<f64>()
                .map_err(|_| RedsyncError::Protocol(format!("invalid double: {s:?}")))
        }
    }
}

/// Reads the binary sorted-set score format (ZSET_2): a little-endian f64.
pub async fn read_binary_double(input: &mut ReplInput) -> Result<f64, RedsyncError> {
    let raw = input.read_exact(8).await?;
    Ok(f64::from_le_bytes(raw[..].try_into().unwrap()))
}

/// Decompresses an LZF block into exactly `expected_len` bytes.
pub fn lzf_decompress(src: &[u8], expected_len: usize) -> Result<Vec<u8>, RedsyncError> {
    let malformed = || RedsyncError::Protocol("malformed LZF block".into());
    let mut out = Vec::with_capacity(expected_len);
    let mut i = 0;
    while i < src.len() {
        let ctrl = src[i] as usize;
        i += 1;
        if ctrl < 32 {
            // Literal run of ctrl + 1 bytes.
            let run = ctrl + 1;
            if i + run > src.len() {
                return Err(malformed());
            }
            out.extend_from_slice(&src[i..i + run]);
            i += run;
        } else {
            // Back-reference of length (ctrl >> 5) + 2, extended by one byte
            // when the 3-bit length field saturates.
            let mut run = ctrl >> 5;
            if run == 7 {
                run += *src.get(i).ok_or_else(malformed)? as usize;
                i += 1;
            }
            let low = *src.get(i).ok_or_else(malformed)? as usize;
            i += 1;
            let distance = ((ctrl & 0x1F) << 8) | low;
            if distance + 1 > out.len() {
                return Err(malformed());
            }
            let mut pos = out.len() - distance - 1;
            for _ in 0..run + 2 {
                out.push(out[pos]);
                pos += 1;
            }
        }
    }
    if out.len() != expected_len {
        return Err(RedsyncError::Protocol(format!(
            "LZF length mismatch: expected {expected_len}, got {}",
            out.len()
        )));
    }
    Ok(out)
}
