// src/core/rdb/mod.rs

//! Drives the RDB snapshot stream that a full resynchronization carries.
//!
//! The parser walks the opcode stream (database selectors, expiries, aux
//! fields, value records) and emits one [`SnapshotEntry`] per key through the
//! event bus as it is decoded; the snapshot is never buffered whole. The base
//! container types are decoded here; any other value type code is looked up
//! in the [`DecoderRegistry`] so callers can plug in decoders for the long
//! tail of listpack/ziplist/module encodings.

pub mod codec;

use crate::core::RedsyncError;
use crate::core::events::{Event, EventBus};
use crate::core::io::ReplInput;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

const RDB_MAGIC: &[u8] = b"REDIS";

// Opcodes interleaved with value records in the snapshot stream.
const RDB_OPCODE_IDLE: u8 = 0xF8;
const RDB_OPCODE_FREQ: u8 = 0xF9;
const RDB_OPCODE_AUX: u8 = 0xFA;
const RDB_OPCODE_RESIZEDB: u8 = 0xFB;
const RDB_OPCODE_EXPIRETIME_MS: u8 = 0xFC;
const RDB_OPCODE_EXPIRETIME: u8 = 0xFD;
const RDB_OPCODE_SELECTDB: u8 = 0xFE;
const RDB_OPCODE_EOF: u8 = 0xFF;

// The value type codes decoded natively.
const RDB_TYPE_STRING: u8 = 0;
const RDB_TYPE_LIST: u8 = 1;
const RDB_TYPE_SET: u8 = 2;
const RDB_TYPE_ZSET: u8 = 3;
const RDB_TYPE_HASH: u8 = 4;
const RDB_TYPE_ZSET_2: u8 = 5;

// RDB versions from this one on carry a CRC64 trailer.
const RDB_VERSION_WITH_CHECKSUM: u32 = 5;

/// A decoded snapshot value.
#[derive(Debug, Clone, PartialEq)]
pub enum RdbValue {
    String(Bytes),
    List(Vec<Bytes>),
    Set(Vec<Bytes>),
    Hash(Vec<(Bytes, Bytes)>),
    SortedSet(Vec<(Bytes, f64)>),
}

/// One key decoded out of the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    /// The logical database the key lives in.
    pub db: i64,
    pub key: Bytes,
    pub value: RdbValue,
    /// Absolute expiry in milliseconds since the epoch, if the key carries one.
    pub expire_at_ms: Option<u64>,
}

/// Decodes one snapshot value for a type code this crate does not decode
/// natively. Implementations must consume exactly the value's bytes.
#[async_trait]
pub trait RdbValueDecoder: Send + Sync {
    async fn decode(
        &self,
        type_code: u8,
        input: &mut ReplInput,
    ) -> Result<RdbValue, RedsyncError>;
}

/// Registry of pluggable value decoders, keyed by RDB type code.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: DashMap<u8, Arc<dyn RdbValueDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a decoder for `type_code`, replacing any previous one.
    pub fn register(&self, type_code: u8, decoder: Arc<dyn RdbValueDecoder>) {
        self.decoders.insert(type_code, decoder);
    }

    fn get(&self, type_code: u8) -> Option<Arc<dyn RdbValueDecoder>> {
        self.decoders.get(&type_code).map(|d| d.value().clone())
    }
}

/// Walks one snapshot stream, emitting entries through the event bus.
pub struct RdbParser<'a> {
    events: &'a EventBus,
    decoders: &'a DecoderRegistry,
}

impl<'a> RdbParser<'a> {
    pub fn new(events: &'a EventBus, decoders: &'a DecoderRegistry) -> Self {
        Self { events, decoders }
    }

    pub async fn parse(&mut self, input: &mut ReplInput) -> Result<(), RedsyncError> {
        input.begin_checksum();

        let magic = input.read_exact(RDB_MAGIC.len()).await?;
        if &magic[..] != RDB_MAGIC {
            return Err(RedsyncError::Protocol("missing RDB magic".into()));
        }
        let version_raw = input.read_exact(4).await?;
        let version: u32 = std::str::from_utf8(&version_raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RedsyncError::Protocol("invalid RDB version field".into()))?;
        info!("RDB version: {version}");

        let mut current_db: i64 = 0;
        let mut pending_expiry: Option<u64> = None;

        loop {
            let opcode = input.read_u8().await?;
            match opcode {
                RDB_OPCODE_EOF => {
                    // The digest covers everything up to and including the
                    // EOF opcode; the trailer itself is excluded.
                    let computed = input.finish_checksum();
                    if version >= RDB_VERSION_WITH_CHECKSUM {
                        let raw = input.read_exact(8).await?;
                        let stored = u64::from_le_bytes(raw[..].try_into().unwrap());
                        // A zero trailer means checksumming was disabled on the primary.
                        if stored != 0 && stored != computed {
                            return Err(RedsyncError::SyncFailed(format!(
                                "RDB checksum mismatch: stored {stored:#x}, computed {computed:#x}"
                            )));
                        }
                    }
                    return Ok(());
                }
                RDB_OPCODE_SELECTDB => {
                    current_db = codec::read_length(input).await? as i64;
                    debug!("RDB select db {current_db}");
                }
                RDB_OPCODE_RESIZEDB => {
                    let hash_size = codec::read_length(input).await?;
                    let expire_size = codec::read_length(input).await?;
                    debug!("RDB resize db: {hash_size} keys, {expire_size} expiring");
                }
                RDB_OPCODE_AUX => {
                    let key = codec::read_string(input).await?;
                    let value = codec::read_string(input).await?;
                    info!(
                        "RDB aux field {}={}",
                        String::from_utf8_lossy(&key),
                        String::from_utf8_lossy(&value)
                    );
                }
                RDB_OPCODE_EXPIRETIME_MS => {
                    let raw = input.read_exact(8).await?;
                    pending_expiry = Some(u64::from_le_bytes(raw[..].try_into().unwrap()));
                }
                RDB_OPCODE_EXPIRETIME => {
                    let raw = input.read_exact(4).await?;
                    let secs = u32::from_le_bytes(raw[..].try_into().unwrap());
                    pending_expiry = Some(secs as u64 * 1000);
                }
                RDB_OPCODE_IDLE => {
                    codec::read_length(input).await?;
                }
                RDB_OPCODE_FREQ => {
                    input.read_u8().await?;
                }
                type_code => {
                    let key = codec::read_string(input).await?;
                    let value = self.decode_value(type_code, input).await?;
                    let entry = SnapshotEntry {
                        db: current_db,
                        key,
                        value,
                        expire_at_ms: pending_expiry.take(),
                    };
                    self.events.publish(&Event::SnapshotEntry(entry));
                }
            }
        }
    }

    async fn decode_value(
        &self,
        type_code: u8,
        input: &mut ReplInput,
    ) -> Result<RdbValue, RedsyncError> {
        match type_code {
            RDB_TYPE_STRING => Ok(RdbValue::String(codec::read_string(input).await?)),
            RDB_TYPE_LIST | RDB_TYPE_SET => {
                let len = codec::read_length(input).await?;
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(codec::read_string(input).await?);
                }
                if type_code == RDB_TYPE_LIST {
                    Ok(RdbValue::List(items))
                } else {
                    Ok(RdbValue::Set(items))
                }
            }
            RDB_TYPE_HASH => {
                let len = codec::read_length(input).await?;
                let mut pairs = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    let field = codec::read_string(input).await?;
                    let value = codec::read_string(input).await?;
                    pairs.push((field, value));
                }
                Ok(RdbValue::Hash(pairs))
            }
            RDB_TYPE_ZSET | RDB_TYPE_ZSET_2 => {
                let len = codec::read_length(input).await?;
                let mut members = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    let member = codec::read_string(input).await?;
                    let score = if type_code == RDB_TYPE_ZSET_2 {
                        codec::read_binary_double(input).await?
                    } else {
                        codec::read_double(input).await?
                    };
                    members.push((member, score));
                }
                Ok(RdbValue::SortedSet(members))
            }
            other => match self.decoders.get(other) {
                Some(decoder) => decoder.decode(other, input).await,
                None => Err(RedsyncError::Protocol(format!(
                    "unsupported RDB value type: {other}"
                ))),
            },
        }
    }
}
