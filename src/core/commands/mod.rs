// src/core/commands/mod.rs

//! Command names, parsers, and the registry that maps one to the other.
//!
//! Every command the primary replays arrives as a RESP array whose first
//! element names the command. The registry resolves that name (normalized,
//! case-insensitive) to a [`CommandParser`] that turns the raw array into a
//! typed [`CommandEvent`]. The standard replicated-write vocabulary is
//! pre-registered with the generic parser; `register` is the extension point
//! for new or custom commands.

use crate::core::RedsyncError;
use crate::core::protocol::RespFrame;
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// A normalized (uppercase) command name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandName(String);

impl CommandName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed command from the replication stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEvent {
    pub name: CommandName,
    pub args: Vec<Bytes>,
}

/// Turns the raw RESP array of a streamed command into a typed event.
pub trait CommandParser: Send + Sync {
    fn parse(&self, raw: &[RespFrame]) -> Result<CommandEvent, RedsyncError>;
}

/// The default parser: keeps the command name and its arguments as raw bytes.
pub struct GenericCommandParser;

impl CommandParser for GenericCommandParser {
    fn parse(&self, raw: &[RespFrame]) -> Result<CommandEvent, RedsyncError> {
        let name = CommandName::new(frame_as_text(raw.first().ok_or_else(|| {
            RedsyncError::Protocol("empty command array".into())
        })?)?);
        let mut args = Vec::with_capacity(raw.len().saturating_sub(1));
        for frame in &raw[1..] {
            args.push(frame_as_bytes(frame)?);
        }
        Ok(CommandEvent { name, args })
    }
}

/// Extracts a command-name or argument string from a frame.
pub fn frame_as_text(frame: &RespFrame) -> Result<String, RedsyncError> {
    match frame {
        RespFrame::BulkString(b) => Ok(String::from_utf8_lossy(b).into_owned()),
        RespFrame::SimpleString(s) => Ok(s.clone()),
        RespFrame::Integer(i) => Ok(i.to_string()),
        other => Err(RedsyncError::Protocol(format!(
            "expected string element in command array, got {other:?}"
        ))),
    }
}

/// Extracts an argument as raw bytes.
pub fn frame_as_bytes(frame: &RespFrame) -> Result<Bytes, RedsyncError> {
    match frame {
        RespFrame::BulkString(b) => Ok(b.clone()),
        RespFrame::SimpleString(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
        RespFrame::Integer(i) => Ok(Bytes::from(i.to_string())),
        other => Err(RedsyncError::Protocol(format!(
            "expected string element in command array, got {other:?}"
        ))),
    }
}

/// Parses an argument as a signed integer (e.g. the SELECT index).
pub fn frame_as_i64(frame: &RespFrame) -> Result<i64, RedsyncError> {
    match frame {
        RespFrame::Integer(i) => Ok(*i),
        _ => {
            let text = frame_as_text(frame)?;
            text.parse::<i64>()
                .map_err(|_| RedsyncError::Protocol(format!("expected integer, got {text:?}")))
        }
    }
}

/// The write-command vocabulary a primary replays to its replicas.
const BUILTIN_COMMANDS: &[&str] = &[
    "APPEND", "BITFIELD", "BITOP", "COPY", "DECR", "DECRBY", "DEL", "EXEC", "EXPIRE", "EXPIREAT",
    "FLUSHALL", "FLUSHDB", "GEOADD", "GETDEL", "GETEX", "GETSET", "HDEL", "HINCRBY",
    "HINCRBYFLOAT", "HMSET", "HSET", "HSETNX", "INCR", "INCRBY", "INCRBYFLOAT", "LINSERT", "LMOVE",
    "LPOP", "LPUSH", "LPUSHX", "LREM", "LSET", "LTRIM", "MOVE", "MSET", "MSETNX", "MULTI",
    "PERSIST", "PEXPIRE", "PEXPIREAT", "PFADD", "PFCOUNT", "PFMERGE", "PING", "PSETEX", "PUBLISH",
    "RENAME", "RENAMENX", "REPLCONF", "RESTORE", "RPOP", "RPOPLPUSH", "RPUSH", "RPUSHX", "SADD",
    "SDIFFSTORE", "SELECT", "SET", "SETBIT", "SETEX", "SETNX", "SETRANGE", "SINTERSTORE", "SMOVE",
    "SPOP", "SREM", "SUNIONSTORE", "SWAPDB", "UNLINK", "XACK", "XADD", "XCLAIM", "XDEL", "XGROUP",
    "XSETID", "XTRIM", "ZADD", "ZINCRBY", "ZPOPMAX", "ZPOPMIN", "ZREM", "ZREMRANGEBYLEX",
    "ZREMRANGEBYRANK", "ZREMRANGEBYSCORE",
];

/// Maps command names to their parsers.
pub struct CommandRegistry {
    parsers: DashMap<CommandName, Arc<dyn CommandParser>>,
}

impl CommandRegistry {
    /// Creates a registry pre-loaded with the builtin vocabulary.
    pub fn with_builtins() -> Self {
        let registry = Self {
            parsers: DashMap::new(),
        };
        let generic: Arc<dyn CommandParser> = Arc::new(GenericCommandParser);
        for name in BUILTIN_COMMANDS {
            registry.parsers.insert(CommandName::new(name), generic.clone());
        }
        registry
    }

    /// Registers a parser for `name`, replacing any previous registration.
    pub fn register(&self, name: impl AsRef<str>, parser: Arc<dyn CommandParser>) {
        self.parsers.insert(CommandName::new(name), parser);
    }

    pub fn get(&self, name: &CommandName) -> Option<Arc<dyn CommandParser>> {
        self.parsers.get(name).map(|p| p.value().clone())
    }
}
