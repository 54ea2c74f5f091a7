// src/config.rs

//! Replication client configuration: loading, defaults, and validation.

use crate::core::events::EventListener;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::sync::Arc;

/// A capability advertisement sent during the handshake: the literal command
/// sequence (e.g. `["REPLCONF", "rfilter", "user:*"]`) plus an optional
/// listener that the primary's acceptance authorizes.
#[derive(Clone, Default)]
pub struct ReplFilter {
    pub command: Vec<String>,
    pub listener: Option<Arc<dyn EventListener>>,
}

impl ReplFilter {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            listener: None,
        }
    }

    pub fn with_listener(command: Vec<String>, listener: Arc<dyn EventListener>) -> Self {
        Self {
            command,
            listener: Some(listener),
        }
    }
}

impl fmt::Debug for ReplFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplFilter")
            .field("command", &self.command)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Immutable configuration for a replication session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on socket establishment, in milliseconds.
    pub connect_timeout_ms: u64,
    /// AUTH username; `None` selects the single-argument AUTH form.
    pub auth_user: Option<String>,
    /// AUTH password; `None` disables authentication entirely.
    pub auth_password: Option<String>,
    /// Interval between `REPLCONF ACK` heartbeats, in milliseconds.
    pub heartbeat_period_ms: u64,
    /// Read/write buffer size in bytes.
    pub buffer_size: usize,
    /// Async read-ahead budget in bytes; `0` disables the prefetch task.
    pub async_cached_bytes: usize,
    /// Read rate cap in bytes per second; `0` disables the limiter.
    pub rate_limit: u64,
    /// The port advertised via `REPLCONF listening-port`; `0` advertises the
    /// local socket port.
    pub listening_port: u16,
    /// Replication filters sent at the end of the handshake, in order.
    pub repl_filters: Vec<ReplFilter>,
    /// The replication id seed; `?` requests a full resynchronization.
    pub repl_id: String,
    /// The replication offset seed; `-1` means "no prior state".
    pub repl_offset: i64,
    /// Skip sized snapshot payloads without decoding them.
    pub discard_rdb_event: bool,
    /// Auto-register a logger-backed exception listener.
    pub use_default_exception_listener: bool,
    /// Trace every streamed command at debug level.
    pub verbose: bool,
    /// Reconnect attempts before giving up; `0` retries forever.
    pub retries: u32,
    /// Delay between reconnect attempts, in milliseconds.
    pub retry_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            auth_user: None,
            auth_password: None,
            heartbeat_period_ms: default_heartbeat_period_ms(),
            buffer_size: default_buffer_size(),
            async_cached_bytes: default_async_cached_bytes(),
            rate_limit: 0,
            listening_port: 0,
            repl_filters: Vec::new(),
            repl_id: default_repl_id(),
            repl_offset: default_repl_offset(),
            discard_rdb_event: false,
            use_default_exception_listener: false,
            verbose: false,
            retries: default_retries(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

/// A raw representation of the config file before validation. Filters carry
/// listeners and are attached programmatically, not via the file.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
    #[serde(default)]
    auth_user: Option<String>,
    #[serde(default)]
    auth_password: Option<String>,
    #[serde(default = "default_heartbeat_period_ms")]
    heartbeat_period_ms: u64,
    #[serde(default = "default_buffer_size")]
    buffer_size: usize,
    #[serde(default = "default_async_cached_bytes")]
    async_cached_bytes: usize,
    #[serde(default)]
    rate_limit: u64,
    #[serde(default)]
    listening_port: u16,
    #[serde(default = "default_repl_id")]
    repl_id: String,
    #[serde(default = "default_repl_offset")]
    repl_offset: i64,
    #[serde(default)]
    discard_rdb_event: bool,
    #[serde(default)]
    use_default_exception_listener: bool,
    #[serde(default)]
    verbose: bool,
    #[serde(default = "default_retries")]
    retries: u32,
    #[serde(default = "default_retry_interval_ms")]
    retry_interval_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_heartbeat_period_ms() -> u64 {
    1_000
}
fn default_buffer_size() -> usize {
    8 * 1024
}
fn default_async_cached_bytes() -> usize {
    512 * 1024
}
fn default_repl_id() -> String {
    "?".to_string()
}
fn default_repl_offset() -> i64 {
    -1
}
fn default_retries() -> u32 {
    5
}
fn default_retry_interval_ms() -> u64 {
    1_000
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            connect_timeout_ms: raw.connect_timeout_ms,
            auth_user: raw.auth_user,
            auth_password: raw.auth_password,
            heartbeat_period_ms: raw.heartbeat_period_ms,
            buffer_size: raw.buffer_size,
            async_cached_bytes: raw.async_cached_bytes,
            rate_limit: raw.rate_limit,
            listening_port: raw.listening_port,
            repl_filters: Vec::new(),
            repl_id: raw.repl_id,
            repl_offset: raw.repl_offset,
            discard_rdb_event: raw.discard_rdb_event,
            use_default_exception_listener: raw.use_default_exception_listener,
            verbose: raw.verbose,
            retries: raw.retries,
            retry_interval_ms: raw.retry_interval_ms,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            bail!("buffer_size must be greater than zero");
        }
        if self.heartbeat_period_ms == 0 {
            bail!("heartbeat_period_ms must be greater than zero");
        }
        if self.connect_timeout_ms == 0 {
            bail!("connect_timeout_ms must be greater than zero");
        }
        if self.repl_offset < -1 {
            bail!("repl_offset must be -1 or a non-negative offset");
        }
        Ok(())
    }
}
