// src/core/errors.rs

//! Defines the primary error type for the crate.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures while replicating
/// from a primary. Using `thiserror` allows for clean error definitions and
/// automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum RedsyncError {
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// A malformed RESP frame or an unexpected byte where a framing byte was required.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A handshake reply that is neither accepted nor explicitly tolerated.
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// A fatal authentication rejection from the primary.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The snapshot transfer completed with a non-OK sentinel.
    #[error("SYNC failed. reason : [{0}]")]
    SyncFailed(String),

    #[error("Replication error: {0}")]
    Replication(String),

    /// The primary closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// The session was closed deliberately by the caller.
    #[error("Operation cancelled")]
    Cancelled,
}

impl RedsyncError {
    /// Fatal errors stop the retrier; everything else triggers a reconnect
    /// that preserves the `(repl_id, repl_offset)` pair.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RedsyncError::Auth(_))
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for RedsyncError {
    fn clone(&self) -> Self {
        match self {
            RedsyncError::Io(e) => RedsyncError::Io(Arc::clone(e)),
            RedsyncError::Protocol(s) => RedsyncError::Protocol(s.clone()),
            RedsyncError::Handshake(s) => RedsyncError::Handshake(s.clone()),
            RedsyncError::Auth(s) => RedsyncError::Auth(s.clone()),
            RedsyncError::SyncFailed(s) => RedsyncError::SyncFailed(s.clone()),
            RedsyncError::Replication(s) => RedsyncError::Replication(s.clone()),
            RedsyncError::ConnectionClosed => RedsyncError::ConnectionClosed,
            RedsyncError::Cancelled => RedsyncError::Cancelled,
        }
    }
}

impl From<std::io::Error> for RedsyncError {
    fn from(e: std::io::Error) -> Self {
        RedsyncError::Io(Arc::new(e))
    }
}

impl From<std::num::ParseIntError> for RedsyncError {
    fn from(e: std::num::ParseIntError) -> Self {
        RedsyncError::Protocol(format!("invalid integer: {e}"))
    }
}
