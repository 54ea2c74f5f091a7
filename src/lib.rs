// src/lib.rs

pub mod config;
pub mod core;

// Re-export
pub use crate::config::{Config, ReplFilter};
pub use crate::core::RedsyncError;
pub use crate::core::events::{Event, EventListener, ExceptionListener, RawByteListener};
pub use crate::core::replication::{Replicator, Status};
