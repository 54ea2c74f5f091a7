// src/core/io/mod.rs

//! Wire I/O for the replication connection.
//!
//! The read side layers, innermost first: the socket's read half, an optional
//! async prefetch buffer, and the buffered [`ReplInput`] with its raw-byte
//! tap, token-bucket throttle, and offset-mark accounting. The write side is
//! a [`CommandWriter`] shared behind a mutex so that one framed command is
//! never interleaved with another.

pub mod input;
pub mod output;
pub mod prefetch;
pub mod rate_limit;

pub use input::ReplInput;
pub use output::CommandWriter;
pub use prefetch::PrefetchReader;
pub use rate_limit::TokenBucket;
