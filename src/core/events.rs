// src/core/events.rs

//! Defines the event types surfaced to consumers and the bus that fans them
//! out to registered listeners.
//!
//! The bus invokes listeners synchronously from the reader, so for one session
//! callbacks observe events in exact wire order: snapshot entries first, then
//! `PreCommandSync`, then streamed commands, then (on an orderly termination)
//! `PostCommandSync`.

use crate::core::RedsyncError;
use crate::core::commands::CommandEvent;
use crate::core::rdb::SnapshotEntry;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::error;

/// An event delivered to registered [`EventListener`]s.
#[derive(Debug, Clone)]
pub enum Event {
    /// The snapshot phase (if any) is complete; streamed commands follow.
    PreCommandSync,
    /// The command stream ended while the session was still connected.
    PostCommandSync,
    /// One key decoded out of the snapshot.
    SnapshotEntry(SnapshotEntry),
    /// One command from the live replication stream. `range` is the
    /// half-open replication-offset interval `(start, end)` the frame
    /// occupies in the primary's backlog.
    Command {
        command: CommandEvent,
        range: (i64, i64),
    },
}

/// Receives replication events in wire order.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Receives non-recoverable errors surfaced by the reader before the retrier
/// acts on them.
pub trait ExceptionListener: Send + Sync {
    fn on_exception(&self, err: &RedsyncError);
}

/// Observes every byte read from the socket, before any higher layer
/// consumes it.
pub trait RawByteListener: Send + Sync {
    fn on_bytes(&self, bytes: &[u8]);
}

/// The `EventBus` is the distribution hub between the reader and the
/// registered listeners. Registration is FIFO and deduplicated by `Arc`
/// identity, so re-registering a listener keeps its original position.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    exception_listeners: RwLock<Vec<Arc<dyn ExceptionListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event listener. Returns `false` if this exact listener
    /// is already registered.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Removes a previously registered listener, matched by identity.
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn add_exception_listener(&self, listener: Arc<dyn ExceptionListener>) -> bool {
        let mut listeners = self.exception_listeners.write();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Delivers an event to every listener, in registration order.
    pub fn publish(&self, event: &Event) {
        // Snapshot the registration list so a listener may (de)register
        // from within its own callback.
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_event(event);
        }
    }

    /// Reports a non-recoverable error to the exception listeners.
    pub fn report_exception(&self, err: &RedsyncError) {
        let listeners = self.exception_listeners.read().clone();
        for listener in &listeners {
            listener.on_exception(err);
        }
    }
}

/// A logger-backed exception listener, auto-registered when
/// `use_default_exception_listener` is set.
pub struct DefaultExceptionListener;

impl ExceptionListener for DefaultExceptionListener {
    fn on_exception(&self, err: &RedsyncError) {
        error!("replication error: {err}");
    }
}
