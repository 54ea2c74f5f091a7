// src/core/replication/heartbeat.rs

//! The periodic replication acknowledgement.
//!
//! One task per session reports the current replication offset back to the
//! primary with `REPLCONF ACK`. Ticks are fixed-delay, writes are
//! best-effort: a transport fault here is also visible to the reader, which
//! owns error reporting.

use crate::core::io::CommandWriter;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

pub(crate) async fn run(
    period: Duration,
    writer: Arc<Mutex<CommandWriter>>,
    offset: Arc<AtomicI64>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let ack_offset = offset.load(Ordering::SeqCst).to_string();
                writer
                    .lock()
                    .await
                    .write_command_quietly("REPLCONF", &[b"ACK", ack_offset.as_bytes()])
                    .await;
                debug!("sent ACK with offset {ack_offset}");
            }
        }
    }
}
