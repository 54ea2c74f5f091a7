// src/core/replication/sync.rs

//! The synchronization state machine: issue PSYNC, dispatch on the reply
//! (full resync, partial resync, not-ready, legacy SYNC), drive the snapshot
//! when one is owed, then process the live command stream while accounting
//! the replication offset.

use crate::core::RedsyncError;
use crate::core::commands::{CommandEvent, CommandName, frame_as_i64, frame_as_text};
use crate::core::events::{Event, EventBus};
use crate::core::io::{CommandWriter, ReplInput};
use crate::core::protocol::{BulkReplyHandler, ReplyParser, RespFrame};
use crate::core::rdb::{DecoderRegistry, RdbParser};
use crate::core::replication::{Replicator, Status};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Length of the delimiter a primary appends after a disk-less snapshot.
const DISKLESS_EOF_MARKER_LEN: u64 = 40;

/// How the primary chose to synchronize us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncMode {
    /// Legacy full synchronization; the primary does not speak PSYNC.
    Sync,
    /// Partial-resync capable stream (with or without a leading snapshot).
    Psync,
    /// The primary cannot serve a sync right now (`NOMASTERLINK`/`LOADING`).
    SyncLater,
}

/// Why a session attempt returned without an error.
pub(crate) enum SessionEnd {
    Finished,
    SyncLater,
}

/// One connection attempt: the I/O endpoints plus the borrowed replicator
/// state the reader is allowed to mutate.
pub(crate) struct Session<'a> {
    pub(crate) replicator: &'a Replicator,
    pub(crate) input: ReplInput,
    pub(crate) writer: Arc<Mutex<CommandWriter>>,
    pub(crate) local_addr: SocketAddr,
}

impl Session<'_> {
    /// Handshake, then synchronize.
    pub(crate) async fn run(&mut self) -> Result<SessionEnd, RedsyncError> {
        self.establish_connection().await?;
        self.synchronize().await
    }

    pub(crate) async fn send_command(
        &self,
        command: &str,
        args: &[&[u8]],
    ) -> Result<(), RedsyncError> {
        self.writer.lock().await.write_command(command, args).await
    }

    pub(crate) async fn read_reply_text(&mut self) -> Result<String, RedsyncError> {
        Ok(ReplyParser::parse(&mut self.input).await?.as_text())
    }

    async fn synchronize(&mut self) -> Result<SessionEnd, RedsyncError> {
        let repl_id = self.replicator.repl_id.lock().unwrap().clone();
        let seed_offset = self.replicator.repl_offset.load(Ordering::SeqCst);
        // A non-negative seed names the last byte we processed; ask for the next one.
        let offset_arg = if seed_offset >= 0 {
            (seed_offset + 1).to_string()
        } else {
            seed_offset.to_string()
        };
        info!("PSYNC {repl_id} {offset_arg}");
        self.send_command("PSYNC", &[repl_id.as_bytes(), offset_arg.as_bytes()])
            .await?;
        let reply = self.read_reply_text().await?;
        let mode = self.try_sync(&reply).await?;

        match mode {
            SyncMode::SyncLater => return Ok(SessionEnd::SyncLater),
            SyncMode::Psync if self.replicator.status() == Status::Connected => {
                self.replicator.start_heartbeat(self.writer.clone());
            }
            _ => {}
        }
        if self.replicator.status() != Status::Connected {
            return Ok(SessionEnd::Finished);
        }

        self.replicator.events.publish(&Event::PreCommandSync);
        let current_db = self.replicator.current_db.load(Ordering::SeqCst);
        if current_db != -1 {
            // Re-announce the selected database so consumers see it even
            // when the resumed stream does not repeat the SELECT.
            let offset = self.replicator.repl_offset.load(Ordering::SeqCst);
            let command = CommandEvent {
                name: CommandName::new("SELECT"),
                args: vec![Bytes::from(current_db.to_string())],
            };
            self.replicator.events.publish(&Event::Command {
                command,
                range: (offset, offset),
            });
        }

        let graceful = self.command_loop(mode).await?;
        if graceful && self.replicator.status() == Status::Connected {
            self.replicator.events.publish(&Event::PostCommandSync);
        }
        Ok(SessionEnd::Finished)
    }

    /// Dispatches on the PSYNC status reply.
    async fn try_sync(&mut self, reply: &str) -> Result<SyncMode, RedsyncError> {
        info!("{reply}");
        if reply.starts_with("FULLRESYNC") {
            let parts: Vec<&str> = reply.split_whitespace().collect();
            if parts.len() != 3 {
                return Err(RedsyncError::Protocol(format!(
                    "invalid FULLRESYNC reply: {reply}"
                )));
            }
            let offset: i64 = parts[2].parse().map_err(|_| {
                RedsyncError::Protocol(format!("invalid offset in FULLRESYNC reply: {reply}"))
            })?;
            self.replicator.current_db.store(-1, Ordering::SeqCst);
            *self.replicator.repl_id.lock().unwrap() = parts[1].to_string();
            self.replicator.repl_offset.store(offset, Ordering::SeqCst);
            self.parse_dump().await?;
            Ok(SyncMode::Psync)
        } else if reply.starts_with("CONTINUE") {
            let parts: Vec<&str> = reply.split_whitespace().collect();
            if parts.len() > 1 {
                // redis-4.0 compatible: a CONTINUE may carry the new repl id.
                let mut repl_id = self.replicator.repl_id.lock().unwrap();
                if *repl_id != parts[1] {
                    *repl_id = parts[1].to_string();
                }
            }
            Ok(SyncMode::Psync)
        } else if reply.starts_with("NOMASTERLINK") || reply.starts_with("LOADING") {
            Ok(SyncMode::SyncLater)
        } else {
            info!("SYNC");
            self.send_command("SYNC", &[]).await?;
            self.replicator.current_db.store(-1, Ordering::SeqCst);
            self.parse_dump().await?;
            Ok(SyncMode::Sync)
        }
    }

    /// Consumes the snapshot bulk through the streaming bulk handler.
    async fn parse_dump(&mut self) -> Result<(), RedsyncError> {
        let mut handler = DumpHandler {
            events: &self.replicator.events,
            decoders: &self.replicator.rdb_decoders,
            discard_rdb_event: self.replicator.config.discard_rdb_event,
        };
        let raw = ReplyParser::parse_bulk_with(&mut self.input, &mut handler).await?;
        let reply = String::from_utf8_lossy(&raw);
        if reply == "OK" {
            return Ok(());
        }
        Err(RedsyncError::SyncFailed(reply.into_owned()))
    }

    /// The live stream: one top-level RESP array per replicated command.
    /// Returns whether the loop ended without an error or a close request.
    async fn command_loop(&mut self, mode: SyncMode) -> Result<bool, RedsyncError> {
        info!("now processing the command stream from the primary.");
        while self.replicator.status() == Status::Connected {
            let (frame, len) = ReplyParser::parse_counted(&mut self.input).await?;
            let frame_len = len as i64;
            let offset = &self.replicator.repl_offset;
            match &frame {
                RespFrame::Array(items) if !items.is_empty() => {
                    if self.replicator.config.verbose {
                        debug!("stream command: {}", frame.as_text());
                    }
                    let name = CommandName::new(frame_as_text(&items[0])?);
                    let Some(parser) = self.replicator.registry.get(&name) else {
                        warn!(
                            "command [{name}] not registered. raw command: {}",
                            frame.as_text()
                        );
                        offset.fetch_add(frame_len, Ordering::SeqCst);
                        continue;
                    };
                    let start = offset.load(Ordering::SeqCst);
                    let end = start + frame_len;
                    if name.as_str() == "SELECT" {
                        let index = items.get(1).ok_or_else(|| {
                            RedsyncError::Protocol("SELECT without an index".into())
                        })?;
                        self.replicator
                            .current_db
                            .store(frame_as_i64(index)?, Ordering::SeqCst);
                        let command = parser.parse(items)?;
                        self.replicator.events.publish(&Event::Command {
                            command,
                            range: (start, end),
                        });
                    } else if name.as_str() == "REPLCONF" && is_getack(items) {
                        // An on-demand offset probe: answered out of band,
                        // never dispatched as a command event.
                        if mode == SyncMode::Psync {
                            self.spawn_ack(start);
                        }
                    } else {
                        // Includes the periodic PING the primary injects.
                        let command = parser.parse(items)?;
                        self.replicator.events.publish(&Event::Command {
                            command,
                            range: (start, end),
                        });
                    }
                    offset.fetch_add(frame_len, Ordering::SeqCst);
                }
                other => {
                    warn!("unexpected redis reply: {}", other.as_text());
                    offset.fetch_add(frame_len, Ordering::SeqCst);
                }
            }
        }
        Ok(true)
    }

    /// Answers a GETACK with the offset as of the probe frame, best-effort.
    fn spawn_ack(&self, offset: i64) {
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let offset = offset.to_string();
            writer
                .lock()
                .await
                .write_command_quietly("REPLCONF", &[b"ACK", offset.as_bytes()])
                .await;
        });
    }
}

fn is_getack(items: &[RespFrame]) -> bool {
    items
        .get(1)
        .and_then(|f| frame_as_text(f).ok())
        .is_some_and(|s| s.eq_ignore_ascii_case("GETACK"))
}

/// Consumes the snapshot payload as it streams in.
struct DumpHandler<'a> {
    events: &'a EventBus,
    decoders: &'a DecoderRegistry,
    discard_rdb_event: bool,
}

#[async_trait]
impl BulkReplyHandler for DumpHandler<'_> {
    async fn handle(&mut self, len: i64, input: &mut ReplInput) -> Result<Bytes, RedsyncError> {
        if len != -1 {
            info!("RDB dump file size: {len}");
        } else {
            info!("disk-less replication.");
        }
        if len != -1 && self.discard_rdb_event {
            info!("discard {len} bytes");
            input.skip(len as u64, true).await?;
        } else {
            RdbParser::new(self.events, self.decoders).parse(input).await?;
            if len == -1 {
                // The disk-less delimiter is not part of the replication
                // stream and must never reach the offset accounting.
                input.skip(DISKLESS_EOF_MARKER_LEN, false).await?;
            }
        }
        Ok(Bytes::from_static(b"OK"))
    }
}
