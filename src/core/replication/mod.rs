// src/core/replication/mod.rs

//! The replicator: public API, session lifecycle, and the reconnect policy.
//!
//! A [`Replicator`] impersonates a replica towards one primary. `open` runs
//! the outer retry loop: connect, handshake, synchronize, process the command
//! stream, and on a transport fault reconnect with the `(repl_id,
//! repl_offset)` pair intact so the primary can serve a partial
//! resynchronization. `close` latches the manual flag and interrupts whatever
//! the reader is blocked on.

pub mod handshake;
pub mod heartbeat;
pub mod sync;

use crate::config::Config;
use crate::core::RedsyncError;
use crate::core::commands::{CommandParser, CommandRegistry};
use crate::core::events::{
    DefaultExceptionListener, EventBus, EventListener, ExceptionListener, RawByteListener,
};
use crate::core::io::{CommandWriter, PrefetchReader, ReplInput};
use crate::core::rdb::{DecoderRegistry, RdbValueDecoder};
use crate::core::replication::sync::{Session, SessionEnd};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Upper bound on the random jitter added to each reconnect delay.
const RECONNECT_JITTER_MS: u64 = 500;

/// The connection state of a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    fn new(status: Status) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub(crate) fn load(&self) -> Status {
        match self.0.load(Ordering::SeqCst) {
            0 => Status::Disconnected,
            1 => Status::Connecting,
            2 => Status::Connected,
            _ => Status::Disconnecting,
        }
    }

    fn store(&self, status: Status) {
        self.0.store(status as u8, Ordering::SeqCst);
    }

    fn compare_and_set(&self, current: Status, new: Status) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// A Redis replication client for one primary.
pub struct Replicator {
    host: String,
    port: u16,
    pub(crate) config: Config,
    status: AtomicStatus,
    manual: AtomicBool,
    /// The replication id last announced by the primary; `?` before the
    /// first FULLRESYNC.
    pub(crate) repl_id: StdMutex<String>,
    /// The replication offset; `-1` means "no prior state". Shared with the
    /// heartbeat task, mutated only by the reader.
    pub(crate) repl_offset: Arc<AtomicI64>,
    /// The database index last selected by the stream; `-1` means unset.
    pub(crate) current_db: AtomicI64,
    pub(crate) events: EventBus,
    pub(crate) registry: CommandRegistry,
    pub(crate) rdb_decoders: DecoderRegistry,
    raw_listeners: RwLock<Vec<Arc<dyn RawByteListener>>>,
    shutdown_tx: broadcast::Sender<()>,
    heartbeat: StdMutex<Option<JoinHandle<()>>>,
}

impl Replicator {
    pub fn new(host: impl Into<String>, port: u16, config: Config) -> Result<Self, RedsyncError> {
        let host = host.into();
        if port == 0 {
            return Err(RedsyncError::Replication(format!(
                "illegal primary port: {port}"
            )));
        }
        config
            .validate()
            .map_err(|e| RedsyncError::Replication(e.to_string()))?;

        let (shutdown_tx, _) = broadcast::channel(4);
        let replicator = Self {
            host,
            port,
            repl_id: StdMutex::new(config.repl_id.clone()),
            repl_offset: Arc::new(AtomicI64::new(config.repl_offset)),
            current_db: AtomicI64::new(-1),
            config,
            status: AtomicStatus::new(Status::Disconnected),
            manual: AtomicBool::new(false),
            events: EventBus::new(),
            registry: CommandRegistry::with_builtins(),
            rdb_decoders: DecoderRegistry::new(),
            raw_listeners: RwLock::new(Vec::new()),
            shutdown_tx,
            heartbeat: StdMutex::new(None),
        };
        if replicator.config.use_default_exception_listener {
            replicator
                .events
                .add_exception_listener(Arc::new(DefaultExceptionListener));
        }
        Ok(replicator)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> Status {
        self.status.load()
    }

    pub fn repl_id(&self) -> String {
        self.repl_id.lock().unwrap().clone()
    }

    pub fn repl_offset(&self) -> i64 {
        self.repl_offset.load(Ordering::SeqCst)
    }

    /// Registers an event listener (FIFO order, identity-deduplicated).
    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) -> bool {
        self.events.add_listener(listener)
    }

    pub fn remove_event_listener(&self, listener: &Arc<dyn EventListener>) -> bool {
        self.events.remove_listener(listener)
    }

    pub fn add_exception_listener(&self, listener: Arc<dyn ExceptionListener>) -> bool {
        self.events.add_exception_listener(listener)
    }

    /// Registers a raw-byte tap; it observes every byte read from the socket.
    pub fn add_raw_byte_listener(&self, listener: Arc<dyn RawByteListener>) {
        self.raw_listeners.write().push(listener);
    }

    /// Registers (or replaces) the parser for a streamed command.
    pub fn register_command_parser(&self, name: impl AsRef<str>, parser: Arc<dyn CommandParser>) {
        self.registry.register(name, parser);
    }

    /// Registers a decoder for an RDB value type this crate does not decode
    /// natively.
    pub fn register_rdb_decoder(&self, type_code: u8, decoder: Arc<dyn RdbValueDecoder>) {
        self.rdb_decoders.register(type_code, decoder);
    }

    /// Connects to the primary and replicates until `close` is called, a
    /// fatal error occurs, or the retry budget is exhausted.
    pub async fn open(&self) -> Result<(), RedsyncError> {
        self.manual.store(false, Ordering::SeqCst);
        let result = self.run_with_retries().await;
        self.finalize_close();
        result
    }

    /// Requests an orderly shutdown: latches the manual flag and interrupts
    /// the reader. `open` returns once teardown has completed.
    pub fn close(&self) {
        self.manual.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    fn is_manual_closed(&self) -> bool {
        self.manual.load(Ordering::SeqCst)
    }

    /// The outer retry loop.
    async fn run_with_retries(&self) -> Result<(), RedsyncError> {
        let retry_delay = Duration::from_millis(self.config.retry_interval_ms);
        let mut attempts: u32 = 0;
        loop {
            if self.is_manual_closed() {
                return Ok(());
            }
            match self.connect_and_replicate().await {
                Ok(SessionEnd::Finished) => return Ok(()),
                Ok(SessionEnd::SyncLater) => {
                    // Not a fault: the primary asked us to come back later.
                    attempts = 0;
                    info!(
                        "redis-server[{}:{}] is not ready to sync, retrying in {retry_delay:?}",
                        self.host, self.port
                    );
                    self.sleep_interruptible(retry_delay).await;
                }
                Err(RedsyncError::Cancelled) => return Ok(()),
                Err(e) if e.is_fatal() => {
                    self.events.report_exception(&e);
                    return Err(e);
                }
                Err(e) => {
                    if self.is_manual_closed() {
                        // A read cancelled by `close` surfaces as a transport
                        // error; the latch decides, silently.
                        return Ok(());
                    }
                    error!(
                        "socket error. redis-server[{}:{}]: {e}",
                        self.host, self.port
                    );
                    self.events.report_exception(&e);
                    attempts += 1;
                    if self.config.retries > 0 && attempts >= self.config.retries {
                        return Err(e);
                    }
                    let jitter = Duration::from_millis(
                        rand::thread_rng().gen_range(0..RECONNECT_JITTER_MS),
                    );
                    let wait = retry_delay + jitter;
                    info!(
                        "reconnecting to redis-server[{}:{}] in {wait:?}. retry times: {attempts}",
                        self.host, self.port
                    );
                    self.sleep_interruptible(wait).await;
                }
            }
        }
    }

    /// One session attempt, with guarded teardown on every exit path.
    async fn connect_and_replicate(&self) -> Result<SessionEnd, RedsyncError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.is_manual_closed() {
            return Err(RedsyncError::Cancelled);
        }
        if !self
            .status
            .compare_and_set(Status::Disconnected, Status::Connecting)
        {
            return Err(RedsyncError::Replication(
                "replicator session already active".into(),
            ));
        }
        let mut session = match self.establish_session().await {
            Ok(session) => session,
            Err(e) => {
                self.status.store(Status::Disconnected);
                return Err(e);
            }
        };
        let result = tokio::select! {
            _ = shutdown_rx.recv() => Err(RedsyncError::Cancelled),
            result = session.run() => result,
        };
        self.teardown(session).await;
        result
    }

    /// Connects the socket and assembles the layered I/O endpoints.
    async fn establish_session(&self) -> Result<Session<'_>, RedsyncError> {
        let addr = format!("{}:{}", self.host, self.port);
        info!("connecting to redis-server[{addr}]");
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(RedsyncError::Replication(format!(
                    "timed out connecting to {addr}"
                )));
            }
        };
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();

        let mut input = if self.config.async_cached_bytes > 0 {
            ReplInput::new(
                PrefetchReader::spawn(read_half, self.config.async_cached_bytes),
                self.config.buffer_size,
            )
        } else {
            ReplInput::new(read_half, self.config.buffer_size)
        };
        if self.config.rate_limit > 0 {
            input.set_rate_limit(self.config.rate_limit);
        }
        input.set_raw_listeners(self.raw_listeners.read().clone());
        let writer = Arc::new(Mutex::new(CommandWriter::new(
            write_half,
            self.config.buffer_size,
        )));

        self.status.store(Status::Connected);
        info!("connected to redis-server[{addr}]");
        Ok(Session {
            replicator: self,
            input,
            writer,
            local_addr,
        })
    }

    /// Spawns (or restarts) the heartbeat for the current session.
    pub(crate) fn start_heartbeat(&self, writer: Arc<Mutex<CommandWriter>>) {
        let period = Duration::from_millis(self.config.heartbeat_period_ms);
        let handle = tokio::spawn(heartbeat::run(
            period,
            writer,
            self.repl_offset.clone(),
            self.shutdown_tx.subscribe(),
        ));
        if let Some(old) = self.heartbeat.lock().unwrap().replace(handle) {
            old.abort();
        }
        info!("heartbeat started.");
    }

    /// Closes one session: heartbeat first, then the tap, then the write
    /// half, then the socket itself; each step guarded on its own.
    async fn teardown(&self, mut session: Session<'_>) {
        self.status
            .compare_and_set(Status::Connected, Status::Disconnecting);
        if let Some(heartbeat) = self.heartbeat.lock().unwrap().take() {
            heartbeat.abort();
            info!("heartbeat canceled.");
        }
        session.input.clear_raw_listeners();
        let Session { input, writer, .. } = session;
        // Dropping the input drops the read half (and stops the prefetch task).
        drop(input);
        if let Err(e) = writer.lock().await.shutdown().await {
            debug!("error shutting down the write half: {e}");
        }
        drop(writer);
        self.status.store(Status::Disconnected);
        info!("socket closed. redis-server[{}:{}]", self.host, self.port);
    }

    /// Outer idempotent guard for `open`'s exit.
    fn finalize_close(&self) {
        if let Some(heartbeat) = self.heartbeat.lock().unwrap().take() {
            heartbeat.abort();
        }
        if self.status.load() != Status::Disconnected {
            self.status.store(Status::Disconnected);
        }
    }

    /// Sleeps for `duration`, waking early if `close` is called.
    async fn sleep_interruptible(&self, duration: Duration) {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown.recv() => {}
        }
    }
}
