// tests/integration/test_helpers.rs

//! Test helpers: a scripted in-process primary, event collectors, and
//! fixture builders.

use redsync::core::events::{Event, EventListener, ExceptionListener, RawByteListener};
use redsync::{Config, RedsyncError, Replicator};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

/// A config tuned for tests: quick retries, heartbeat effectively off.
pub fn test_config() -> Config {
    Config {
        connect_timeout_ms: 5_000,
        heartbeat_period_ms: 60_000,
        retry_interval_ms: 50,
        retries: 1,
        async_cached_bytes: 0,
        ..Config::default()
    }
}

/// Collects every event the replicator publishes.
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<Event>>,
}

impl EventCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn commands(&self) -> Vec<(String, Vec<Vec<u8>>, (i64, i64))> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::Command { command, range } => Some((
                    command.name.as_str().to_string(),
                    command.args.iter().map(|a| a.to_vec()).collect(),
                    *range,
                )),
                _ => None,
            })
            .collect()
    }

    pub fn snapshot_keys(&self) -> Vec<Vec<u8>> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::SnapshotEntry(entry) => Some(entry.key.to_vec()),
                _ => None,
            })
            .collect()
    }
}

impl EventListener for EventCollector {
    fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Collects errors surfaced to exception listeners.
#[derive(Default)]
pub struct ExceptionCollector {
    errors: Mutex<Vec<RedsyncError>>,
}

impl ExceptionCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl ExceptionListener for ExceptionCollector {
    fn on_exception(&self, err: &RedsyncError) {
        self.errors.lock().unwrap().push(err.clone());
    }
}

/// Collects the raw-byte tap.
#[derive(Default)]
pub struct RawByteCollector {
    bytes: Mutex<Vec<u8>>,
}

impl RawByteCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }
}

impl RawByteListener for RawByteCollector {
    fn on_bytes(&self, bytes: &[u8]) {
        self.bytes.lock().unwrap().extend_from_slice(bytes);
    }
}

/// One accepted connection on the scripted primary.
pub struct PrimaryConn {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl PrimaryConn {
    /// Reads one RESP array-of-bulks command from the replica. Returns `None`
    /// once the replica hangs up.
    pub async fn read_command(&mut self) -> Option<Vec<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_start_matches('*').trim().parse().ok()?;
        let mut parts = Vec::with_capacity(count);
        for _ in 0..count {
            let mut len_line = String::new();
            self.reader.read_line(&mut len_line).await.ok()?;
            let len: usize = len_line.trim_start_matches('$').trim().parse().ok()?;
            let mut payload = vec![0u8; len + 2];
            self.reader.read_exact(&mut payload).await.ok()?;
            payload.truncate(len);
            parts.push(String::from_utf8_lossy(&payload).into_owned());
        }
        Some(parts)
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Plays the primary's side of the handshake until PSYNC/SYNC arrives.
    /// Returns every command received, the sync request last.
    pub async fn accept_handshake(&mut self) -> Vec<Vec<String>> {
        let mut history = Vec::new();
        loop {
            let command = self.read_command().await.expect("handshake command");
            let name = command[0].to_ascii_uppercase();
            history.push(command);
            match name.as_str() {
                "PING" => self.send(b"+PONG\r\n").await,
                "AUTH" | "REPLCONF" => self.send(b"+OK\r\n").await,
                "PSYNC" | "SYNC" => return history,
                other => panic!("unexpected handshake command: {other}"),
            }
        }
    }

    /// Blocks until the replica closes the connection, discarding anything
    /// it sends in the meantime.
    pub async fn hold_until_closed(&mut self) {
        while self.read_command().await.is_some() {}
    }
}

/// Binds a scripted primary. Each accepted connection is answered through
/// the standard handshake, then handed to `scenario` together with the
/// command history (PSYNC/SYNC last).
pub async fn spawn_primary<F, Fut>(scenario: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(PrimaryConn, Vec<Vec<String>>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read_half, write_half) = stream.into_split();
            let mut conn = PrimaryConn {
                reader: BufReader::new(read_half),
                writer: write_half,
            };
            let history = conn.accept_handshake().await;
            scenario(conn, history).await;
        }
    });
    (addr, handle)
}

/// A raw variant without the automatic handshake, for scenarios that need
/// to misbehave before PSYNC.
pub async fn spawn_primary_raw<F, Fut>(scenario: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(PrimaryConn) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read_half, write_half) = stream.into_split();
            let conn = PrimaryConn {
                reader: BufReader::new(read_half),
                writer: write_half,
            };
            scenario(conn).await;
        }
    });
    (addr, handle)
}

/// Spawns `open` on a shared replicator, returning its join handle.
pub fn spawn_open(replicator: Arc<Replicator>) -> JoinHandle<Result<(), RedsyncError>> {
    tokio::spawn(async move { replicator.open().await })
}

/// Polls `cond` until it holds, failing the test after five seconds.
pub async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if deadline.is_err() {
        panic!("timed out waiting for {what}");
    }
}

/// A minimal sized snapshot: one string key, format version 3 (no checksum
/// trailer).
pub fn tiny_rdb(key: &str, value: &str) -> Vec<u8> {
    let mut out = b"REDIS0003".to_vec();
    out.extend_from_slice(&[0xFE, 0x00]);
    out.push(0x00);
    out.push(key.len() as u8);
    out.extend_from_slice(key.as_bytes());
    out.push(value.len() as u8);
    out.extend_from_slice(value.as_bytes());
    out.push(0xFF);
    out
}

/// The snapshot framed as the reply to PSYNC/SYNC: `$<len>\r\n<bytes>`.
pub fn sized_rdb_reply(rdb: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", rdb.len()).into_bytes();
    out.extend_from_slice(rdb);
    out
}

/// A streamed `SET key value` frame.
pub fn set_frame(key: &str, value: &str) -> Vec<u8> {
    format!(
        "*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
        key.len(),
        key,
        value.len(),
        value
    )
    .into_bytes()
}

/// The `REPLCONF GETACK *` frame a primary uses to probe the offset.
pub fn getack_frame() -> Vec<u8> {
    b"*3\r\n$8\r\nREPLCONF\r\n$6\r\nGETACK\r\n$1\r\n*\r\n".to_vec()
}
