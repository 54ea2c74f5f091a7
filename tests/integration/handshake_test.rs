// tests/integration/handshake_test.rs

//! Handshake behavior against a scripted primary: command order, PSYNC
//! seeding, filter negotiation, and the tolerated-vs-fatal reply rules.

use super::test_helpers::*;
use redsync::{Config, RedsyncError, ReplFilter, Replicator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_handshake_command_sequence() {
    init_tracing();
    let history_slot: Arc<Mutex<Option<Vec<Vec<String>>>>> = Arc::new(Mutex::new(None));
    let slot = history_slot.clone();
    let (addr, _primary) = spawn_primary(move |mut conn, history| {
        let slot = slot.clone();
        async move {
            *slot.lock().unwrap() = Some(history);
            conn.send(b"+CONTINUE\r\n").await;
            conn.hold_until_closed().await;
        }
    })
    .await;

    let config = Config {
        auth_password: Some("hunter2".to_string()),
        listening_port: 9999,
        repl_id: "abc".to_string(),
        repl_offset: 100,
        repl_filters: vec![ReplFilter::new(vec![
            "REPLCONF".to_string(),
            "rfilter".to_string(),
            "user:*".to_string(),
        ])],
        ..test_config()
    };
    let replicator = Arc::new(Replicator::new("127.0.0.1", addr.port(), config).unwrap());
    let handle = spawn_open(replicator.clone());

    wait_for(|| history_slot.lock().unwrap().is_some(), "handshake").await;
    let history = history_slot.lock().unwrap().clone().unwrap();

    assert_eq!(history[0][0], "AUTH");
    assert_eq!(history[0][1], "hunter2");
    assert_eq!(history[1], vec!["PING"]);
    assert_eq!(history[2], vec!["REPLCONF", "listening-port", "9999"]);
    assert_eq!(history[3][..2], ["REPLCONF".to_string(), "ip-address".to_string()]);
    assert_eq!(history[4], vec!["REPLCONF", "capa", "eof"]);
    assert_eq!(history[5], vec!["REPLCONF", "capa", "psync2"]);
    assert_eq!(history[6], vec!["REPLCONF", "rfilter", "user:*"]);
    // The seed offset is incremented by one when non-negative.
    assert_eq!(history[7], vec!["PSYNC", "abc", "101"]);

    replicator.close();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_fresh_psync_asks_for_everything() {
    init_tracing();
    let history_slot: Arc<Mutex<Option<Vec<Vec<String>>>>> = Arc::new(Mutex::new(None));
    let slot = history_slot.clone();
    let (addr, _primary) = spawn_primary(move |mut conn, history| {
        let slot = slot.clone();
        async move {
            *slot.lock().unwrap() = Some(history);
            conn.send(b"+CONTINUE\r\n").await;
            conn.hold_until_closed().await;
        }
    })
    .await;

    let replicator = Arc::new(Replicator::new("127.0.0.1", addr.port(), test_config()).unwrap());
    let handle = spawn_open(replicator.clone());

    wait_for(|| history_slot.lock().unwrap().is_some(), "handshake").await;
    let history = history_slot.lock().unwrap().clone().unwrap();
    // No AUTH without a configured password; the seed is "from scratch".
    assert_eq!(history[0], vec!["PING"]);
    assert_eq!(history.last().unwrap(), &vec!["PSYNC", "?", "-1"]);

    replicator.close();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_accepted_filter_registers_its_listener() {
    init_tracing();
    let (addr, _primary) = spawn_primary(move |mut conn, _history| async move {
        conn.send(b"+CONTINUE\r\n").await;
        conn.hold_until_closed().await;
    })
    .await;

    let filter_events = EventCollector::new();
    let config = Config {
        repl_filters: vec![ReplFilter::with_listener(
            vec!["REPLCONF".to_string(), "rfilter".to_string(), "a*".to_string()],
            filter_events.clone(),
        )],
        ..test_config()
    };
    let replicator = Arc::new(Replicator::new("127.0.0.1", addr.port(), config).unwrap());
    let handle = spawn_open(replicator.clone());

    // The listener authorized by the filter sees the stream events.
    wait_for(|| filter_events.len() >= 1, "filter listener events").await;

    replicator.close();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_auth_rejection_is_fatal() {
    init_tracing();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    let (addr, _primary) = spawn_primary_raw(move |mut conn| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let command = conn.read_command().await.expect("AUTH");
            assert_eq!(command[0].to_ascii_uppercase(), "AUTH");
            conn.send(b"-WRONGPASS invalid username-password pair\r\n").await;
            conn.hold_until_closed().await;
        }
    })
    .await;

    let exceptions = ExceptionCollector::new();
    let config = Config {
        auth_password: Some("wrong".to_string()),
        retries: 3,
        ..test_config()
    };
    let replicator = Arc::new(Replicator::new("127.0.0.1", addr.port(), config).unwrap());
    replicator.add_exception_listener(exceptions.clone());

    let result = replicator.open().await;
    assert!(matches!(result, Err(RedsyncError::Auth(_))));
    assert_eq!(exceptions.len(), 1);
    // Fatal: the retrier must not have reconnected.
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ping_noauth_is_fatal() {
    init_tracing();
    let (addr, _primary) = spawn_primary_raw(move |mut conn| async move {
        let command = conn.read_command().await.expect("PING");
        assert_eq!(command, vec!["PING"]);
        conn.send(b"-NOAUTH Authentication required.\r\n").await;
        conn.hold_until_closed().await;
    })
    .await;

    let replicator = Arc::new(Replicator::new("127.0.0.1", addr.port(), test_config()).unwrap());
    let result = replicator.open().await;
    assert!(matches!(result, Err(RedsyncError::Auth(_))));
}

#[tokio::test]
async fn test_replconf_rejections_are_tolerated() {
    init_tracing();
    let (addr, _primary) = spawn_primary_raw(move |mut conn| async move {
        loop {
            let Some(command) = conn.read_command().await else {
                return;
            };
            match command[0].to_ascii_uppercase().as_str() {
                "PING" => conn.send(b"+PONG\r\n").await,
                // An old primary that knows nothing of REPLCONF.
                "REPLCONF" => conn.send(b"-ERR unknown command 'REPLCONF'\r\n").await,
                "PSYNC" => {
                    conn.send(b"+CONTINUE\r\n").await;
                    conn.hold_until_closed().await;
                    return;
                }
                other => panic!("unexpected command: {other}"),
            }
        }
    })
    .await;

    let collector = EventCollector::new();
    let replicator = Arc::new(Replicator::new("127.0.0.1", addr.port(), test_config()).unwrap());
    replicator.add_event_listener(collector.clone());
    let handle = spawn_open(replicator.clone());

    // Despite the rejected probes, the sync proceeds.
    wait_for(|| collector.len() >= 1, "PreCommandSync").await;

    replicator.close();
    assert!(handle.await.unwrap().is_ok());
}
