//! Integration tests for the IPC side channel driven by the engine loop.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use gptpnet::prelude::*;
use gptpnet::{IpcClient, Result};
use tempfile::TempDir;

mod common;

static NEXT_PORT: AtomicU16 = AtomicU16::new(44_000);

fn port() -> u16 {
    NEXT_PORT.fetch_add(2, Ordering::SeqCst)
}

/// Echoes requests back; a request of `bye` unregisters the sender.
#[derive(Default)]
struct Echo {
    requests: Vec<(Vec<u8>, IpcAddr)>,
}

impl EventHandler for Echo {
    fn on_event(&mut self, _: &mut Transport, _: usize, _: &NetEvent, _: i64) -> Result<()> {
        Ok(())
    }

    fn on_ipc(&mut self, transport: &mut Transport, data: &[u8], from: &IpcAddr) -> IpcVerdict {
        self.requests.push((data.to_vec(), from.clone()));
        if data == b"bye" {
            return IpcVerdict::Reject;
        }
        if let Err(e) = transport.ipc_respond(from, data) {
            panic!("respond failed: {e}");
        }
        IpcVerdict::Keep
    }
}

fn unix_engine(dir: &TempDir, max_clients: usize) -> Engine<Echo> {
    let config = NetConfig::builder()
        .ovip_start_port(port())
        .ipc_node(dir.path().join("server"))
        .max_ipc_clients(max_clients)
        .interval_timeout_ns(10_000_000)
        .build();
    Engine::open(&["cbeth0"], config, Echo::default()).unwrap()
}

fn run_until_requests(engine: &mut Engine<Echo>, count: usize) {
    let start = Instant::now();
    while engine.handler().requests.len() < count {
        assert!(start.elapsed() < Duration::from_secs(2), "IPC request never arrived");
        engine.run_once().unwrap();
    }
}

fn recv(client: &IpcClient) -> Option<Vec<u8>> {
    let mut buf = [0u8; 64];
    client
        .recv_timeout(&mut buf, Duration::from_millis(500))
        .unwrap()
        .map(|n| buf[..n].to_vec())
}

#[test]
fn test_request_and_broadcast() {
    common::init_logging();
    let dir = TempDir::new().unwrap();
    let mut engine = unix_engine(&dir, 8);
    let server = dir.path().join("server");

    let one = IpcClient::connect_unix(dir.path().join("one"), &server).unwrap();
    let two = IpcClient::connect_unix(dir.path().join("two"), &server).unwrap();
    one.send(b"hello").unwrap();
    two.send(b"world").unwrap();
    run_until_requests(&mut engine, 2);

    assert_eq!(recv(&one).as_deref(), Some(&b"hello"[..]));
    assert_eq!(recv(&two).as_deref(), Some(&b"world"[..]));
    assert_eq!(engine.transport().ipc().unwrap().clients().len(), 2);

    assert_eq!(engine.transport_mut().ipc_notify(b"sync"), 2);
    assert_eq!(recv(&one).as_deref(), Some(&b"sync"[..]));
    assert_eq!(recv(&two).as_deref(), Some(&b"sync"[..]));
}

#[test]
fn test_rejected_client_is_forgotten() {
    common::init_logging();
    let dir = TempDir::new().unwrap();
    let mut engine = unix_engine(&dir, 8);
    let client = IpcClient::connect_unix(dir.path().join("c"), dir.path().join("server")).unwrap();

    client.send(b"bye").unwrap();
    run_until_requests(&mut engine, 1);
    assert!(engine.transport().ipc().unwrap().clients().is_empty());
    assert_eq!(engine.transport_mut().ipc_notify(b"sync"), 0);
}

#[test]
fn test_oldest_client_evicted() {
    common::init_logging();
    let dir = TempDir::new().unwrap();
    let mut engine = unix_engine(&dir, 2);
    let server = dir.path().join("server");
    let clients: Vec<IpcClient> = (0..3)
        .map(|i| IpcClient::connect_unix(dir.path().join(format!("c{i}")), &server).unwrap())
        .collect();

    for (i, client) in clients.iter().enumerate() {
        client.send(b"hi").unwrap();
        run_until_requests(&mut engine, i + 1);
        assert_eq!(recv(client).as_deref(), Some(&b"hi"[..]));
    }

    let registered = engine.transport().ipc().unwrap().clients();
    assert_eq!(registered.len(), 2);
    let first = IpcAddr::Unix(dir.path().join("c0"));
    assert!(!registered.contains(&first));

    assert_eq!(engine.transport_mut().ipc_notify(b"sync"), 2);
    assert_eq!(recv(&clients[2]).as_deref(), Some(&b"sync"[..]));
}

#[test]
fn test_departed_client_removed_on_notify() {
    common::init_logging();
    let dir = TempDir::new().unwrap();
    let mut engine = unix_engine(&dir, 8);
    let client = IpcClient::connect_unix(dir.path().join("gone"), dir.path().join("server")).unwrap();
    client.send(b"ping").unwrap();
    run_until_requests(&mut engine, 1);
    drop(client);

    assert_eq!(engine.transport_mut().ipc_notify(b"sync"), 0);
    assert!(engine.transport().ipc().unwrap().clients().is_empty());
}

#[test]
fn test_udp_transport() {
    common::init_logging();
    let config = NetConfig::builder()
        .ovip_start_port(port())
        .ipc_udp_port(port())
        .interval_timeout_ns(10_000_000)
        .build();
    let mut engine = Engine::open(&["cbeth0"], config, Echo::default()).unwrap();
    let server = engine.transport().ipc().unwrap().udp_addr().unwrap();
    assert!(engine.transport().ipc().unwrap().node().is_none());

    let client = IpcClient::connect_udp(([127, 0, 0, 1], server.port()).into()).unwrap();
    client.send(b"status").unwrap();
    run_until_requests(&mut engine, 1);
    assert_eq!(recv(&client).as_deref(), Some(&b"status"[..]));
    assert!(matches!(engine.handler().requests[0].1, IpcAddr::Udp(_)));
}

#[test]
fn test_ipc_bind_failure_is_not_fatal() {
    common::init_logging();
    let config = NetConfig::builder()
        .ovip_start_port(port())
        .ipc_node("/nonexistent-dir/gptpnet-ipc")
        .build();
    let mut engine = Engine::open(&["cbeth0"], config, Echo::default()).unwrap();
    assert!(engine.transport().ipc().is_none());
    assert_eq!(engine.transport_mut().ipc_notify(b"x"), 0);
    let err = engine
        .transport()
        .ipc_respond(&IpcAddr::Unnamed, b"x")
        .unwrap_err();
    assert!(matches!(err, NetError::Ipc { .. }));
}

#[test]
fn test_connect_to_missing_server_cleans_up_node() {
    let dir = TempDir::new().unwrap();
    let own = dir.path().join("orphan");
    let err = IpcClient::connect_unix(&own, dir.path().join("no-server")).unwrap_err();
    assert!(matches!(err, NetError::Ipc { .. }));
    assert!(!own.exists());
}
