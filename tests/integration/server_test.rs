// tests/integration/server_test.rs

//! End-to-end tests against a real listener bound to an ephemeral port.

use super::test_helpers::*;
use modbus_tcp_server::config::Config;
use modbus_tcp_server::server;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

fn test_config() -> Config {
    let mut config = Config::default();
    config.port = 0;
    config.shutdown_grace_seconds = 3;
    config.session.read_timeout_seconds = 1;
    config.registers.holding_registers = 128;
    config
}

#[tokio::test]
async fn test_server_answers_requests_and_shuts_down() {
    init_tracing();
    let ctx = server::setup(test_config()).await.unwrap();
    let addr = ctx.local_addr().unwrap();
    let state = ctx.state.clone();
    ctx.registers.set_holding_register(10, 0xBEEF).unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server::serve(ctx, async {
        shutdown_rx.await.ok();
    }));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(&read_holding_request(0x0102, 0x11, 10, 1))
        .await
        .unwrap();
    let mut response = vec![0u8; 11];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(response, read_holding_response(0x0102, 0x11, &[0xBEEF]));
    assert_eq!(state.clients.len(), 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server should stop within the grace period")
        .unwrap();

    // The session noticed the flag and closed its socket.
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).await.unwrap_or(0), 0);
    assert!(state.is_terminating());
    assert!(state.clients.is_empty());
    assert_eq!(state.stats.get_total_connections(), 1);
    assert_eq!(state.stats.get_total_frames(), 1);
}

#[tokio::test]
async fn test_connections_beyond_max_clients_are_rejected() {
    init_tracing();
    let mut config = test_config();
    config.max_clients = 1;
    let ctx = server::setup(config).await.unwrap();
    let addr = ctx.local_addr().unwrap();
    let state = ctx.state.clone();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server::serve(ctx, async {
        shutdown_rx.await.ok();
    }));

    // Make sure the first session is admitted before opening the second.
    let mut first = TcpStream::connect(addr).await.unwrap();
    first
        .write_all(&read_holding_request(1, 1, 0, 1))
        .await
        .unwrap();
    let mut response = vec![0u8; 11];
    first.read_exact(&mut response).await.unwrap();

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), second.read(&mut buf))
        .await
        .expect("rejected connection should be closed promptly")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(state.stats.get_rejected_connections(), 1);

    // The admitted session keeps working.
    first
        .write_all(&read_holding_request(2, 1, 0, 1))
        .await
        .unwrap();
    first.read_exact(&mut response).await.unwrap();
    assert_eq!(response, read_holding_response(2, 1, &[0]));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_setup_rejects_invalid_config() {
    init_tracing();
    let mut config = test_config();
    config.max_clients = 0;
    assert!(server::setup(config).await.is_err());
}

#[tokio::test]
async fn test_setup_fails_when_tls_material_is_missing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.tls.enabled = true;
    config.tls.cert_path = dir.path().join("missing.crt").display().to_string();
    config.tls.key_path = dir.path().join("missing.key").display().to_string();

    let err = match server::setup(config).await {
        Ok(_) => panic!("setup should fail without certificates"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("certificate"));
}
