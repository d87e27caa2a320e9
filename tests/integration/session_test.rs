// tests/integration/session_test.rs

//! Drives `ConnectionHandler` over scripted and in-memory streams.

use super::test_helpers::*;
use modbus_tcp_server::connection::{SessionOutcome, SessionSettings};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_test::io::Builder;

#[tokio::test]
async fn test_request_is_answered_then_peer_close_ends_session() {
    let ctx = TestContext::new();
    ctx.registers.set_holding_register(2, 0x1234).unwrap();

    let stream = Builder::new()
        .read(&read_holding_request(7, 1, 2, 1))
        .write(&read_holding_response(7, 1, &[0x1234]))
        .build();

    let outcome = ctx.handler(stream, 1).run().await;
    assert_eq!(outcome, SessionOutcome::PeerClosed);
    assert_eq!(ctx.frames_processed(), 1);
}

#[tokio::test]
async fn test_pipelined_frames_in_one_read_are_answered_in_order() {
    let ctx = TestContext::new();
    let mut wire = write_register_request(1, 1, 5, 42);
    wire.extend(read_holding_request(2, 1, 5, 1));

    let stream = Builder::new()
        .read(&wire)
        .write(&write_register_request(1, 1, 5, 42))
        .write(&read_holding_response(2, 1, &[42]))
        .build();

    let outcome = ctx.handler(stream, 1).run().await;
    assert_eq!(outcome, SessionOutcome::PeerClosed);
    assert_eq!(ctx.frames_processed(), 2);
    assert_eq!(ctx.registers.holding_register(5), Some(42));
}

#[tokio::test]
async fn test_header_split_across_reads_dispatches_once() {
    let ctx = TestContext::new();
    let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];

    let stream = Builder::new()
        .read(&request[..4])
        .read(&request[4..])
        .write(&read_holding_response(1, 1, &[0]))
        .build();

    let outcome = ctx.handler(stream, 1).run().await;
    assert_eq!(outcome, SessionOutcome::PeerClosed);
    assert_eq!(ctx.frames_processed(), 1);
}

#[tokio::test]
async fn test_exception_response_keeps_session_open() {
    let ctx = TestContext::new();
    // Address 100 is outside the 64-entry table.
    let stream = Builder::new()
        .read(&read_holding_request(3, 1, 100, 1))
        .write(&encode(3, 1, vec![0x83, 0x02]))
        .read(&read_holding_request(4, 1, 0, 1))
        .write(&read_holding_response(4, 1, &[0]))
        .build();

    let outcome = ctx.handler(stream, 1).run().await;
    assert_eq!(outcome, SessionOutcome::PeerClosed);
    assert_eq!(ctx.frames_processed(), 2);
}

#[tokio::test]
async fn test_malformed_header_closes_without_reply() {
    let ctx = TestContext::new();
    // Protocol id 1 is not MODBUS.
    let stream = Builder::new()
        .read(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
        .build();

    let outcome = ctx.handler(stream, 1).run().await;
    assert_eq!(outcome, SessionOutcome::InvalidFrame);
    assert_eq!(ctx.frames_processed(), 0);
}

#[tokio::test]
async fn test_oversized_length_field_is_rejected_before_payload_arrives() {
    let ctx = TestContext::new();
    let stream = Builder::new()
        .read(&[0x00, 0x01, 0x00, 0x00, 0x01, 0x00])
        .build();

    let outcome = ctx.handler(stream, 1).run().await;
    assert_eq!(outcome, SessionOutcome::InvalidFrame);
}

#[tokio::test]
async fn test_frames_before_malformed_data_are_still_answered() {
    let ctx = TestContext::new();
    let mut wire = read_holding_request(9, 1, 0, 1);
    wire.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x00]);

    let stream = Builder::new()
        .read(&wire)
        .write(&read_holding_response(9, 1, &[0]))
        .build();

    let outcome = ctx.handler(stream, 1).run().await;
    assert_eq!(outcome, SessionOutcome::InvalidFrame);
    assert_eq!(ctx.frames_processed(), 1);
}

#[tokio::test]
async fn test_read_error_ends_session_with_socket_error() {
    let ctx = TestContext::new();
    let stream = Builder::new()
        .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        .build();

    let outcome = ctx.handler(stream, 1).run().await;
    assert_eq!(outcome, SessionOutcome::SocketError);
}

#[tokio::test]
async fn test_idle_session_is_reclaimed_even_while_bytes_trickle_in() {
    let ctx = TestContext::new();
    let settings = SessionSettings {
        idle_timeout: Duration::from_millis(150),
        read_timeout: Duration::from_millis(20),
        read_chunk_size: 128,
    };
    let (mut client, server) = tokio::io::duplex(1024);

    // A 260-byte frame announced one byte at a time never completes in time.
    let writer = tokio::spawn(async move {
        let header = [0x00, 0x01, 0x00, 0x00, 0x00, 0xFE, 0x01, 0x10];
        for byte in header.iter().chain(std::iter::repeat(&0u8)).take(40) {
            if client.write_all(&[*byte]).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        client
    });

    let started = Instant::now();
    let outcome = ctx.handler_with(server, 1, settings).run().await;
    assert_eq!(outcome, SessionOutcome::IdleTimeout);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(ctx.frames_processed(), 0);

    let _ = writer.await;
}

#[tokio::test]
async fn test_completed_frames_refresh_liveness() {
    let ctx = TestContext::new();
    let settings = SessionSettings {
        idle_timeout: Duration::from_millis(200),
        read_timeout: Duration::from_millis(20),
        read_chunk_size: 128,
    };
    let (mut client, server) = tokio::io::duplex(1024);
    let session = tokio::spawn(ctx.handler_with(server, 1, settings).run());

    // Five requests spaced 100ms apart span well past the idle threshold.
    let mut response = vec![0u8; 11];
    for tid in 0..5u16 {
        client
            .write_all(&read_holding_request(tid, 1, 0, 1))
            .await
            .unwrap();
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, read_holding_response(tid, 1, &[0]));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    drop(client);
    assert_eq!(session.await.unwrap(), SessionOutcome::PeerClosed);
}

#[tokio::test]
async fn test_shutdown_flag_ends_session_within_read_timeout() {
    let ctx = TestContext::new();
    let (client, server) = tokio::io::duplex(1024);
    let session = tokio::spawn(ctx.handler(server, 1).run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(ctx.state.begin_shutdown());
    let started = Instant::now();

    let outcome = tokio::time::timeout(Duration::from_secs(1), session)
        .await
        .expect("session should observe the flag")
        .unwrap();
    assert_eq!(outcome, SessionOutcome::ShuttingDown);
    assert!(started.elapsed() < Duration::from_millis(500));
    drop(client);
}

#[tokio::test]
async fn test_flag_raised_before_start_performs_no_io() {
    let ctx = TestContext::new();
    ctx.state.begin_shutdown();
    // An empty script reads as end-of-stream, which would end as PeerClosed.
    let stream = Builder::new().build();

    let outcome = ctx.handler(stream, 1).run().await;
    assert_eq!(outcome, SessionOutcome::ShuttingDown);
}

#[tokio::test]
async fn test_dropped_server_is_treated_as_shutdown() {
    let ctx = TestContext::new();
    let (_client, server) = tokio::io::duplex(1024);
    let handler = ctx.handler(server, 1);
    let TestContext { state, registers } = ctx;
    drop(state);
    drop(registers);

    let outcome = tokio::time::timeout(Duration::from_secs(1), handler.run())
        .await
        .unwrap();
    assert_eq!(outcome, SessionOutcome::ShuttingDown);
}

#[tokio::test]
async fn test_malformed_session_does_not_affect_another() {
    let ctx = TestContext::new();
    let (mut bad_client, bad_server) = tokio::io::duplex(1024);
    let (mut good_client, good_server) = tokio::io::duplex(1024);
    let bad = tokio::spawn(ctx.handler(bad_server, 1).run());
    let good = tokio::spawn(ctx.handler(good_server, 2).run());

    bad_client
        .write_all(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff])
        .await
        .unwrap();
    assert_eq!(bad.await.unwrap(), SessionOutcome::InvalidFrame);
    // The closed session's socket reads as end-of-stream.
    let mut buf = [0u8; 8];
    assert_eq!(bad_client.read(&mut buf).await.unwrap(), 0);

    good_client
        .write_all(&write_register_request(1, 1, 3, 77))
        .await
        .unwrap();
    let mut response = vec![0u8; 12];
    good_client.read_exact(&mut response).await.unwrap();
    assert_eq!(response, write_register_request(1, 1, 3, 77));

    drop(good_client);
    assert_eq!(good.await.unwrap(), SessionOutcome::PeerClosed);
    assert_eq!(ctx.registers.holding_register(3), Some(77));
}

/// Counters shared between a `FailingWriteStream` and the test.
#[derive(Default)]
struct StreamProbe {
    reads: AtomicUsize,
    writes: AtomicUsize,
    io_after_failure: AtomicUsize,
    shutdowns: AtomicUsize,
    drops: AtomicUsize,
    failed: AtomicBool,
}

/// Serves `incoming` on the first read, then fails every write.
struct FailingWriteStream {
    incoming: Option<Vec<u8>>,
    probe: Arc<StreamProbe>,
}

impl AsyncRead for FailingWriteStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if self.probe.failed.load(Ordering::SeqCst) {
            self.probe.io_after_failure.fetch_add(1, Ordering::SeqCst);
        }
        match self.incoming.take() {
            Some(bytes) => {
                buf.put_slice(&bytes);
                Poll::Ready(Ok(()))
            }
            None => Poll::Pending,
        }
    }
}

impl AsyncWrite for FailingWriteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.probe.writes.fetch_add(1, Ordering::SeqCst);
        if self.probe.failed.swap(true, Ordering::SeqCst) {
            self.probe.io_after_failure.fetch_add(1, Ordering::SeqCst);
        }
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

impl Drop for FailingWriteStream {
    fn drop(&mut self) {
        self.probe.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_send_failure_closes_socket_exactly_once() {
    let ctx = TestContext::new();
    let probe = Arc::new(StreamProbe::default());
    let mut incoming = read_holding_request(1, 1, 0, 1);
    incoming.extend(read_holding_request(2, 1, 0, 1));
    let stream = FailingWriteStream {
        incoming: Some(incoming),
        probe: probe.clone(),
    };

    let outcome = ctx.handler(stream, 1).run().await;

    assert_eq!(outcome, SessionOutcome::SocketError);
    assert_eq!(probe.reads.load(Ordering::SeqCst), 1);
    assert_eq!(probe.writes.load(Ordering::SeqCst), 1);
    assert_eq!(probe.io_after_failure.load(Ordering::SeqCst), 0);
    assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
    // The second buffered frame is never dispatched.
    assert_eq!(ctx.frames_processed(), 1);
}
