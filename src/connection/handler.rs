// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::buffer::FrameBuffer;
use super::session::{SessionOutcome, SessionSettings, SessionState};
use crate::core::ModbusError;
use crate::core::protocol::{MbapFrame, MbapFrameCodec};
use crate::core::state::ServerState;
use crate::server::AnyStream;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;
use tracing::{debug, info, warn};

/// Upper bound on the graceful `shutdown()` of the socket during close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// The next step for the connection's main loop to take.
enum NextAction {
    Continue,
    Terminate(SessionOutcome),
}

/// Manages the full lifecycle of a client connection.
///
/// Each iteration of the loop checks the server's shutdown flag, then the
/// idle clock, then performs one bounded read. Complete frames are drained
/// from the buffer in arrival order; the response to one frame is fully
/// written before the next frame is dispatched.
pub struct ConnectionHandler<S = AnyStream> {
    /// The socket. `None` once it has been closed.
    stream: Option<S>,
    addr: SocketAddr,
    /// Used only to read the shutdown flag and to dispatch frames.
    state: Weak<ServerState>,
    settings: SessionSettings,
    buffer: FrameBuffer,
    codec: MbapFrameCodec,
    write_buf: BytesMut,
    read_buf: Vec<u8>,
    session: SessionState,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Creates a new `ConnectionHandler` using the server's session settings.
    pub fn new(stream: S, addr: SocketAddr, session_id: u64, state: &Arc<ServerState>) -> Self {
        let settings = SessionSettings::from(&state.config.session);
        Self::with_settings(stream, addr, session_id, Arc::downgrade(state), settings)
    }

    /// Creates a new `ConnectionHandler` with explicit settings.
    pub fn with_settings(
        stream: S,
        addr: SocketAddr,
        session_id: u64,
        state: Weak<ServerState>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            stream: Some(stream),
            addr,
            state,
            settings,
            buffer: FrameBuffer::new(),
            codec: MbapFrameCodec,
            write_buf: BytesMut::new(),
            read_buf: vec![0; settings.read_chunk_size.max(1)],
            session: SessionState::new(session_id, addr),
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Runs the session until it reaches a terminal state, then closes the socket.
    pub async fn run(mut self) -> SessionOutcome {
        debug!(
            "Session {}: started for {}",
            self.session.session_id, self.addr
        );

        let outcome = loop {
            match self.step().await {
                NextAction::Continue => {}
                NextAction::Terminate(outcome) => break outcome,
            }
        };

        match outcome {
            SessionOutcome::InvalidFrame | SessionOutcome::SocketError => {}
            _ => info!(
                "Session {} ({}) ended: {} after {} frames.",
                self.session.session_id, self.addr, outcome, self.session.frames_processed
            ),
        }

        self.close().await;
        outcome
    }

    /// Performs one iteration of the session loop.
    async fn step(&mut self) -> NextAction {
        // The upgraded handle is dropped before the read so the session never
        // keeps the server alive while blocked on the socket.
        match self.state.upgrade() {
            Some(state) if !state.is_terminating() => {}
            _ => return NextAction::Terminate(SessionOutcome::ShuttingDown),
        }

        if self.session.is_idle(self.settings.idle_timeout) {
            debug!(
                "Session {}: idle for {:?}, closing.",
                self.session.session_id,
                self.session.idle_for()
            );
            return NextAction::Terminate(SessionOutcome::IdleTimeout);
        }

        let Some(stream) = self.stream.as_mut() else {
            return NextAction::Terminate(SessionOutcome::SocketError);
        };

        let read = tokio::time::timeout(self.settings.read_timeout, stream.read(&mut self.read_buf));
        let n = match read.await {
            // A quiet socket only ends this iteration.
            Err(_elapsed) => return NextAction::Continue,
            Ok(Ok(0)) => {
                debug!("Connection from {} closed by peer.", self.addr);
                return NextAction::Terminate(SessionOutcome::PeerClosed);
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                self.log_socket_error("read", e.into());
                return NextAction::Terminate(SessionOutcome::SocketError);
            }
        };

        debug!(
            "Session {}: received {} bytes: {}",
            self.session.session_id,
            n,
            hex::encode(&self.read_buf[..n])
        );
        self.session.record_read(n);
        self.buffer.append(&self.read_buf[..n]);

        self.drain().await
    }

    /// Extracts and dispatches every complete frame currently buffered.
    async fn drain(&mut self) -> NextAction {
        loop {
            let frame = match self.buffer.try_extract_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return NextAction::Continue,
                Err(e) => {
                    warn!(
                        "Session {} ({}): malformed stream, closing: {} (buffered: {})",
                        self.session.session_id,
                        self.addr,
                        e,
                        hex::encode(self.buffer.pending())
                    );
                    return NextAction::Terminate(SessionOutcome::InvalidFrame);
                }
            };
            self.session.record_frame();

            let Some(state) = self.state.upgrade() else {
                return NextAction::Terminate(SessionOutcome::ShuttingDown);
            };
            let response = state.process_message(frame);
            drop(state);

            if let Err(outcome) = self.send(response).await {
                return NextAction::Terminate(outcome);
            }
        }
    }

    /// Encodes a response and writes it out completely.
    async fn send(&mut self, response: MbapFrame) -> Result<(), SessionOutcome> {
        self.write_buf.clear();
        if let Err(e) = self.codec.encode(response, &mut self.write_buf) {
            warn!(
                "Session {}: could not encode response: {}",
                self.session.session_id, e
            );
            return Err(if e.is_framing_error() {
                SessionOutcome::InvalidFrame
            } else {
                SessionOutcome::SocketError
            });
        }

        debug!(
            "Session {}: sending {}",
            self.session.session_id,
            hex::encode(&self.write_buf)
        );

        let Some(stream) = self.stream.as_mut() else {
            return Err(SessionOutcome::SocketError);
        };
        let written = match stream.write_all(&self.write_buf).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.log_socket_error("write", e.into());
            return Err(SessionOutcome::SocketError);
        }
        Ok(())
    }

    /// Closes the socket. Safe to call more than once; only the first call acts.
    async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
            Ok(Ok(())) | Err(_) => {}
            Ok(Err(e)) => debug!(
                "Session {}: error while closing socket: {}",
                self.session.session_id, e
            ),
        }
        drop(stream);
    }

    fn log_socket_error(&self, op: &str, e: ModbusError) {
        if is_normal_disconnect(&e) {
            debug!(
                "Connection from {} closed during {}: {}",
                self.addr, op, e
            );
        } else {
            warn!("Connection error for {} during {}: {}", self.addr, op, e);
        }
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &ModbusError) -> bool {
    matches!(e, ModbusError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
