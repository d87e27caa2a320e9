// src/connection/session.rs

//! Defines the state associated with a single client session.

use crate::config::SessionConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// The terminal states of a session. Every one of them ends with the socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SessionOutcome {
    /// The server's shutdown flag was observed.
    ShuttingDown,
    /// No complete frame arrived within the idle threshold.
    IdleTimeout,
    /// The peer closed its side of the connection.
    PeerClosed,
    /// The byte stream could not be framed.
    InvalidFrame,
    /// Reading from or writing to the socket failed.
    SocketError,
}

/// Timing and sizing policy for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub read_timeout: Duration,
    pub read_chunk_size: usize,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            read_timeout: config.read_timeout(),
            read_chunk_size: config.read_chunk_size,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Holds the state specific to a single client session.
#[derive(Debug)]
pub struct SessionState {
    /// The unique identifier assigned by the acceptor.
    pub session_id: u64,
    /// The network address of the client.
    pub addr: SocketAddr,
    /// The number of frames extracted so far.
    pub frames_processed: u64,
    /// The number of raw bytes read from the socket so far.
    pub bytes_received: u64,
    /// When the last complete frame was extracted (or the session started).
    /// Raw reads do not refresh it.
    last_activity: Instant,
}

impl SessionState {
    /// Creates a new `SessionState` with a fresh liveness clock.
    pub(crate) fn new(session_id: u64, addr: SocketAddr) -> Self {
        Self {
            session_id,
            addr,
            frames_processed: 0,
            bytes_received: 0,
            last_activity: Instant::now(),
        }
    }

    /// Records a successfully extracted frame and refreshes the liveness clock.
    pub(crate) fn record_frame(&mut self) {
        self.frames_processed += 1;
        self.last_activity = Instant::now();
    }

    pub(crate) fn record_read(&mut self, len: usize) {
        self.bytes_received += len as u64;
    }

    /// Time elapsed since the last complete frame.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// True once the session has been idle for longer than `threshold`.
    pub fn is_idle(&self, threshold: Duration) -> bool {
        self.idle_for() > threshold
    }
}
