// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use super::session::SessionOutcome;
use crate::core::metrics;
use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Weak;
use tracing::debug;

/// Label used when a session ends without reaching a terminal state
/// (its task was aborted or panicked).
const ABORTED_LABEL: &str = "aborted";

/// An RAII guard to ensure connection bookkeeping is always cleaned up when a
/// connection handler's scope is exited.
pub struct ConnectionGuard {
    /// A non-owning reference to the server state.
    pub(crate) state: Weak<ServerState>,
    /// The unique identifier for the client session.
    pub(crate) session_id: u64,
    /// The network address of the client.
    pub(crate) addr: SocketAddr,
    /// The terminal state the session reached, if any.
    pub(crate) outcome: Option<SessionOutcome>,
}

impl ConnectionGuard {
    /// Creates a new `ConnectionGuard` and counts the session as connected.
    pub(crate) fn new(state: Weak<ServerState>, session_id: u64, addr: SocketAddr) -> Self {
        metrics::CONNECTED_CLIENTS.inc();
        Self {
            state,
            session_id,
            addr,
            outcome: None,
        }
    }

    /// Records the terminal state the session ended in.
    pub(crate) fn set_outcome(&mut self, outcome: SessionOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for ConnectionGuard {
    /// Removes the client from the global map and records why the session ended.
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        let reason: &'static str = self.outcome.map(Into::into).unwrap_or(ABORTED_LABEL);
        metrics::SESSION_TERMINATIONS_TOTAL
            .with_label_values(&[reason])
            .inc();

        debug!(
            "ConnectionGuard dropping, cleaning up session {} ({}) after {}",
            self.session_id, self.addr, reason
        );

        // The server may already be gone; there is nothing to deregister then.
        if let Some(state) = self.state.upgrade()
            && state.clients.remove(&self.session_id).is_none()
        {
            debug!(
                "Client {} was not in the global state map upon cleanup.",
                self.addr
            );
        }
    }
}
