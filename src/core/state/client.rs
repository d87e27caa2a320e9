// src/core/state/client.rs

//! Contains state definitions related to client connections.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Live sessions keyed by session id. Entries are added by the acceptor and
/// removed by the session's `ConnectionGuard`.
pub type ClientMap = Arc<DashMap<u64, ClientInfo>>;

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub session_id: u64,
    pub created: Instant,
    pub tls: bool,
}

impl ClientInfo {
    pub fn new(addr: SocketAddr, session_id: u64, tls: bool) -> Self {
        Self {
            addr,
            session_id,
            created: Instant::now(),
            tls,
        }
    }
}
