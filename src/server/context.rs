// src/server/context.rs

use crate::core::processor::RegisterBankProcessor;
use crate::core::state::ServerState;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    /// Handle to the register bank behind `state`, for seeding and inspection.
    pub registers: Arc<RegisterBankProcessor>,
    pub listener: TcpListener,
    /// Tells background tasks (the metrics endpoint) to stop.
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub acceptor: Option<TlsAcceptor>,
    /// One permit per live session, sized by `max_clients`.
    pub connection_permits: Arc<Semaphore>,
}

impl ServerContext {
    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
