// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use super::stream::AnyStream;
use crate::connection::{ConnectionGuard, ConnectionHandler, SessionOutcome};
use crate::core::metrics;
use crate::core::state::{ClientInfo, ServerState};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// How long background tasks get to stop after the shutdown broadcast.
const BACKGROUND_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// The main server loop that accepts connections and handles graceful shutdown.
///
/// Runs until `shutdown` completes or a background task fails. Sessions are
/// then told to stop through the shared termination flag and given
/// `shutdown_grace_seconds` to notice it before they are aborted.
pub async fn serve<F>(ctx: ServerContext, shutdown: F)
where
    F: Future<Output = ()>,
{
    let ServerContext {
        state,
        listener,
        shutdown_tx,
        mut background_tasks,
        acceptor,
        connection_permits,
        ..
    } = ctx;

    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections.");
                break;
            }

            Some(res) = background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        session_id_counter = session_id_counter.wrapping_add(1);
                        spawn_session(
                            &state,
                            acceptor.as_ref(),
                            &connection_permits,
                            &mut client_tasks,
                            socket,
                            addr,
                            session_id_counter,
                        );
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    drop(listener);

    info!("Shutting down. Signalling all sessions.");
    if !state.begin_shutdown() {
        debug!("Termination flag was already raised.");
    }
    if shutdown_tx.send(()).is_err() {
        debug!("No background task was listening for the shutdown signal.");
    }

    let grace = state.config.shutdown_grace();
    let drained = tokio::time::timeout(grace, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await;
    match drained {
        Ok(()) => info!("All client connections closed."),
        Err(_) => {
            warn!(
                "{} sessions still running after {:?}; aborting them.",
                client_tasks.len(),
                grace
            );
            client_tasks.shutdown().await;
        }
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_SHUTDOWN_TIMEOUT, async {
        while background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}

/// Admits one accepted socket and spawns its session task.
fn spawn_session(
    state: &Arc<ServerState>,
    acceptor: Option<&TlsAcceptor>,
    connection_permits: &Arc<Semaphore>,
    client_tasks: &mut JoinSet<()>,
    socket: TcpStream,
    addr: SocketAddr,
    session_id: u64,
) {
    state.stats.increment_total_connections();
    metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

    let Ok(permit) = connection_permits.clone().try_acquire_owned() else {
        warn!(
            "Rejecting connection from {}: max_clients ({}) reached.",
            addr, state.config.max_clients
        );
        state.stats.increment_rejected_connections();
        metrics::CONNECTIONS_REJECTED_TOTAL.inc();
        return;
    };

    info!("Accepted new connection from: {} (session {})", addr, session_id);
    if let Err(e) = socket.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }

    state
        .clients
        .insert(session_id, ClientInfo::new(addr, session_id, acceptor.is_some()));

    let state = state.clone();
    let acceptor = acceptor.cloned();
    client_tasks.spawn(async move {
        let _permit = permit;
        let mut guard = ConnectionGuard::new(Arc::downgrade(&state), session_id, addr);

        let stream = match acceptor {
            Some(acceptor) => {
                let handshake =
                    tokio::time::timeout(state.config.session.idle_timeout(), acceptor.accept(socket));
                match handshake.await {
                    Ok(Ok(tls_stream)) => AnyStream::from(tls_stream),
                    Ok(Err(e)) => {
                        warn!("TLS handshake error for {addr}: {e}");
                        guard.set_outcome(SessionOutcome::SocketError);
                        return;
                    }
                    Err(_) => {
                        warn!("TLS handshake with {addr} timed out.");
                        guard.set_outcome(SessionOutcome::IdleTimeout);
                        return;
                    }
                }
            }
            None => AnyStream::from(socket),
        };
        debug!("Session {session_id}: {addr} ready over {}", stream.transport());

        let handler = ConnectionHandler::new(stream, addr, session_id, &state);
        // The session only keeps a weak handle from here on.
        drop(state);
        let outcome = handler.run().await;
        guard.set_outcome(outcome);
    });
}

/// Completes on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, initiating graceful shutdown."),
        _ = terminate => info!("SIGTERM received, initiating graceful shutdown."),
    }
}
