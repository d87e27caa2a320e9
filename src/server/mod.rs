// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;
mod stream;

pub use connection_loop::{serve, shutdown_signal};
pub use context::ServerContext;
pub use initialization::setup;
pub use stream::AnyStream;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize server state, listener and TLS.
    let mut server_context = setup(config).await?;

    // 2. Spawn background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Accept connections until SIGINT/SIGTERM.
    serve(server_context, shutdown_signal()).await;

    Ok(())
}
