// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use super::client::ClientMap;
use super::stats::StatsState;
use crate::config::Config;
use crate::core::metrics;
use crate::core::processor::{MessageProcessor, RegisterBankProcessor};
use crate::core::protocol::MbapFrame;
use crate::core::protocol::pdu::EXCEPTION_FLAG;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::info;

/// The result of initializing the server state.
pub struct ServerInit {
    /// The fully initialized, shared server state.
    pub state: Arc<ServerState>,
    /// A handle to the register bank the state dispatches to, for seeding values.
    pub registers: Arc<RegisterBankProcessor>,
}

/// The central struct holding all shared, server-wide state.
///
/// Sessions only hold a `Weak` reference to it and use it for exactly two
/// things: reading the shutdown flag and dispatching frames.
#[derive(Debug)]
pub struct ServerState {
    /// The server's configuration. It does not change at runtime.
    pub config: Arc<Config>,
    /// A map of all active client connections, keyed by session ID.
    pub clients: ClientMap,
    /// Holds all server-wide statistics.
    pub stats: StatsState,
    /// The application-level request handler.
    processor: Arc<dyn MessageProcessor>,
    /// Set once when the server begins shutting down. Never reset.
    is_terminating: AtomicBool,
}

impl ServerState {
    /// Creates the state around an arbitrary processor.
    pub fn new(config: Config, processor: Arc<dyn MessageProcessor>) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            clients: Arc::new(DashMap::new()),
            stats: StatsState::new(),
            processor,
            is_terminating: AtomicBool::new(false),
        })
    }

    /// Initializes the server state with the built-in register bank.
    pub fn initialize(config: Config) -> ServerInit {
        let registers = Arc::new(RegisterBankProcessor::new(&config.registers));
        info!(
            "Register bank ready: {} coils, {} discrete inputs, {} holding registers, {} input registers.",
            config.registers.coils,
            config.registers.discrete_inputs,
            config.registers.holding_registers,
            config.registers.input_registers
        );
        let state = Self::new(config, registers.clone());
        ServerInit { state, registers }
    }

    /// Returns true once shutdown has begun.
    pub fn is_terminating(&self) -> bool {
        self.is_terminating.load(Ordering::Acquire)
    }

    /// Raises the shutdown flag. Returns false if it was already raised.
    pub fn begin_shutdown(&self) -> bool {
        !self.is_terminating.swap(true, Ordering::AcqRel)
    }

    /// Hands one request frame to the processor and returns its response.
    pub fn process_message(&self, frame: MbapFrame) -> MbapFrame {
        let started = Instant::now();
        let response = self.processor.process(frame);

        self.stats.increment_total_frames();
        metrics::FRAMES_PROCESSED_TOTAL.inc();
        metrics::FRAME_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
        if response
            .function_code()
            .is_some_and(|fc| fc & EXCEPTION_FLAG != 0)
        {
            metrics::EXCEPTION_RESPONSES_TOTAL.inc();
        }
        response
    }
}
