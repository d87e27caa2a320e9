// src/core/state/mod.rs

//! Defines the central `ServerState` struct and its related state components.

mod client;
mod core;
mod stats;

pub use client::*;
pub use core::{ServerInit, ServerState};
pub use stats::StatsState;
