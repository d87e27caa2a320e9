// src/core/mod.rs

//! The central module containing the protocol, processing and shared state of the server.

pub mod errors;
pub mod metrics;
pub mod processor;
pub mod protocol;
pub mod state;

pub use errors::ModbusError;
