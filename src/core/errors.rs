// src/core/errors.rs

//! Defines the primary error type for the server.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum for everything below the application bootstrap.
///
/// Framing errors (`InvalidFrame`) are fatal for the connection that produced
/// them. An incomplete frame is not an error; the codec reports it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Invalid MBAP frame: {0}")]
    InvalidFrame(String),
}

// `std::io::Error` is not cloneable, so it lives behind an Arc.
impl Clone for ModbusError {
    fn clone(&self) -> Self {
        match self {
            ModbusError::Io(e) => ModbusError::Io(Arc::clone(e)),
            ModbusError::InvalidFrame(s) => ModbusError::InvalidFrame(s.clone()),
        }
    }
}

impl PartialEq for ModbusError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ModbusError::Io(e1), ModbusError::Io(e2)) => e1.kind() == e2.kind(),
            (ModbusError::InvalidFrame(s1), ModbusError::InvalidFrame(s2)) => s1 == s2,
            _ => false,
        }
    }
}

impl ModbusError {
    /// Returns true for errors that mean the byte stream can no longer be trusted.
    pub fn is_framing_error(&self) -> bool {
        matches!(self, ModbusError::InvalidFrame(_))
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ModbusError {
    fn from(e: std::io::Error) -> Self {
        ModbusError::Io(Arc::new(e))
    }
}
