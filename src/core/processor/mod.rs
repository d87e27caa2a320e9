// src/core/processor/mod.rs

//! The message processor turns one decoded request frame into one response frame.

pub mod register_bank;

pub use register_bank::{RegisterBank, RegisterBankProcessor};

use crate::core::protocol::MbapFrame;

/// Application-level handling of MODBUS requests.
///
/// Implementations must not perform I/O on the client connection: one frame
/// in, one frame out. Errors are expressed as MODBUS exception responses.
pub trait MessageProcessor: Send + Sync + std::fmt::Debug {
    fn process(&self, frame: MbapFrame) -> MbapFrame;
}
