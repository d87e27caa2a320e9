// src/connection/mod.rs

//! Manages the lifecycle and state of individual client connections.

mod buffer;
mod guard;
mod handler;
mod session;

pub use buffer::FrameBuffer;
pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use session::{SessionOutcome, SessionSettings, SessionState};
