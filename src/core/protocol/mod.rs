// src/core/protocol/mod.rs

pub mod mbap_frame;
pub mod pdu;
pub use mbap_frame::{MbapFrame, MbapFrameCodec};
pub use pdu::{ExceptionCode, FunctionCode, Request, Response};
