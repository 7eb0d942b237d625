//! getuid Core Library
//!
//! Shared functionality for getuid components:
//! - WebSocket wire contract (path, sub-protocol, version literal, close codes)
//! - Tracing initialization
//! - Common error types

pub mod error;
pub mod protocol;
pub mod tracing_init;

pub use error::{Error, Result};
pub use protocol::{CloseStatus, ProtocolViolation};
