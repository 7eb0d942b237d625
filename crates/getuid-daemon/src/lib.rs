//! getuid Daemon Library
//!
//! Core functionality for the getuid daemon:
//! - Subprocess supervision for the external token source
//! - Request brokering with round-trip coalescing
//! - Wake trigger after fresh tokens
//! - WebSocket session handling

pub mod broker;
pub mod server;
pub mod subprocess;
pub mod wake;
