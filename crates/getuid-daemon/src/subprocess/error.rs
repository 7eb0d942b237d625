//! Token source error types.

use std::io;
use std::process::ExitStatus;

use getuid_core::protocol::{REASON_READ_FAILED, REASON_WRITE_FAILED};

/// Errors starting a generation.
#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("Failed to spawn token source: {reason}")]
    SpawnFailed { reason: String },

    #[error("Token source {pipe} was not captured")]
    MissingPipe { pipe: &'static str },
}

/// Failure of one write-then-read exchange with a running generation.
#[derive(Debug, thiserror::Error)]
pub enum RoundTripError {
    #[error("write to token source failed: {0}")]
    Write(#[source] io::Error),

    #[error("read from token source failed: {0}")]
    Read(#[source] io::Error),

    #[error("token source closed its output")]
    Eof,
}

impl RoundTripError {
    /// Close reason reported to the client whose request failed.
    pub const fn close_reason(&self) -> &'static str {
        match self {
            Self::Write(_) => REASON_WRITE_FAILED,
            Self::Read(_) | Self::Eof => REASON_READ_FAILED,
        }
    }
}

/// Why a generation ended. A clean exit is still an exit.
#[derive(Debug, thiserror::Error)]
pub enum GenerationExit {
    #[error("token source exited with {0}")]
    Exited(ExitStatus),

    #[error("waiting for token source failed: {0}")]
    Wait(#[source] io::Error),

    #[error("token source exit watcher stopped")]
    WatcherLost,
}
