//! Inbound token requests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use getuid_core::CloseStatus;

/// Errors writing an outcome to a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("connection already closed")]
    Closed,
}

/// The client side of a request: where its outcome is written.
///
/// Implemented by the session layer for its own connection. The broker only
/// ever calls one of the two methods per request.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Deliver a token.
    async fn send_token(&self, token: &str) -> Result<(), ReplyError>;

    /// Close the connection with an abnormal status.
    async fn close(&self, status: CloseStatus, reason: &str) -> Result<(), ReplyError>;
}

/// One client demand for a token.
///
/// Created by the session layer when a valid message arrives and consumed
/// exactly once by the broker.
pub struct Request {
    reply: Arc<dyn ReplySink>,
    cancel: CancellationToken,
    arrived_at: Instant,
}

impl Request {
    /// Create a request stamped with the current time.
    pub fn new(reply: Arc<dyn ReplySink>, cancel: CancellationToken) -> Self {
        Self::arrived_at(reply, cancel, Instant::now())
    }

    /// Create a request with an explicit arrival time.
    pub fn arrived_at(
        reply: Arc<dyn ReplySink>,
        cancel: CancellationToken,
        arrived_at: Instant,
    ) -> Self {
        Self {
            reply,
            cancel,
            arrived_at,
        }
    }

    pub const fn arrival(&self) -> Instant {
        self.arrived_at
    }

    pub(crate) fn into_parts(self) -> (Arc<dyn ReplySink>, CancellationToken) {
        (self.reply, self.cancel)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("arrived_at", &self.arrived_at)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
