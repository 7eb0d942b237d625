//! Request broker.
//!
//! A single loop owns the coalescing state and drives the current token
//! source generation. For each request it decides whether a new round trip
//! is needed or whether the token of the last round trip can be reused:
//! requests that arrived before that round trip completed share its token.
//! Replies are written by tracked background tasks so a slow client never
//! stalls the loop.

mod request;
mod source;
mod state;

#[cfg(test)]
mod broker_tests;

pub use request::{ReplyError, ReplySink, Request};
pub use source::TokenSource;
pub use state::BrokerState;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use getuid_core::CloseStatus;

use crate::subprocess::{GenerationExit, RoundTripError};
use crate::wake::WakeTrigger;

/// Why a broker loop returned.
#[derive(Debug)]
pub enum LoopExit {
    /// The generation died; the caller should spawn a new one.
    ProcessExited(GenerationExit),
    /// Every request sender is gone.
    InboundClosed,
}

/// Result of writing a token to one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// The write failed after the client had already gone away.
    ClientGone,
    Failed,
}

/// Write `token` to `reply`. Failures for cancelled clients log at debug.
pub(crate) async fn deliver_token(
    reply: Arc<dyn ReplySink>,
    cancel: CancellationToken,
    token: String,
) -> Delivery {
    match reply.send_token(&token).await {
        Ok(()) => Delivery::Sent,
        Err(e) if cancel.is_cancelled() => {
            debug!(error = %e, "Client went away before reply");
            Delivery::ClientGone
        }
        Err(e) => {
            warn!(error = %e, "Could not reply to client");
            Delivery::Failed
        }
    }
}

/// Dispatches inbound requests to the token source.
pub struct Broker {
    inbound: mpsc::Receiver<Request>,
    wake: Arc<dyn WakeTrigger>,
    tasks: TaskTracker,
}

impl Broker {
    /// Create a broker consuming `inbound`.
    ///
    /// Reply deliveries and wake invocations are spawned on `tasks`.
    pub fn new(
        inbound: mpsc::Receiver<Request>,
        wake: Arc<dyn WakeTrigger>,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            inbound,
            wake,
            tasks,
        }
    }

    pub const fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Serve requests from `source` until it exits or the inbound channel
    /// closes.
    ///
    /// Coalescing state starts empty on every call, so the first request
    /// handled for a generation always performs a round trip.
    pub async fn run<S>(&mut self, source: &mut S) -> LoopExit
    where
        S: TokenSource + ?Sized,
    {
        let mut state = BrokerState::new();
        loop {
            // Exit first: a request queued behind a dead generation goes to
            // the next one instead of failing its write.
            tokio::select! {
                biased;
                exit = source.exited() => return LoopExit::ProcessExited(exit),
                request = self.inbound.recv() => {
                    let Some(request) = request else {
                        return LoopExit::InboundClosed;
                    };
                    self.handle(request, source, &mut state).await;
                }
            }
        }
    }

    async fn handle<S>(&self, request: Request, source: &mut S, state: &mut BrokerState)
    where
        S: TokenSource + ?Sized,
    {
        if state.needs_fresh_read(request.arrival()) {
            match source.produce().await {
                Ok(token) => {
                    state.record(token, Instant::now());
                    debug!("Fresh token produced");
                    self.wake.wake(&self.tasks);
                }
                Err(e) => {
                    warn!(error = %e, "Round trip to token source failed");
                    self.reject(request, &e);
                    return;
                }
            }
        } else {
            debug!("Coalesced request with in-flight token");
        }
        self.deliver(request, state.last_token().to_owned());
    }

    fn deliver(&self, request: Request, token: String) {
        let (reply, cancel) = request.into_parts();
        self.tasks.spawn(deliver_token(reply, cancel, token));
    }

    fn reject(&self, request: Request, error: &RoundTripError) {
        let reason = error.close_reason();
        let (reply, _cancel) = request.into_parts();
        self.tasks.spawn(async move {
            if let Err(e) = reply.close(CloseStatus::InternalError, reason).await {
                debug!(error = %e, "Could not close client connection");
            }
        });
    }
}
