//! Outer restart loop around the broker.
//!
//! The supervisor spawns a generation, lets the broker serve it until the
//! process exits, then spawns the next one. Spawn failures are retried with
//! back-off; it only stops on shutdown or when no request sender is left.

use std::time::Instant;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::command::CommandSpec;
use super::generation::Generation;
use super::policy::RestartPolicy;
use crate::broker::{Broker, LoopExit};

/// Keeps one generation of the token source alive at a time.
#[derive(Debug, Clone)]
pub struct Supervisor {
    command: CommandSpec,
    policy: RestartPolicy,
}

impl Supervisor {
    pub const fn new(command: CommandSpec, policy: RestartPolicy) -> Self {
        Self { command, policy }
    }

    /// Run until `shutdown` is cancelled or the broker's inbound channel
    /// closes.
    ///
    /// A request the broker has already dequeued when shutdown interrupts it
    /// is dropped without a reply.
    pub async fn run(&self, broker: &mut Broker, shutdown: &CancellationToken) {
        let mut attempt: u32 = 0;
        let mut next_id: u64 = 1;

        loop {
            if shutdown.is_cancelled() {
                info!("Supervisor shutting down");
                return;
            }

            match Generation::spawn(&self.command, next_id) {
                Ok(mut generation) => {
                    next_id += 1;
                    let started = Instant::now();

                    let exit = tokio::select! {
                        exit = broker.run(&mut generation) => exit,
                        () = shutdown.cancelled() => {
                            info!(generation = generation.id(), "Supervisor shutting down");
                            return;
                        }
                    };

                    match exit {
                        LoopExit::InboundClosed => {
                            info!("Request channel closed, supervisor stopping");
                            return;
                        }
                        LoopExit::ProcessExited(exit) => {
                            let uptime = started.elapsed();
                            let served = generation.tokens_produced();
                            attempt = self.policy.attempt_after_exit(attempt, uptime, served);
                            warn!(
                                generation = generation.id(),
                                error = %exit,
                                uptime_ms = uptime.as_millis(),
                                tokens = served,
                                "Token source exited"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Could not start token source");
                }
            }

            let delay = self.policy.delay_for_attempt(attempt);
            info!(delay_ms = delay.as_millis(), attempt, "Restarting token source");
            tokio::select! {
                () = sleep(delay) => {}
                () = shutdown.cancelled() => {
                    info!("Supervisor shutting down during restart wait");
                    return;
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }
}
