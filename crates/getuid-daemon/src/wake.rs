//! Wake trigger run after each freshly produced token.
//!
//! The default turns the attached display back on (`xset dpms force on` on
//! `DISPLAY=:0`). Invocations are fire-and-forget: failures are logged and
//! never reach the broker.

use tokio::process::Command;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use getuid_core::{Error, Result};

use crate::subprocess::command::scrub_env;

/// Default wake command line.
pub const DEFAULT_WAKE_COMMAND: &str = "xset dpms force on";

/// Default X display targeted by the wake command.
pub const DEFAULT_WAKE_DISPLAY: &str = ":0";

/// Side effect triggered by a fresh token.
pub trait WakeTrigger: Send + Sync {
    /// Start the side effect on `tasks` and return immediately.
    fn wake(&self, tasks: &TaskTracker);
}

/// Wake trigger that runs an external command.
#[derive(Debug, Clone)]
pub struct CommandWake {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandWake {
    /// Parse a whitespace-separated command line targeting `display`.
    pub fn parse(command_line: &str, display: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(str::to_owned);
        let program = words
            .next()
            .ok_or_else(|| Error::Config("wake command is empty".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
            env: vec![("DISPLAY".to_string(), display.to_string())],
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Run the command to completion, logging any failure.
    pub async fn run(&self) {
        let mut cmd = Command::new(&self.program);
        scrub_env(cmd.args(&self.args).envs(self.env.iter().map(|(k, v)| (k, v))));
        let status = cmd.status().await;
        match status {
            Ok(status) if status.success() => debug!(program = %self.program, "Wake command ran"),
            Ok(status) => warn!(program = %self.program, %status, "Wake command failed"),
            Err(e) => warn!(program = %self.program, error = %e, "Could not run wake command"),
        }
    }
}

impl WakeTrigger for CommandWake {
    fn wake(&self, tasks: &TaskTracker) {
        let this = self.clone();
        tasks.spawn(async move { this.run().await });
    }
}

/// Wake trigger that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWake;

impl WakeTrigger for NoWake {
    fn wake(&self, _tasks: &TaskTracker) {}
}
