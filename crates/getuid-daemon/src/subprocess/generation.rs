//! One lifetime of the external token source.
//!
//! A [`Generation`] owns the child's stdin and stdout. Its stderr is
//! inherited, so the source's diagnostics reach the daemon's stderr
//! unmodified. A background watcher waits on the child and reports the exit
//! through a oneshot channel, which [`Generation::exited`] observes without
//! blocking the broker.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use getuid_core::protocol;

use super::command::CommandSpec;
use super::error::{GenerationExit, RoundTripError, SubprocessError};
use crate::broker::TokenSource;

/// Handle to a running token source process.
#[derive(Debug)]
pub struct Generation {
    id: u64,
    pid: Option<u32>,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    exit_rx: oneshot::Receiver<std::io::Result<ExitStatus>>,
    watcher: JoinHandle<()>,
    tokens_produced: u64,
}

impl Generation {
    /// Spawn a new generation of `command`.
    ///
    /// The child is killed when the returned handle is dropped.
    pub fn spawn(command: &CommandSpec, id: u64) -> Result<Self, SubprocessError> {
        let mut cmd = command.to_command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SubprocessError::SpawnFailed {
            reason: format!("{}: {e}", command.program),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(SubprocessError::MissingPipe { pipe: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SubprocessError::MissingPipe { pipe: "stdout" })?;

        let pid = child.id();
        let (exit_tx, exit_rx) = oneshot::channel();
        let watcher = tokio::spawn(async move {
            let status = child.wait().await;
            debug!(generation = id, ?status, "exit watcher finished");
            let _ = exit_tx.send(status);
        });

        info!(generation = id, pid, command = %command, "Spawned token source");

        Ok(Self {
            id,
            pid,
            stdin,
            stdout: BufReader::new(stdout),
            exit_rx,
            watcher,
            tokens_produced: 0,
        })
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Number of successful round trips so far.
    pub const fn tokens_produced(&self) -> u64 {
        self.tokens_produced
    }

    /// Write one newline and read one line back.
    ///
    /// No timeout: an unresponsive source stalls the caller.
    pub async fn produce(&mut self) -> Result<String, RoundTripError> {
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(RoundTripError::Write)?;
        self.stdin.flush().await.map_err(RoundTripError::Write)?;

        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(RoundTripError::Read)?;
        if read == 0 {
            return Err(RoundTripError::Eof);
        }
        self.tokens_produced += 1;
        Ok(protocol::strip_line_ending(&line).to_owned())
    }

    /// Resolve once the process has exited.
    ///
    /// Cancel safe. Must not be polled again after it has resolved.
    pub async fn exited(&mut self) -> GenerationExit {
        match (&mut self.exit_rx).await {
            Ok(Ok(status)) => GenerationExit::Exited(status),
            Ok(Err(e)) => GenerationExit::Wait(e),
            Err(_) => GenerationExit::WatcherLost,
        }
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        // Dropping the watcher drops the child, which kills it.
        self.watcher.abort();
    }
}

#[async_trait]
impl TokenSource for Generation {
    async fn produce(&mut self) -> Result<String, RoundTripError> {
        Self::produce(self).await
    }

    async fn exited(&mut self) -> GenerationExit {
        Self::exited(self).await
    }
}
