//! Command line of the external token source.

use std::fmt;

use tokio::process::Command;

/// Daemon variables that spawned helpers must not inherit.
///
/// `NOTIFY_SOCKET` would let a helper send readiness messages that systemd
/// attributes to the daemon's unit.
pub(crate) const SCRUBBED_ENV: &[&str] = &["NOTIFY_SOCKET"];

/// Remove [`SCRUBBED_ENV`] from `cmd`'s environment.
pub(crate) fn scrub_env(cmd: &mut Command) -> &mut Command {
    for key in SCRUBBED_ENV {
        cmd.env_remove(key);
    }
    cmd
}

/// Program and arguments used to spawn each generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from `command [args...]`. Returns `None` for an empty list.
    pub fn from_argv(argv: Vec<String>) -> Option<Self> {
        let mut argv = argv.into_iter();
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
        })
    }

    /// Run `script` through `sh -c`.
    pub fn shell(script: &str) -> Self {
        Self::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    /// Tokio command for one generation, with [`SCRUBBED_ENV`] removed.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        scrub_env(&mut cmd);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
