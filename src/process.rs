//! Timeout-bounded subprocess invocation shared by the CLI-backed control
//! surfaces.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, RouterError};

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Convert a non-zero exit into `RouterError::CommandFailed`.
    pub fn check(self, program: &'static str, args: &[&str]) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(RouterError::CommandFailed {
                program,
                args: args.join(" "),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Run `program args...`, killing it if it outlives `limit`.
pub async fn run(program: &'static str, args: &[&str], limit: Duration) -> Result<CommandOutput> {
    debug!("Running {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = timeout(limit, child)
        .await
        .map_err(|_| RouterError::Timeout(format!("{} {}", program, args.join(" "))))??;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
