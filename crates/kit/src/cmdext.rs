//! Running child processes to completion

use std::process::{Command, ExitStatus, Stdio};

/// Output of a finished child process with stdout/stderr decoded lossily
#[derive(Debug)]
pub struct CapturedOutput {
    /// Exit status of the child
    pub status: ExitStatus,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Capture helper for [`Command`]
pub trait CommandRunExt {
    /// Run to completion, capturing both output streams separately.
    fn run_captured(&mut self) -> std::io::Result<CapturedOutput>;
}

impl CommandRunExt for Command {
    fn run_captured(&mut self) -> std::io::Result<CapturedOutput> {
        let out = self
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        Ok(CapturedOutput {
            status: out.status,
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}
