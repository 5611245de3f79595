//! Integration tests for vboxkit

use std::process::Output;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};
use vboxkit::vboxmanage::{ensure_usable, VBoxManageCmd};

use integration_tests::INTEGRATION_TESTS;

mod tests {
    pub mod cli;
    pub mod hostonly;
    pub mod lifecycle;
}

/// Get the path to the vboxkit binary, checking VBOXKIT_PATH env var first, then falling back to "vboxkit"
pub(crate) fn get_vboxkit_command() -> Result<String> {
    if let Ok(path) = std::env::var("VBOXKIT_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/vboxkit", "target/release/vboxkit"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set VBOXKIT_PATH={path} to run using this binary"
        ));
    }
    Ok("vboxkit".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings
pub(crate) struct CapturedOutput {
    pub output: Output,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Create from a raw Output
    pub fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    /// Assert that the command succeeded, printing debug info on failure
    pub fn assert_success(&self, context: &str) {
        assert!(
            self.output.status.success(),
            "{} failed: {}",
            context,
            self.stderr
        );
    }

    /// Check if the command succeeded
    pub fn success(&self) -> bool {
        self.output.status.success()
    }
}

/// A storage root that is removed when dropped
pub(crate) struct TestStorage {
    dir: tempfile::TempDir,
}

impl TestStorage {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::TempDir::new()?,
        })
    }

    pub fn path(&self) -> Result<Utf8PathBuf> {
        Utf8PathBuf::from_path_buf(self.dir.path().to_owned())
            .map_err(|p| eyre!("Non-UTF-8 temp dir: {}", p.display()))
    }

    /// Run vboxkit with `--storage-path` pointing here, capturing output
    pub fn run(&self, args: &[&str]) -> Result<CapturedOutput> {
        let storage = self.path()?;
        let mut full = vec!["--storage-path", storage.as_str()];
        full.extend_from_slice(args);
        run_vboxkit(&full)
    }
}

/// Run the vboxkit command, capturing output
pub(crate) fn run_vboxkit(args: &[&str]) -> Result<CapturedOutput> {
    let bin = get_vboxkit_command()?;
    let output = std::process::Command::new(&bin).args(args).output()?;
    Ok(CapturedOutput::new(output))
}

fn virtualbox_available() -> bool {
    ensure_usable(&VBoxManageCmd::detect()).is_ok()
}

fn main() {
    let args = Arguments::from_args();
    let have_vbox = virtualbox_available();

    // Collect tests from the distributed slice
    let tests: Vec<Trial> = INTEGRATION_TESTS
        .iter()
        .map(|test| {
            let name = test.name;
            let f = test.f;
            Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into()))
                .with_ignored_flag(test.needs_virtualbox && !have_vbox)
        })
        .collect();

    // Run the tests and exit with the result
    libtest_mimic::run(&args, tests).exit();
}
