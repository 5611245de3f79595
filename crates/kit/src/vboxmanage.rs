//! Invoking `VBoxManage`, the only control plane we have for VirtualBox
//!
//! Every interaction with the hypervisor goes through the [`VBoxManage`]
//! trait so that driver logic can be exercised against a scripted fake.

use std::fmt::Debug;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::eyre, Result};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::cmdext::CommandRunExt;
use crate::error::VBoxError;

/// Name of the management binary
pub const VBOXMANAGE: &str = "VBoxManage";

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VBoxOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error (may carry warnings even on success)
    pub stderr: String,
}

/// Something that can run `VBoxManage` subcommands
///
/// Failures surface as [`VBoxError::ToolNotFound`] or
/// [`VBoxError::CommandFailed`], the latter carrying the captured stderr so
/// callers can pattern-match on known messages.
pub trait VBoxManage: Debug + Send + Sync {
    /// Run with the given arguments, capturing stdout and stderr separately.
    fn run_combined(&self, args: &[&str]) -> Result<VBoxOutput>;

    /// Run and return stdout.
    fn run(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_combined(args)?.stdout)
    }

    /// Run and discard output.
    fn exec(&self, args: &[&str]) -> Result<()> {
        self.run_combined(args).map(|_| ())
    }
}

/// Runs the real `VBoxManage` binary
#[derive(Debug, Clone)]
pub struct VBoxManageCmd {
    binary: Utf8PathBuf,
}

impl VBoxManageCmd {
    /// Use an explicit binary path.
    pub fn new(binary: impl Into<Utf8PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate the binary from the VirtualBox install variables, falling back to `PATH`.
    pub fn detect() -> Self {
        for var in ["VBOX_INSTALL_PATH", "VBOX_MSI_INSTALL_PATH"] {
            if let Some(dir) = std::env::var_os(var) {
                if let Some(found) = find_in_dirs(std::env::split_paths(&dir)) {
                    return Self::new(found);
                }
            }
        }
        #[cfg(windows)]
        {
            let default_dir = std::path::PathBuf::from(r"C:\Program Files\Oracle\VirtualBox");
            if let Some(found) = find_in_dirs(std::iter::once(default_dir)) {
                return Self::new(found);
            }
        }
        if let Some(path) = std::env::var_os("PATH") {
            if let Some(found) = find_in_dirs(std::env::split_paths(&path)) {
                return Self::new(found);
            }
        }
        // Let the first invocation report ToolNotFound.
        Self::new(VBOXMANAGE)
    }

    /// The binary that will be executed
    pub fn binary(&self) -> &Utf8Path {
        &self.binary
    }

    fn command_line(&self, args: &[&str]) -> String {
        std::iter::once(self.binary.as_str())
            .chain(args.iter().copied())
            .join(" ")
    }
}

fn find_in_dirs(dirs: impl Iterator<Item = std::path::PathBuf>) -> Option<Utf8PathBuf> {
    let name = if cfg!(windows) {
        "VBoxManage.exe"
    } else {
        VBOXMANAGE
    };
    dirs.map(|d| d.join(name))
        .find(|p| p.is_file())
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
}

impl VBoxManage for VBoxManageCmd {
    fn run_combined(&self, args: &[&str]) -> Result<VBoxOutput> {
        let command = self.command_line(args);
        debug!("COMMAND: {command}");

        let out = match Command::new(self.binary.as_std_path())
            .args(args)
            .run_captured()
        {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VBoxError::ToolNotFound.into())
            }
            Err(e) => return Err(eyre!("Failed to execute {command}: {e}")),
        };
        debug!("STDOUT:\n{{\n{}}}", out.stdout);
        debug!("STDERR:\n{{\n{}}}", out.stderr);

        // VBoxManage sometimes exits 0 after a fatal error such as
        // "error: VT-x is not available", so stderr is checked as well.
        if !out.status.success() || out.stderr.contains("error:") {
            return Err(VBoxError::CommandFailed {
                command,
                stderr: out.stderr,
            }
            .into());
        }

        Ok(VBoxOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }
}

/// Parse the leading `major.minor` of a `VBoxManage --version` string.
fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Reject VirtualBox installs older than 4.3 and warn below 5.
pub fn check_version(version: &str) -> Result<()> {
    let version = version.trim();
    match parse_version(version) {
        Some((major, minor)) if major > 4 || (major == 4 && minor > 2) => {
            if major < 5 {
                warn!("You are using version {version} of VirtualBox. If you encounter issues, you might want to upgrade to version 5 at https://www.virtualbox.org");
            }
            Ok(())
        }
        _ => Err(VBoxError::UnsupportedVersion(version.to_string()).into()),
    }
}

/// Make sure the tool is reachable and recent enough.
pub fn ensure_usable(vbox: &dyn VBoxManage) -> Result<()> {
    let version = vbox.run(&["--version"])?;
    debug!("VBoxManage version: {}", version.trim());
    check_version(&version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("7.0.10r158379"), Some((7, 0)));
        assert_eq!(parse_version("5.1r100\n"), Some((5, 1)));
        assert_eq!(parse_version("4.3.0"), Some((4, 3)));
        assert_eq!(parse_version("7"), None);
        assert_eq!(parse_version("garbage"), None);
    }

    #[test]
    fn test_check_version() {
        assert!(check_version("7.0.10r158379").is_ok());
        assert!(check_version("5.0.0").is_ok());
        assert!(check_version("4.3.12").is_ok());
        let err = check_version("4.2.1").unwrap_err();
        assert!(VBoxError::matches(&err, |e| matches!(
            e,
            VBoxError::UnsupportedVersion(_)
        )));
        assert!(check_version("").is_err());
    }

    #[test]
    fn test_missing_binary() {
        let vbox = VBoxManageCmd::new("/nonexistent/VBoxManage");
        let err = vbox.run(&["list", "vms"]).unwrap_err();
        assert!(VBoxError::matches(&err, |e| matches!(
            e,
            VBoxError::ToolNotFound
        )));
    }

    #[test]
    fn test_failure_carries_stderr() {
        // Any binary that writes to stderr and exits non-zero stands in here.
        let vbox = VBoxManageCmd::new("sh");
        let err = vbox
            .run(&["-c", "echo 'VBoxManage: error: nope' >&2; exit 1"])
            .unwrap_err();
        match err.downcast_ref::<VBoxError>() {
            Some(VBoxError::CommandFailed { command, stderr }) => {
                assert!(command.starts_with("sh -c"));
                assert!(stderr.contains("error: nope"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_error_on_stderr_with_zero_exit() {
        let vbox = VBoxManageCmd::new("sh");
        let err = vbox
            .run(&["-c", "echo 'error: VT-x is not available' >&2"])
            .unwrap_err();
        assert!(VBoxError::matches(&err, |e| matches!(
            e,
            VBoxError::CommandFailed { .. }
        )));
        let out = vbox.run(&["-c", "echo fine"]).unwrap();
        assert_eq!(out, "fine\n");
    }
}
