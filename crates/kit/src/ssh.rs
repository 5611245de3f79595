//! SSH access to VirtualBox guests
//!
//! Guests are reached through a NAT port forward on the loopback interface,
//! authenticating with a per-machine key pair.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::cmdext::CommandRunExt;

/// Loopback address every forwarded SSH port is bound to
pub const SSH_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

const REACHABLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Combine multiple command arguments into a properly escaped shell command string
///
/// SSH sends commands as strings, not argument arrays, so an argument vector
/// like `["/bin/sh", "-c", "echo hello; sleep 5"]` must be joined into one
/// string that the remote shell splits back the same way.
pub fn shell_escape_command(args: &[String]) -> Result<String, shlex::QuoteError> {
    shlex::try_join(args.iter().map(|s| s.as_str()))
}

/// Represents an SSH keypair with file paths
#[derive(Debug, Clone)]
pub struct SshKeyPair {
    /// Path to the private key file
    pub private_key_path: Utf8PathBuf,
    /// Path to the public key file (typically private_key_path + ".pub")
    pub public_key_path: Utf8PathBuf,
}

/// Generate a new RSA SSH keypair in the specified directory
///
/// Uses the system's `ssh-keygen` with no passphrase; the private key is
/// restricted to its owner.
pub fn generate_ssh_keypair(output_dir: &Utf8Path, key_name: &str) -> Result<SshKeyPair> {
    fs::create_dir_all(output_dir.as_std_path())?;

    let private_key_path = output_dir.join(key_name);
    let public_key_path = output_dir.join(format!("{}.pub", key_name));

    debug!("Generating SSH keypair at {:?}", private_key_path);

    let output = Command::new("ssh-keygen")
        .args([
            "-t",
            "rsa",
            "-b",
            "4096",
            "-f",
            private_key_path.as_str(),
            "-N",
            "",
            "-C",
            &format!("vboxkit-{}", key_name),
        ])
        .run_captured()
        .map_err(|e| eyre!("Failed to execute ssh-keygen: {e}"))?;

    if !output.status.success() {
        return Err(eyre!("ssh-keygen failed: {}", output.stderr));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(private_key_path.as_std_path())?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(private_key_path.as_std_path(), permissions)?;
    }

    debug!("Generated SSH keypair successfully");

    Ok(SshKeyPair {
        private_key_path,
        public_key_path,
    })
}

/// Common SSH options applied to every client invocation
#[derive(Debug, Clone)]
pub struct CommonSshOptions {
    /// Use strict host key checking
    pub strict_host_keys: bool,
    /// SSH connection timeout in seconds
    pub connect_timeout: u32,
    /// Server alive interval in seconds
    pub server_alive_interval: u32,
    /// SSH log level
    pub log_level: String,
    /// Additional SSH options as key-value pairs
    pub extra_options: Vec<(String, String)>,
}

impl Default for CommonSshOptions {
    fn default() -> Self {
        Self {
            strict_host_keys: false,
            connect_timeout: 30,
            server_alive_interval: 60,
            log_level: "ERROR".to_string(),
            extra_options: vec![],
        }
    }
}

impl CommonSshOptions {
    /// Apply these options to an SSH command
    pub fn apply_to_command(&self, cmd: &mut Command) {
        cmd.args(["-o", "IdentitiesOnly=yes"]);
        cmd.args(["-o", "PasswordAuthentication=no"]);
        cmd.args(["-o", "KbdInteractiveAuthentication=no"]);
        cmd.args(["-o", "GSSAPIAuthentication=no"]);

        cmd.args(["-o", &format!("ConnectTimeout={}", self.connect_timeout)]);
        cmd.args([
            "-o",
            &format!("ServerAliveInterval={}", self.server_alive_interval),
        ]);
        cmd.args(["-o", &format!("LogLevel={}", self.log_level)]);

        // Guest host keys change on every recreate.
        if !self.strict_host_keys {
            cmd.args(["-o", "StrictHostKeyChecking=no"]);
            cmd.args(["-o", "UserKnownHostsFile=/dev/null"]);
        }

        for (key, value) in &self.extra_options {
            cmd.args(["-o", &format!("{}={}", key, value)]);
        }
    }
}

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Host address (the forwarded loopback port lives here)
    pub host: Ipv4Addr,
    /// Host side port of the NAT rule
    pub port: u16,
    /// Guest user
    pub user: String,
    /// Private key used for authentication
    pub key_path: Utf8PathBuf,
}

impl SshTarget {
    /// The socket address of the forwarded port.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }
}

/// Everything the driver needs from an SSH implementation
pub trait GuestSsh: std::fmt::Debug + Send + Sync {
    /// Create a key pair `dir/name` and `dir/name.pub`.
    fn generate_keypair(&self, dir: &Utf8Path, name: &str) -> Result<SshKeyPair> {
        generate_ssh_keypair(dir, name)
    }

    /// Whether the forwarded port accepts TCP connections.
    fn is_reachable(&self, target: &SshTarget) -> bool {
        TcpStream::connect_timeout(&target.addr(), REACHABLE_TIMEOUT).is_ok()
    }

    /// Run `command` in the guest and return its stdout.
    fn run(&self, target: &SshTarget, command: &str) -> Result<String>;
}

/// The system OpenSSH client
#[derive(Debug, Clone, Default)]
pub struct OpenSshClient {
    /// Options passed with `-o`
    pub options: CommonSshOptions,
}

impl OpenSshClient {
    fn command(&self, target: &SshTarget, tty: bool) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(["-i", target.key_path.as_str()]);
        self.options.apply_to_command(&mut cmd);
        if tty {
            cmd.arg("-t");
        } else {
            cmd.args(["-o", "BatchMode=yes"]);
        }
        cmd.args(["-p", &target.port.to_string()]);
        cmd.arg(format!("{}@{}", target.user, target.host));
        cmd
    }

    /// Interactive session (or a single command) with inherited stdio.
    pub fn connect(&self, target: &SshTarget, args: &[String]) -> Result<ExitStatus> {
        let mut cmd = self.command(target, args.is_empty());
        if !args.is_empty() {
            let combined = shell_escape_command(args)
                .map_err(|e| eyre!("Failed to escape shell command: {}", e))?;
            debug!("Combined escaped command: {}", combined);
            cmd.arg("--").arg(combined);
        }
        debug!("Executing: {:?}", cmd);
        cmd.status()
            .map_err(|e| eyre!("Failed to execute SSH command: {}", e))
    }
}

impl GuestSsh for OpenSshClient {
    fn run(&self, target: &SshTarget, command: &str) -> Result<String> {
        let mut cmd = self.command(target, false);
        cmd.arg("--").arg(command);
        cmd.stdin(Stdio::null());
        debug!("Executing: {:?}", cmd);
        let out = cmd
            .run_captured()
            .map_err(|e| eyre!("Failed to execute SSH command: {}", e))?;
        debug!("SSH returned: {}\nEND SSH", out.stdout);
        if !out.status.success() {
            return Err(eyre!(
                "SSH command {command:?} failed ({}): {}",
                out.status,
                out.stderr.trim()
            ));
        }
        Ok(out.stdout)
    }
}

/// First IPv4 address in `ip addr show` output.
///
/// Looks for a line like `inet 192.168.59.103/24 brd ... scope global eth1`.
pub fn parse_guest_ip(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        if words.next()? != "inet" {
            return None;
        }
        let (addr, _prefix) = words.next()?.split_once('/')?;
        addr.parse().ok()
    })
}
