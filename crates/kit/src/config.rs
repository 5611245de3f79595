//! Machine configuration and the small amount of runtime state

use std::net::Ipv4Addr;
use std::time::Duration;

use camino::Utf8Path;
use color_eyre::{
    eyre::{eyre, Context as _},
    Result,
};
use serde::{Deserialize, Serialize};

use crate::poll::PollPolicy;

/// Virtual CPUs when nothing is configured
pub const DEFAULT_CPUS: i32 = 1;
/// Memory in MB when nothing is configured
pub const DEFAULT_MEMORY_MB: u32 = 1024;
/// Disk size in MB when nothing is configured
pub const DEFAULT_DISK_SIZE_MB: u32 = 20000;
/// Host side address of the host-only network
pub const DEFAULT_HOSTONLY_CIDR: &str = "192.168.99.1/24";
/// NIC model for both adapters
pub const DEFAULT_NICTYPE: &str = "82540EM";
/// Promiscuous mode of the host-only adapter
pub const DEFAULT_NICPROMISC: &str = "deny";
/// Guest login user
pub const DEFAULT_SSH_USER: &str = "docker";
/// Guest interface on the host-only network
pub const DEFAULT_GUEST_INTERFACE: &str = "eth1";
/// Port of the guest daemon advertised by the machine URL
pub const DEFAULT_DAEMON_PORT: u16 = 2376;
/// VirtualBox refuses more than this many virtual CPUs
pub const MAX_CPUS: u32 = 32;
/// Upper bound for `poll-interval`, in seconds
pub const MAX_POLL_INTERVAL: u64 = 300;

/// Static configuration of one machine
///
/// Loaded from TOML (kebab-case keys); every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DriverConfig {
    /// Virtual CPUs; zero or less means all host cores
    pub cpus: i32,
    /// Memory in MB
    pub memory: u32,
    /// Disk size in MB
    pub disk_size: u32,
    /// Boot ISO URL; empty uses the cached default
    pub boot2docker_url: String,
    /// Host side address and prefix of the host-only network
    pub hostonly_cidr: String,
    /// Existing VM whose disk and key are cloned
    pub import_vm: Option<String>,
    /// Resolve guest DNS through the host resolver
    pub host_dns_resolver: bool,
    /// NIC model of the NAT adapter
    pub nat_nictype: String,
    /// NIC model of the host-only adapter
    pub hostonly_nictype: String,
    /// Promiscuous mode of the host-only adapter
    pub hostonly_nicpromisc: String,
    /// Disable the default shared folder
    pub no_share: bool,
    /// `hostdir[:name]` shared instead of the platform default
    pub share_folder: Option<String>,
    /// Guest user for SSH
    pub ssh_user: String,
    /// Preferred host port for SSH forwarding (0 = any)
    pub ssh_port: u16,
    /// Guest interface attached to the host-only network
    pub guest_interface: String,
    /// Port the guest daemon listens on
    pub daemon_port: u16,
    /// Waiting behaviour
    pub timeouts: TimeoutConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cpus: DEFAULT_CPUS,
            memory: DEFAULT_MEMORY_MB,
            disk_size: DEFAULT_DISK_SIZE_MB,
            boot2docker_url: String::new(),
            hostonly_cidr: DEFAULT_HOSTONLY_CIDR.to_string(),
            import_vm: None,
            host_dns_resolver: false,
            nat_nictype: DEFAULT_NICTYPE.to_string(),
            hostonly_nictype: DEFAULT_NICTYPE.to_string(),
            hostonly_nicpromisc: DEFAULT_NICPROMISC.to_string(),
            no_share: false,
            share_folder: None,
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_port: 0,
            guest_interface: DEFAULT_GUEST_INTERFACE.to_string(),
            daemon_port: DEFAULT_DAEMON_PORT,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Load from a TOML file.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config file: {}", path))
    }

    /// Write as TOML, replacing `path`.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Serializing config")?;
        std::fs::write(path, content).with_context(|| format!("Writing {path}"))
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.timeouts.validate()?;
        Ok(config)
    }

    /// CPU count to configure, given the number of host cores.
    pub fn effective_cpus(&self, host_cpus: u32) -> u32 {
        let cpus = match u32::try_from(self.cpus) {
            Ok(n) if n > 0 => n,
            _ => host_cpus,
        };
        cpus.clamp(1, MAX_CPUS)
    }
}

/// Number of logical CPUs on this host.
pub fn host_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(MAX_CPUS))
        .unwrap_or(1)
}

/// Timeouts and retry spacing, all in seconds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TimeoutConfig {
    /// Graceful or forced power off
    pub stop: u64,
    /// SSH port accepting connections after start
    pub ssh: u64,
    /// Number of guest address lookups
    pub ip_attempts: u32,
    /// Spacing between guest address lookups
    pub ip_interval: u64,
    /// Initial spacing of state polling
    pub poll_interval: u64,
    /// Pause before unregistering so VirtualBox drops its lock
    pub lock_release: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stop: 120,
            ssh: 180,
            ip_attempts: 5,
            ip_interval: 4,
            poll_interval: 1,
            lock_release: 1,
        }
    }
}

impl TimeoutConfig {
    /// No waiting at all; used by tests driving a fake hypervisor.
    pub fn immediate() -> Self {
        Self {
            stop: 0,
            ssh: 0,
            ip_attempts: 1,
            ip_interval: 0,
            poll_interval: 0,
            lock_release: 0,
        }
    }

    /// Reject values that would make polling spin or never wake up.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_POLL_INTERVAL).contains(&self.poll_interval) {
            return Err(eyre!(
                "timeouts.poll-interval must be between 1 and {MAX_POLL_INTERVAL} seconds, got {}",
                self.poll_interval
            ));
        }
        Ok(())
    }

    /// Polling for power state convergence.
    pub fn stop_policy(&self) -> PollPolicy {
        let interval = Duration::from_secs(self.poll_interval);
        let max_interval = interval.checked_mul(5).unwrap_or(Duration::MAX);
        PollPolicy::backoff(interval, max_interval, Duration::from_secs(self.stop))
    }

    /// Polling for the forwarded SSH port.
    pub fn ssh_policy(&self) -> PollPolicy {
        PollPolicy::fixed(
            Duration::from_secs(self.poll_interval),
            Duration::from_secs(self.ssh),
        )
    }

    /// Pause before `unregistervm`.
    pub fn lock_release(&self) -> Duration {
        Duration::from_secs(self.lock_release)
    }

    /// Spacing between guest address lookups.
    pub fn ip_interval(&self) -> Duration {
        Duration::from_secs(self.ip_interval)
    }
}

/// What the driver learned at runtime; never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeState {
    /// Guest address on the host-only network
    pub ip: Option<Ipv4Addr>,
    /// Host side SSH port
    pub ssh_port: Option<u16>,
}
