//! The VirtualBox machine driver
//!
//! A [`Driver`] owns one machine: its immutable [`DriverConfig`], the
//! per-machine directory, and the collaborators used to reach VirtualBox,
//! the guest and the boot image source. All operations block until the
//! hypervisor reports the expected state or a configured timeout expires.
//!
//! Host-only networks are shared between machines and created without
//! locking; running `create` for several machines at once on the same host
//! can produce duplicate interfaces. Callers that need that must serialize
//! machine creation themselves.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use tracing::debug;

use crate::bootimage::{BootImageProvider, HttpBootImageCache};
use crate::config::{DriverConfig, RuntimeState};
use crate::error::VBoxError;
use crate::ssh::{GuestSsh, OpenSshClient, SshTarget, SSH_HOST};
use crate::state::{is_machine_not_found, VmState};
use crate::store::{MachineDir, Store};
use crate::vboxmanage::VBoxManage;
use crate::vminfo::{self, VirtualDisk, VmInfo};

mod create;
mod guest;
mod power;
pub mod share;

use share::HostPlatform;

/// Name this driver registers under
pub const DRIVER_NAME: &str = "virtualbox";
/// NAT rule carrying SSH
pub const SSH_RULE: &str = "ssh";
/// Guest SSH port
pub const GUEST_SSH_PORT: u16 = 22;

/// Controls the lifecycle of one VirtualBox machine
#[derive(Debug)]
pub struct Driver {
    name: String,
    vbox: Arc<dyn VBoxManage>,
    ssh: Box<dyn GuestSsh>,
    images: Box<dyn BootImageProvider>,
    machine: MachineDir,
    config: DriverConfig,
    runtime: RuntimeState,
    platform: HostPlatform,
    home_dir: Option<Utf8PathBuf>,
}

/// Summary printed by `inspect`
#[derive(Debug, Clone, Serialize)]
pub struct MachineInfo {
    /// Machine name
    pub name: String,
    /// Always [`DRIVER_NAME`]
    pub driver: &'static str,
    /// Power state
    pub state: VmState,
    /// Host side SSH port, if a forward exists
    pub ssh_port: Option<u16>,
    /// Virtual CPUs
    pub cpus: u32,
    /// Memory in MB
    pub memory_mb: u32,
    /// Primary disk
    pub disk: VirtualDisk,
    /// Directory holding key, disk and ISO
    pub machine_dir: Utf8PathBuf,
}

impl Driver {
    /// Driver for machine `name` stored under `store`, using the system SSH
    /// client and the shared boot image cache.
    pub fn new(
        name: impl Into<String>,
        store: &Store,
        vbox: Arc<dyn VBoxManage>,
        config: DriverConfig,
    ) -> Self {
        let name = name.into();
        Self {
            machine: store.machine(&name),
            images: Box::new(HttpBootImageCache::new(store.cache_dir())),
            ssh: Box::new(OpenSshClient::default()),
            name,
            vbox,
            config,
            runtime: RuntimeState::default(),
            platform: HostPlatform::current(),
            home_dir: dirs::home_dir().and_then(|p| Utf8PathBuf::from_path_buf(p).ok()),
        }
    }

    /// Replace the SSH collaborator.
    pub fn with_ssh(mut self, ssh: Box<dyn GuestSsh>) -> Self {
        self.ssh = ssh;
        self
    }

    /// Replace the boot image collaborator.
    pub fn with_boot_images(mut self, images: Box<dyn BootImageProvider>) -> Self {
        self.images = images;
        self
    }

    /// Override the host platform used for shared folder defaults.
    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    /// Override the home directory the clone path imports keys from.
    pub fn with_home_dir(mut self, home: impl Into<Utf8PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    /// Identifier of this driver kind.
    pub fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    /// Machine name as registered with VirtualBox.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the machine was created with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// What has been learned from the hypervisor so far.
    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    /// Directory holding the disk, ISO, key and saved config.
    pub fn machine_dir(&self) -> &Utf8Path {
        self.machine.path()
    }

    /// Host to connect to for SSH; always loopback through the NAT rule.
    pub fn ssh_hostname(&self) -> String {
        SSH_HOST.to_string()
    }

    /// Guest login user.
    pub fn ssh_username(&self) -> &str {
        &self.config.ssh_user
    }

    /// Private key installed in the guest.
    pub fn ssh_key_path(&self) -> Utf8PathBuf {
        self.machine.ssh_key()
    }

    /// Current power state.
    ///
    /// An unregistered machine yields [`VBoxError::MachineNotExist`].
    pub fn get_state(&self) -> Result<VmState> {
        match self
            .vbox
            .run(&["showvminfo", &self.name, "--machinereadable"])
        {
            Ok(stdout) => Ok(VmState::from_vminfo(&stdout)),
            Err(e) => {
                let missing = matches!(
                    e.downcast_ref::<VBoxError>(),
                    Some(VBoxError::CommandFailed { stderr, .. }) if is_machine_not_found(stderr)
                );
                if missing {
                    Err(VBoxError::MachineNotExist.into())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Host port of the SSH forward, from the cache or the VM's NAT rules.
    pub fn ssh_port(&mut self) -> Result<u16> {
        if let Some(port) = self.runtime.ssh_port {
            return Ok(port);
        }
        let port = vminfo::get_forwarded_port(self.vbox.as_ref(), &self.name, SSH_RULE)?
            .ok_or_else(|| eyre!("No SSH port forwarding configured for {}", self.name))?;
        debug!("Found SSH port {port} for {}", self.name);
        self.runtime.ssh_port = Some(port);
        Ok(port)
    }

    /// Where to reach the guest over SSH.
    pub fn ssh_target(&mut self) -> Result<SshTarget> {
        Ok(SshTarget {
            host: SSH_HOST,
            port: self.ssh_port()?,
            user: self.config.ssh_user.clone(),
            key_path: self.machine.ssh_key(),
        })
    }

    /// `tcp://<ip>:<daemon port>`, or `None` while the guest has no address.
    pub fn get_url(&mut self) -> Result<Option<String>> {
        match self.get_ip() {
            Ok(ip) => Ok(Some(format!("tcp://{ip}:{}", self.config.daemon_port))),
            Err(e) if VBoxError::matches(&e, |e| matches!(e, VBoxError::NoGuestIp(_))) => {
                debug!("{e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// State, resources, disk and SSH port in one structure.
    pub fn inspect(&mut self) -> Result<MachineInfo> {
        let state = self.get_state()?;
        let VmInfo { cpus, memory_mb } = vminfo::get_vm_info(self.vbox.as_ref(), &self.name)?;
        let disk = vminfo::get_disk_info(self.vbox.as_ref(), &self.name)?;
        let ssh_port = self.ssh_port().ok();
        Ok(MachineInfo {
            name: self.name.clone(),
            driver: DRIVER_NAME,
            state,
            ssh_port,
            cpus,
            memory_mb,
            disk,
            machine_dir: self.machine.path().to_owned(),
        })
    }
}
