//! Talking to the guest over the forwarded SSH port

use std::net::Ipv4Addr;

use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use tracing::debug;

use super::Driver;
use crate::error::VBoxError;
use crate::ssh::parse_guest_ip;
use crate::state::VmState;

impl Driver {
    /// Address of the guest on the host-only network.
    ///
    /// Read from inside the guest, since VirtualBox does not report DHCP leases.
    pub fn get_ip(&mut self) -> Result<Ipv4Addr> {
        if self.get_state()? != VmState::Running {
            return Err(VBoxError::HostNotRunning.into());
        }
        let target = self.ssh_target()?;
        let out = self.ssh.run(
            &target,
            &format!("ip addr show dev {}", self.config.guest_interface),
        )?;
        let ip = parse_guest_ip(&out).ok_or_else(|| VBoxError::NoGuestIp(out.clone()))?;
        self.runtime.ip = Some(ip);
        Ok(ip)
    }

    /// Retry [`Driver::get_ip`] a fixed number of times.
    pub(super) fn wait_for_ip(&mut self) -> Result<Ipv4Addr> {
        let attempts = self.config.timeouts.ip_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.get_ip() {
                Ok(ip) => return Ok(ip),
                Err(e) => {
                    debug!("No IP yet (attempt {attempt}/{attempts}): {e}");
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                std::thread::sleep(self.config.timeouts.ip_interval());
            }
        }
        Err(last_err.unwrap_or_else(|| eyre!("No IP address for {}", self.name)))
    }

    /// Authorize `public_key` for the SSH user.
    pub(super) fn install_ssh_key(&mut self, public_key: &str) -> Result<()> {
        let target = self.ssh_target()?;
        let quoted = shlex::try_quote(public_key.trim())
            .map_err(|e| eyre!("Cannot quote public key: {e}"))?;
        self.ssh
            .run(&target, "mkdir -p .ssh && chmod 700 .ssh")
            .context("Creating .ssh in guest")?;
        self.ssh
            .run(
                &target,
                &format!("echo {quoted} > .ssh/authorized_keys && chmod 600 .ssh/authorized_keys"),
            )
            .context("Installing authorized_keys in guest")?;
        Ok(())
    }

    /// Run a command in the guest and return its output.
    pub fn run_in_guest(&mut self, command: &str) -> Result<String> {
        let target = self.ssh_target()?;
        self.ssh.run(&target, command)
    }
}
