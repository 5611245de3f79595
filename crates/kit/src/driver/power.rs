//! Start, stop, kill, restart and remove

use color_eyre::Result;
use tracing::{debug, info};

use super::{Driver, GUEST_SSH_PORT, SSH_RULE};
use crate::config::RuntimeState;
use crate::error::VBoxError;
use crate::poll::poll_until;
use crate::portfwd::set_port_forward;
use crate::state::VmState;

impl Driver {
    /// Boot or resume the machine and wait until the guest has an address.
    pub fn start(&mut self) -> Result<()> {
        match self.get_state()? {
            VmState::Stopped | VmState::Saved => {
                let port = set_port_forward(
                    self.vbox.as_ref(),
                    &self.name,
                    1,
                    SSH_RULE,
                    "tcp",
                    GUEST_SSH_PORT,
                    self.runtime.ssh_port.unwrap_or(self.config.ssh_port),
                )?;
                self.runtime.ssh_port = Some(port);
                info!("Starting {}...", self.name);
                self.vbox
                    .exec(&["startvm", &self.name, "--type", "headless"])?;
            }
            VmState::Paused => {
                info!("Resuming {}...", self.name);
                self.vbox
                    .exec(&["controlvm", &self.name, "resume", "--type", "headless"])?;
            }
            state => info!("{} is {state}, not in a startable state", self.name),
        }

        self.wait_for_ssh()?;
        info!("Waiting for an IP...");
        let ip = self.wait_for_ip()?;
        debug!("{} has address {ip}", self.name);
        Ok(())
    }

    fn wait_for_ssh(&mut self) -> Result<()> {
        let target = self.ssh_target()?;
        let policy = self.config.timeouts.ssh_policy();
        let ssh = self.ssh.as_ref();
        poll_until(&format!("SSH on {}", target.addr()), &policy, || {
            Ok(ssh.is_reachable(&target).then_some(()))
        })
    }

    fn wait_for_power_off(&mut self) -> Result<()> {
        let policy = self.config.timeouts.stop_policy();
        poll_until(&format!("{} to power off", self.name), &policy, || {
            Ok((self.get_state()? != VmState::Running).then_some(()))
        })?;
        self.runtime.ip = None;
        Ok(())
    }

    /// Press the ACPI power button and wait for the guest to shut down.
    pub fn stop(&mut self) -> Result<()> {
        info!("Stopping {}...", self.name);
        self.vbox
            .exec(&["controlvm", &self.name, "acpipowerbutton"])?;
        self.wait_for_power_off()
    }

    /// Cut the power and wait for VirtualBox to notice.
    pub fn kill(&mut self) -> Result<()> {
        info!("Killing {}...", self.name);
        self.vbox.exec(&["controlvm", &self.name, "poweroff"])?;
        self.wait_for_power_off()
    }

    /// Stop if running, then start.
    pub fn restart(&mut self) -> Result<()> {
        if self.get_state()? == VmState::Running {
            self.stop()?;
        }
        self.start()
    }

    /// Unregister the machine and delete its VirtualBox files.
    ///
    /// Removing a machine VirtualBox does not know is a no-op.
    pub fn remove(&mut self) -> Result<()> {
        let state = match self.get_state() {
            Ok(s) => s,
            Err(e) if VBoxError::is_machine_not_exist(&e) => {
                debug!("{} does not exist, nothing to remove", self.name);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if state == VmState::Running {
            self.stop()?;
        }
        // VirtualBox keeps the session lock for a moment after power off.
        std::thread::sleep(self.config.timeouts.lock_release());
        self.vbox
            .exec(&["unregistervm", "--delete", &self.name])?;
        self.runtime = RuntimeState::default();
        Ok(())
    }
}
