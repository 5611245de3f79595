//! `vboxkit ssh`

use clap::Parser;
use color_eyre::{eyre::eyre, Result};

use super::GlobalOpts;
use crate::error::VBoxError;
use crate::ssh::OpenSshClient;
use crate::state::VmState;

/// Options for connecting to a machine
#[derive(Debug, Parser)]
pub struct SshOpts {
    /// Name of the machine to connect to
    pub name: String,

    /// Command to execute instead of an interactive shell
    #[clap(allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Execute the ssh command
pub fn run(global: &GlobalOpts, opts: SshOpts) -> Result<()> {
    let mut driver = global.driver(&opts.name)?;
    if driver.get_state()? != VmState::Running {
        return Err(VBoxError::HostNotRunning.into());
    }
    let target = driver.ssh_target()?;
    let status = OpenSshClient::default().connect(&target, &opts.command)?;
    if !status.success() {
        return Err(eyre!("SSH exited with {status}"));
    }
    Ok(())
}
