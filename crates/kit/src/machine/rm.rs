//! `vboxkit rm`

use clap::Parser;
use color_eyre::{eyre::eyre, Result};

use super::GlobalOpts;
use crate::state::VmState;

/// Options for removing a machine
#[derive(Debug, Parser)]
pub struct RmOpts {
    /// Name of the machine to remove
    pub name: String,

    /// Remove even if the machine is running
    #[clap(long, short = 'f')]
    pub force: bool,
}

/// Execute the rm command
pub fn run(global: &GlobalOpts, opts: RmOpts) -> Result<()> {
    let mut driver = global.driver(&opts.name)?;
    if !opts.force {
        match driver.get_state() {
            Ok(VmState::Running) => {
                return Err(eyre!(
                    "Machine '{}' is running; stop it first or use --force",
                    opts.name
                ))
            }
            Ok(_) => {}
            Err(e) if crate::error::VBoxError::is_machine_not_exist(&e) => {}
            Err(e) => return Err(e),
        }
    }
    driver.remove()?;
    global.store()?.machine(&opts.name).remove()?;
    println!("Machine '{}' removed", opts.name);
    Ok(())
}
