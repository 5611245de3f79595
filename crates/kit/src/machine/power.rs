//! `vboxkit start`, `stop`, `kill` and `restart`

use clap::Parser;
use color_eyre::Result;

use super::{GlobalOpts, NameOpts};

/// Options for stopping a machine
#[derive(Debug, Parser)]
pub struct StopOpts {
    /// Name of the machine to stop
    pub name: String,

    /// Power off instead of asking the guest to shut down
    #[clap(long, short = 'f')]
    pub force: bool,
}

/// Execute the start command
pub fn start(global: &GlobalOpts, opts: NameOpts) -> Result<()> {
    global.driver(&opts.name)?.start()?;
    println!("Machine '{}' started", opts.name);
    Ok(())
}

/// Execute the stop command
pub fn stop(global: &GlobalOpts, opts: StopOpts) -> Result<()> {
    let mut driver = global.driver(&opts.name)?;
    if opts.force {
        driver.kill()?;
    } else {
        driver.stop()?;
    }
    println!("Machine '{}' stopped", opts.name);
    Ok(())
}

/// Execute the kill command
pub fn kill(global: &GlobalOpts, opts: NameOpts) -> Result<()> {
    global.driver(&opts.name)?.kill()?;
    println!("Machine '{}' killed", opts.name);
    Ok(())
}

/// Execute the restart command
pub fn restart(global: &GlobalOpts, opts: NameOpts) -> Result<()> {
    global.driver(&opts.name)?.restart()?;
    println!("Machine '{}' restarted", opts.name);
    Ok(())
}
