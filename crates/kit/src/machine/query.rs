//! `vboxkit state`, `ip` and `url`

use color_eyre::Result;

use super::{GlobalOpts, NameOpts};

/// Execute the state command
pub fn state(global: &GlobalOpts, opts: NameOpts) -> Result<()> {
    println!("{}", global.driver(&opts.name)?.get_state()?);
    Ok(())
}

/// Execute the ip command
pub fn ip(global: &GlobalOpts, opts: NameOpts) -> Result<()> {
    println!("{}", global.driver(&opts.name)?.get_ip()?);
    Ok(())
}

/// Execute the url command; prints nothing while the guest has no address.
pub fn url(global: &GlobalOpts, opts: NameOpts) -> Result<()> {
    if let Some(url) = global.driver(&opts.name)?.get_url()? {
        println!("{url}");
    }
    Ok(())
}
