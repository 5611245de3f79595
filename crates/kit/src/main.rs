//! Command line entry point for vboxkit

use clap::Parser;
use color_eyre::{Report, Result};

use vboxkit::machine::{GlobalOpts, MachineCommands};

/// Create and manage VirtualBox machines.
///
/// Each machine boots a small Linux ISO with a NAT adapter for outbound
/// traffic and SSH, and a host-only adapter through which the host reaches
/// the guest directly.
#[derive(Parser)]
#[clap(name = "vboxkit", version)]
struct Cli {
    #[clap(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: MachineCommands,
}

/// Install and configure the tracing/logging system.
///
/// Logs are filtered by the RUST_LOG environment variable, defaulting to 'info'.
fn install_tracing() -> Result<()> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn main() -> Result<(), Report> {
    install_tracing()?;
    color_eyre::install()?;

    let cli = Cli::parse();
    cli.command.run(&cli.global)?;
    tracing::debug!("exiting");
    Ok(())
}
