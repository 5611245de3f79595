//! `vboxkit` subcommands
//!
//! Every command acts on one machine by name, except `hostonly`, which
//! lists the networks shared by all machines.

use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Subcommand};
use color_eyre::Result;
use tracing::debug;

use crate::config::DriverConfig;
use crate::driver::Driver;
use crate::store::Store;
use crate::vboxmanage::{VBoxManage, VBoxManageCmd};

pub mod create;
pub mod hostonly;
pub mod inspect;
pub mod power;
pub mod query;
pub mod rm;
pub mod ssh;

/// Options accepted by every command
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalOpts {
    /// Path to the VBoxManage binary (default: detected)
    #[clap(long, global = true)]
    pub vboxmanage: Option<Utf8PathBuf>,

    /// Directory holding machines and the boot image cache
    #[clap(long, global = true)]
    pub storage_path: Option<Utf8PathBuf>,
}

impl GlobalOpts {
    /// The VBoxManage invoker to hand to drivers.
    pub fn vbox(&self) -> Arc<dyn VBoxManage> {
        let cmd = match &self.vboxmanage {
            Some(path) => VBoxManageCmd::new(path.clone()),
            None => VBoxManageCmd::detect(),
        };
        debug!("Using {}", cmd.binary());
        Arc::new(cmd)
    }

    /// The storage root.
    pub fn store(&self) -> Result<Store> {
        let root = match &self.storage_path {
            Some(p) => p.clone(),
            None => Store::default_root()?,
        };
        Ok(Store::new(root))
    }

    /// Driver for an existing machine, with the configuration it was created with.
    pub fn driver(&self, name: &str) -> Result<Driver> {
        let store = self.store()?;
        let path = store.machine(name).config();
        let config = if path.exists() {
            DriverConfig::load(&path)?
        } else {
            debug!("No {path}, using defaults");
            DriverConfig::default()
        };
        Ok(Driver::new(name, &store, self.vbox(), config))
    }
}

/// Output format for structured output
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON format (machine-readable)
    Json,
    /// YAML format
    Yaml,
}

/// Arguments for commands that only need a machine name
#[derive(Debug, Args)]
pub struct NameOpts {
    /// Name of the machine
    pub name: String,
}

/// Machine management commands
#[derive(Debug, Subcommand)]
pub enum MachineCommands {
    /// Create and boot a new machine
    Create(create::CreateOpts),

    /// Start or resume a machine
    Start(NameOpts),

    /// Shut a machine down through ACPI
    Stop(power::StopOpts),

    /// Power a machine off immediately
    Kill(NameOpts),

    /// Stop and start a machine
    Restart(NameOpts),

    /// Remove a machine and its files
    #[clap(name = "rm")]
    Remove(rm::RmOpts),

    /// Print the power state of a machine
    State(NameOpts),

    /// Print the address of a machine on the host-only network
    Ip(NameOpts),

    /// Print the daemon URL of a machine
    Url(NameOpts),

    /// Show state, resources, disk and SSH port of a machine
    Inspect(inspect::InspectOpts),

    /// Log into a machine or run a command in it
    Ssh(ssh::SshOpts),

    /// Inspect host-only networks
    #[clap(subcommand)]
    Hostonly(hostonly::HostonlyCommands),
}

impl MachineCommands {
    /// Execute the command.
    pub fn run(self, global: &GlobalOpts) -> Result<()> {
        match self {
            MachineCommands::Create(opts) => create::run(global, opts),
            MachineCommands::Start(opts) => power::start(global, opts),
            MachineCommands::Stop(opts) => power::stop(global, opts),
            MachineCommands::Kill(opts) => power::kill(global, opts),
            MachineCommands::Restart(opts) => power::restart(global, opts),
            MachineCommands::Remove(opts) => rm::run(global, opts),
            MachineCommands::State(opts) => query::state(global, opts),
            MachineCommands::Ip(opts) => query::ip(global, opts),
            MachineCommands::Url(opts) => query::url(global, opts),
            MachineCommands::Inspect(opts) => inspect::run(global, opts),
            MachineCommands::Ssh(opts) => ssh::run(global, opts),
            MachineCommands::Hostonly(cmd) => cmd.run(global),
        }
    }
}
