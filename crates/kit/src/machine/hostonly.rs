//! `vboxkit hostonly` - host-only networks and their DHCP servers

use clap::{Parser, Subcommand};
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use super::{GlobalOpts, OutputFormat};
use crate::dhcp::{list_dhcp_servers, DhcpServer};
use crate::network::{list_hostonly_networks, HostOnlyNetwork};
use crate::vboxmanage::VBoxManage;

/// Host-only network subcommands
#[derive(Debug, Subcommand)]
pub enum HostonlyCommands {
    /// List host-only networks
    #[clap(name = "ls")]
    List(ListOpts),
}

impl HostonlyCommands {
    /// Execute the subcommand.
    pub fn run(self, global: &GlobalOpts) -> Result<()> {
        match self {
            HostonlyCommands::List(opts) => list(global, opts),
        }
    }
}

/// Options for listing host-only networks
#[derive(Debug, Parser)]
pub struct ListOpts {
    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

/// A host-only network with the DHCP server bound to it, if any
#[derive(Debug, Serialize)]
pub struct HostonlyEntry {
    /// The interface
    #[serde(flatten)]
    pub network: HostOnlyNetwork,
    /// Its DHCP server
    pub dhcp_server: Option<DhcpServer>,
}

/// Every host-only network joined with its DHCP server.
pub fn collect(vbox: &dyn VBoxManage) -> Result<Vec<HostonlyEntry>> {
    let networks = list_hostonly_networks(vbox)?;
    let mut servers = list_dhcp_servers(vbox)?;
    Ok(networks
        .into_values()
        .map(|network| HostonlyEntry {
            dhcp_server: servers.remove(&network.network_name),
            network,
        })
        .collect())
}

fn or_dash<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Render entries as a table.
pub fn render_table(entries: &[HostonlyEntry]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["NAME", "ADDRESS", "STATUS", "DHCP SERVER", "LEASES"]);
    for e in entries {
        let (server, leases) = match &e.dhcp_server {
            Some(s) if s.enabled => (s.ip.to_string(), format!("{}-{}", s.lower_ip, s.upper_ip)),
            Some(s) => (format!("{} (disabled)", s.ip), "-".to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        table.add_row(vec![
            e.network.name.clone(),
            or_dash(e.network.ipv4_net()),
            e.network.status.clone(),
            server,
            leases,
        ]);
    }
    table
}

fn list(global: &GlobalOpts, opts: ListOpts) -> Result<()> {
    let entries = collect(global.vbox().as_ref())?;
    match opts.format {
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("No host-only networks found");
                return Ok(());
            }
            println!("{}", render_table(&entries));
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries)
                    .context("Failed to serialize networks as JSON")?
            );
        }
        OutputFormat::Yaml => {
            return Err(eyre!("YAML format is not supported for hostonly ls"));
        }
    }
    Ok(())
}
