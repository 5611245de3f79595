//! VirtualBox DHCP servers bound to internal or host-only networks

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::ops::ControlFlow;

use color_eyre::Result;
use serde::Serialize;

use crate::cidr::parse_addr_field;
use crate::kvparse::{parse_key_values, LineFormat};
use crate::vboxmanage::VBoxManage;

/// Prefix VirtualBox gives the network name of a host-only interface
pub const HOSTONLY_NETNAME_PREFIX: &str = "HostInterfaceNetworking-";

/// One `dhcpserver` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhcpServer {
    /// Network the server is bound to
    pub network_name: String,
    /// Address of the server itself
    pub ip: Ipv4Addr,
    /// Netmask handed to clients
    pub netmask: Ipv4Addr,
    /// First leased address
    pub lower_ip: Ipv4Addr,
    /// Last leased address
    pub upper_ip: Ipv4Addr,
    /// Whether the server is enabled
    pub enabled: bool,
}

impl DhcpServer {
    fn empty(network_name: &str) -> Self {
        Self {
            network_name: network_name.to_string(),
            ip: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            lower_ip: Ipv4Addr::UNSPECIFIED,
            upper_ip: Ipv4Addr::UNSPECIFIED,
            enabled: false,
        }
    }
}

/// The network name VirtualBox uses for host-only interface `ifname`.
pub fn hostonly_network_name(ifname: &str) -> String {
    format!("{HOSTONLY_NETNAME_PREFIX}{ifname}")
}

/// An empty address reads as `0.0.0.0`; a malformed one is an error.
fn parse_ip(key: &str, network: &str, val: &str) -> Result<Ipv4Addr> {
    Ok(parse_addr_field(key, network, val)?.unwrap_or(Ipv4Addr::UNSPECIFIED))
}

/// Parse `list dhcpservers` output; each record starts at `NetworkName`.
pub fn parse_dhcp_servers(stdout: &str) -> Result<BTreeMap<String, DhcpServer>> {
    let mut servers = BTreeMap::new();
    let mut current: Option<DhcpServer> = None;
    parse_key_values(stdout, LineFormat::Colon, |key, val| {
        if key == "NetworkName" {
            if let Some(done) = current.replace(DhcpServer::empty(val)) {
                servers.insert(done.network_name.clone(), done);
            }
            return Ok(ControlFlow::Continue(()));
        }
        let Some(dhcp) = current.as_mut() else {
            return Ok(ControlFlow::Continue(()));
        };
        match key {
            "IP" => dhcp.ip = parse_ip(key, &dhcp.network_name, val)?,
            "NetworkMask" => dhcp.netmask = parse_ip(key, &dhcp.network_name, val)?,
            "lowerIPAddress" => dhcp.lower_ip = parse_ip(key, &dhcp.network_name, val)?,
            "upperIPAddress" => dhcp.upper_ip = parse_ip(key, &dhcp.network_name, val)?,
            "Enabled" => dhcp.enabled = val.trim() == "Yes",
            _ => {}
        }
        Ok(ControlFlow::Continue(()))
    })?;
    if let Some(done) = current {
        servers.insert(done.network_name.clone(), done);
    }
    Ok(servers)
}

/// All DHCP servers keyed by network name.
pub fn list_dhcp_servers(vbox: &dyn VBoxManage) -> Result<BTreeMap<String, DhcpServer>> {
    parse_dhcp_servers(&vbox.run(&["list", "dhcpservers"])?)
}

/// Create or update the DHCP server for `name`.
///
/// `kind` is the VBoxManage selector flag (`--netname` or `--ifname`).
/// Some platforms create a default server together with a host-only
/// interface and others do not, so this is an upsert.
pub fn add_dhcp_server(
    vbox: &dyn VBoxManage,
    kind: &str,
    name: &str,
    server: &DhcpServer,
) -> Result<()> {
    let existing = list_dhcp_servers(vbox)?;
    let command = if existing.contains_key(name) {
        "modify"
    } else {
        "add"
    };

    let ip = server.ip.to_string();
    let netmask = server.netmask.to_string();
    let lower = server.lower_ip.to_string();
    let upper = server.upper_ip.to_string();
    let enable = if server.enabled {
        "--enable"
    } else {
        "--disable"
    };
    vbox.exec(&[
        "dhcpserver",
        command,
        kind,
        name,
        "--ip",
        &ip,
        "--netmask",
        &netmask,
        "--lowerip",
        &lower,
        "--upperip",
        &upper,
        enable,
    ])
}

/// Upsert the DHCP server of host-only interface `ifname`.
pub fn add_hostonly_dhcp(vbox: &dyn VBoxManage, ifname: &str, server: &DhcpServer) -> Result<()> {
    add_dhcp_server(vbox, "--netname", &hostonly_network_name(ifname), server)
}
