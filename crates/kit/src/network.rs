//! Host-only networks: listing, matching, creation and DHCP provisioning
//!
//! A VM gets its stable address from a host-only interface with a DHCP
//! server attached. Interfaces are matched by address and netmask, created
//! on demand, and never deleted here.
//!
//! Nothing in this module takes a lock. Two callers racing through
//! [`get_or_create_hostonly_network`] for the same CIDR can both conclude that
//! no interface exists and each create one; serializing machine creation on a
//! host is the caller's responsibility.

use std::collections::{BTreeMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ops::ControlFlow;
use std::sync::LazyLock;

use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cidr::{parse_addr_field, Ipv4Net};
use crate::dhcp::{add_hostonly_dhcp, DhcpServer};
use crate::error::VBoxError;
use crate::kvparse::{parse_key_values, LineFormat};
use crate::vboxmanage::VBoxManage;

/// Netmask VirtualBox reports for a freshly created interface on some hosts
/// (`0f000000`), accepted as a match for any requested mask.
pub const BUGGY_NETMASK: Ipv4Addr = Ipv4Addr::new(15, 0, 0, 0);

static HOSTONLY_CREATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Interface '(.+)' was successfully created").expect("valid regex")
});

/// A host-only network interface as reported by `list hostonlyifs`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostOnlyNetwork {
    /// Interface name, e.g. `vboxnet0`
    pub name: String,
    /// Interface GUID
    pub guid: String,
    /// Whether the interface itself runs DHCP
    pub dhcp: bool,
    /// IPv4 address
    pub ipv4: Option<Ipv4Addr>,
    /// IPv4 netmask
    pub netmask: Option<Ipv4Addr>,
    /// IPv6 address
    pub ipv6: Option<Ipv6Addr>,
    /// IPv6 prefix length
    pub ipv6_prefix_len: u8,
    /// MAC address, normalized to lowercase colon form
    pub hw_addr: Option<String>,
    /// Medium type, e.g. `Ethernet`
    pub medium: String,
    /// Link status, e.g. `Up`
    pub status: String,
    /// Network name used to correlate DHCP servers
    pub network_name: String,
}

impl HostOnlyNetwork {
    /// IPv4 address and mask, when both are known.
    pub fn ipv4_net(&self) -> Option<Ipv4Net> {
        Some(Ipv4Net::new(self.ipv4?, self.netmask?))
    }

    /// Push the configured addresses to VirtualBox.
    pub fn save(&self, vbox: &dyn VBoxManage) -> Result<()> {
        if let Some(net) = self.ipv4_net() {
            let ip = net.ip.to_string();
            let mask = net.mask.to_string();
            vbox.exec(&[
                "hostonlyif",
                "ipconfig",
                &self.name,
                "--ip",
                &ip,
                "--netmask",
                &mask,
            ])?;
        }

        if let Some(ipv6) = self.ipv6 {
            let ip = ipv6.to_string();
            let prefix = self.ipv6_prefix_len.to_string();
            vbox.exec(&[
                "hostonlyif",
                "ipconfig",
                &self.name,
                "--ipv6",
                &ip,
                "--netmasklengthv6",
                &prefix,
            ])?;
        }

        if self.dhcp {
            // Not implemented by VirtualBox; the DHCP server row does the work.
            if let Err(e) = vbox.exec(&["hostonlyif", "ipconfig", &self.name, "--dhcp"]) {
                warn!("Enabling DHCP on {} failed: {e}", self.name);
            }
        }

        Ok(())
    }
}

/// Normalize a MAC address written with `:` or `-` separators.
fn parse_mac(val: &str) -> Result<String> {
    let octets: Vec<&str> = val.trim().split([':', '-']).collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return Err(eyre!("invalid MAC address {val:?}"));
    }
    Ok(octets.join(":").to_ascii_lowercase())
}

/// Parse `list hostonlyifs` output into networks keyed by network name.
///
/// A record starts at `Name` and ends at `VBoxNetworkName`. Duplicate
/// network names or IPv4 addresses mean the host is ambiguously configured
/// and fail the whole listing.
pub fn parse_hostonly_networks(stdout: &str) -> Result<BTreeMap<String, HostOnlyNetwork>> {
    let mut by_name = BTreeMap::new();
    let mut seen_ips = HashSet::new();
    let mut n = HostOnlyNetwork::default();

    parse_key_values(stdout, LineFormat::Colon, |key, val| {
        match key {
            "Name" => {
                n = HostOnlyNetwork {
                    name: val.to_string(),
                    ..Default::default()
                }
            }
            "GUID" => n.guid = val.to_string(),
            "DHCP" => n.dhcp = val != "Disabled",
            "IPAddress" => n.ipv4 = parse_addr_field(key, &n.name, val)?,
            "NetworkMask" => n.netmask = parse_addr_field(key, &n.name, val)?,
            "IPV6Address" => n.ipv6 = parse_addr_field(key, &n.name, val)?,
            "IPV6NetworkMaskPrefixLength" => {
                let val = val.trim();
                n.ipv6_prefix_len = if val.is_empty() {
                    0
                } else {
                    val.parse()
                        .map_err(|e| eyre!("Invalid IPv6 prefix length {val:?}: {e}"))?
                };
            }
            "HardwareAddress" => n.hw_addr = Some(parse_mac(val)?),
            "MediumType" => n.medium = val.to_string(),
            "Status" => n.status = val.to_string(),
            "VBoxNetworkName" => {
                let mut done = std::mem::take(&mut n);
                done.network_name = val.to_string();
                if by_name.contains_key(&done.network_name) {
                    return Err(VBoxError::DuplicateNetworkName(done.network_name).into());
                }
                if let Some(ip) = done.ipv4 {
                    if !seen_ips.insert(ip) {
                        return Err(VBoxError::DuplicateNetworkIp(ip).into());
                    }
                }
                by_name.insert(done.network_name.clone(), done);
            }
            _ => {}
        }
        Ok(ControlFlow::Continue(()))
    })?;

    Ok(by_name)
}

/// All host-only networks keyed by network name.
pub fn list_hostonly_networks(vbox: &dyn VBoxManage) -> Result<BTreeMap<String, HostOnlyNetwork>> {
    parse_hostonly_networks(&vbox.run(&["list", "hostonlyifs"])?)
}

/// Find the network whose address is `host_ip` and whose mask is `netmask`
/// (or [`BUGGY_NETMASK`]).
pub fn find_hostonly_network<'a>(
    nets: &'a BTreeMap<String, HostOnlyNetwork>,
    host_ip: Ipv4Addr,
    netmask: Ipv4Addr,
) -> Option<&'a HostOnlyNetwork> {
    nets.values().find(|n| {
        n.ipv4 == Some(host_ip)
            && (n.netmask == Some(netmask) || n.netmask == Some(BUGGY_NETMASK))
    })
}

/// Create a new host-only interface; only its name is known afterwards.
pub fn create_hostonly_interface(vbox: &dyn VBoxManage) -> Result<HostOnlyNetwork> {
    let out = vbox.run(&["hostonlyif", "create"])?;
    let name = HOSTONLY_CREATED
        .captures(&out)
        .and_then(|c| c.get(1))
        .ok_or(VBoxError::HostOnlyCreateFailed)?
        .as_str()
        .to_string();
    debug!("Created host-only interface {name}");
    Ok(HostOnlyNetwork {
        name,
        ..Default::default()
    })
}

/// Addressing wanted for a host-only network and its DHCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOnlyRequest {
    /// Host side address of the interface
    pub host_ip: Ipv4Addr,
    /// Netmask of the interface
    pub netmask: Ipv4Addr,
    /// Address of the DHCP server
    pub dhcp_ip: Ipv4Addr,
    /// First leased address
    pub lower_ip: Ipv4Addr,
    /// Last leased address
    pub upper_ip: Ipv4Addr,
}

/// Reuse the matching host-only network or create and configure one.
pub fn get_or_create_hostonly_network(
    vbox: &dyn VBoxManage,
    req: &HostOnlyRequest,
) -> Result<HostOnlyNetwork> {
    let nets = list_hostonly_networks(vbox)?;
    if let Some(n) = find_hostonly_network(&nets, req.host_ip, req.netmask) {
        debug!("Reusing host-only network {}", n.name);
        return Ok(n.clone());
    }

    info!(
        "Creating a new host-only adapter for {}",
        Ipv4Net::new(req.host_ip, req.netmask)
    );
    let mut created = create_hostonly_interface(vbox)?;
    created.ipv4 = Some(req.host_ip);
    created.netmask = Some(req.netmask);
    created.save(vbox)?;

    let dhcp = DhcpServer {
        network_name: String::new(),
        ip: req.dhcp_ip,
        netmask: req.netmask,
        lower_ip: req.lower_ip,
        upper_ip: req.upper_ip,
        enabled: true,
    };
    add_hostonly_dhcp(vbox, &created.name, &dhcp)?;

    // VirtualBox can report success for an interface it does not list yet.
    let nets = list_hostonly_networks(vbox)?;
    find_hostonly_network(&nets, req.host_ip, req.netmask)
        .cloned()
        .ok_or_else(|| VBoxError::HostOnlyNotVisible.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeVBoxManage;
    use indoc::indoc;

    const ONE_NETWORK: &str = indoc! {"
        Name:            vboxnet0
        GUID:            786f6276-656e-4074-8000-0a0027000000
        DHCP:            Disabled
        IPAddress:       192.168.99.1
        NetworkMask:     255.255.255.0
        IPV6Address:
        IPV6NetworkMaskPrefixLength: 0
        HardwareAddress: 0a:00:27:00:00:00
        MediumType:      Ethernet
        Status:          Up
        VBoxNetworkName: HostInterfaceNetworking-vboxnet0

    "};

    const TWO_NETWORKS: &str = indoc! {"
        Name:            vboxnet0
        GUID:            786f6276-656e-4074-8000-0a0027000000
        DHCP:            Disabled
        IPAddress:       192.168.99.1
        NetworkMask:     255.255.255.0
        IPV6Address:
        IPV6NetworkMaskPrefixLength: 0
        HardwareAddress: 0a:00:27:00:00:00
        MediumType:      Ethernet
        Status:          Up
        VBoxNetworkName: HostInterfaceNetworking-vboxnet0

        Name:            vboxnet1
        GUID:            786f6276-656e-4174-8000-0a0027000001
        DHCP:            Disabled
        IPAddress:       169.254.37.187
        NetworkMask:     255.255.255.0
        IPV6Address:
        IPV6NetworkMaskPrefixLength: 0
        HardwareAddress: 0A-00-27-00-00-01
        MediumType:      Ethernet
        Status:          Up
        VBoxNetworkName: HostInterfaceNetworking-vboxnet1
    "};

    fn mask24() -> Ipv4Addr {
        Ipv4Addr::new(255, 255, 255, 0)
    }

    fn request() -> HostOnlyRequest {
        HostOnlyRequest {
            host_ip: Ipv4Addr::new(192, 168, 99, 1),
            netmask: mask24(),
            dhcp_ip: Ipv4Addr::new(192, 168, 99, 7),
            lower_ip: Ipv4Addr::new(192, 168, 99, 100),
            upper_ip: Ipv4Addr::new(192, 168, 99, 254),
        }
    }

    fn nets_with(ip: Ipv4Addr, mask: Ipv4Addr) -> BTreeMap<String, HostOnlyNetwork> {
        let n = HostOnlyNetwork {
            name: "vboxnet0".into(),
            ipv4: Some(ip),
            netmask: Some(mask),
            network_name: "HostInterfaceNetworking-vboxnet0".into(),
            ..Default::default()
        };
        BTreeMap::from([(n.network_name.clone(), n)])
    }

    #[test]
    fn test_find_happy() {
        let ip = Ipv4Addr::new(192, 168, 99, 1);
        let nets = nets_with(ip, mask24());
        let found = find_hostonly_network(&nets, ip, mask24()).unwrap();
        assert_eq!(found.name, "vboxnet0");
    }

    #[test]
    fn test_find_not_found() {
        let nets = nets_with(Ipv4Addr::new(192, 168, 99, 1), mask24());
        assert!(find_hostonly_network(&nets, Ipv4Addr::new(192, 168, 59, 1), mask24()).is_none());
    }

    #[test]
    fn test_find_other_mask_rejected() {
        let ip = Ipv4Addr::new(192, 168, 99, 1);
        let nets = nets_with(ip, Ipv4Addr::new(255, 255, 0, 0));
        assert!(find_hostonly_network(&nets, ip, mask24()).is_none());
    }

    #[test]
    fn test_find_accepts_buggy_mask() {
        let ip = Ipv4Addr::new(192, 168, 99, 1);
        let nets = nets_with(ip, BUGGY_NETMASK);
        assert!(find_hostonly_network(&nets, ip, mask24()).is_some());
    }

    #[test]
    fn test_list_one_network() {
        let vbox = FakeVBoxManage::new().on("list hostonlyifs", ONE_NETWORK);
        let nets = list_hostonly_networks(&vbox).unwrap();
        assert_eq!(nets.len(), 1);

        let n = &nets["HostInterfaceNetworking-vboxnet0"];
        assert_eq!(n.name, "vboxnet0");
        assert_eq!(n.guid, "786f6276-656e-4074-8000-0a0027000000");
        assert!(!n.dhcp);
        assert_eq!(n.ipv4, Some(Ipv4Addr::new(192, 168, 99, 1)));
        assert_eq!(n.netmask, Some(mask24()));
        assert_eq!(n.ipv6, None);
        assert_eq!(n.hw_addr.as_deref(), Some("0a:00:27:00:00:00"));
        assert_eq!(n.medium, "Ethernet");
        assert_eq!(n.status, "Up");
        assert_eq!(n.network_name, "HostInterfaceNetworking-vboxnet0");
    }

    #[test]
    fn test_list_two_networks() {
        let nets = parse_hostonly_networks(TWO_NETWORKS).unwrap();
        assert_eq!(nets.len(), 2);
        let n = &nets["HostInterfaceNetworking-vboxnet1"];
        assert_eq!(n.name, "vboxnet1");
        assert_eq!(n.ipv4, Some(Ipv4Addr::new(169, 254, 37, 187)));
        assert_eq!(n.hw_addr.as_deref(), Some("0a:00:27:00:00:01"));
    }

    #[test]
    fn test_list_does_not_rely_on_blank_lines() {
        let nets = parse_hostonly_networks(indoc! {"
            Name:            vboxnet0
            VBoxNetworkName: HostInterfaceNetworking-vboxnet0
            Name:            vboxnet1
            VBoxNetworkName: HostInterfaceNetworking-vboxnet1
        "})
        .unwrap();
        assert_eq!(nets.len(), 2);
        assert_eq!(nets["HostInterfaceNetworking-vboxnet0"].name, "vboxnet0");
        assert_eq!(nets["HostInterfaceNetworking-vboxnet1"].name, "vboxnet1");
    }

    #[test]
    fn test_list_rejects_bad_mac() {
        let err = parse_hostonly_networks("HardwareAddress: zz:00:27:00:00:00\n").unwrap_err();
        assert!(err.to_string().contains("invalid MAC address"));
    }

    #[test]
    fn test_fail_if_two_networks_have_same_ip() {
        let vbox = FakeVBoxManage::new().on(
            "list hostonlyifs",
            indoc! {"
                Name:            vboxnet0
                IPAddress:       192.168.99.1
                NetworkMask:     255.255.255.0
                VBoxNetworkName: HostInterfaceNetworking-vboxnet0
                Name:            vboxnet1
                IPAddress:       192.168.99.1
                NetworkMask:     255.255.255.0
                VBoxNetworkName: HostInterfaceNetworking-vboxnet1
            "},
        );
        let err = get_or_create_hostonly_network(&vbox, &request()).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"VirtualBox is configured with multiple host-only adapters with the same IP "192.168.99.1". Please remove one."#
        );
    }

    #[test]
    fn test_fail_if_two_networks_have_same_name() {
        let vbox = FakeVBoxManage::new().on(
            "list hostonlyifs",
            indoc! {"
                Name:            vboxnet0
                VBoxNetworkName: HostInterfaceNetworking-vboxnet0
                Name:            vboxnet0
                VBoxNetworkName: HostInterfaceNetworking-vboxnet0
            "},
        );
        let err = get_or_create_hostonly_network(&vbox, &request()).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"VirtualBox is configured with multiple host-only adapters with the same name "HostInterfaceNetworking-vboxnet0". Please remove one."#
        );
    }

    #[test]
    fn test_get_existing_network() {
        let vbox = FakeVBoxManage::new().on("list hostonlyifs", ONE_NETWORK);
        let n = get_or_create_hostonly_network(&vbox, &request()).unwrap();
        assert_eq!(n.network_name, "HostInterfaceNetworking-vboxnet0");
        assert_eq!(vbox.count("hostonlyif create"), 0);
    }

    #[test]
    fn test_create_network() {
        let created = indoc! {"
            Name:            vboxnet1
            IPAddress:       192.168.99.1
            NetworkMask:     15.0.0.0
            VBoxNetworkName: HostInterfaceNetworking-vboxnet1
        "};
        let vbox = FakeVBoxManage::lenient()
            .on("list hostonlyifs", "")
            .on("list hostonlyifs", created)
            .on(
                "hostonlyif create",
                "0%...10%...100%\nInterface 'vboxnet1' was successfully created\n",
            )
            .on("list dhcpservers", "");

        let n = get_or_create_hostonly_network(&vbox, &request()).unwrap();
        assert_eq!(n.name, "vboxnet1");
        assert_eq!(
            vbox.calls(),
            vec![
                "list hostonlyifs",
                "hostonlyif create",
                "hostonlyif ipconfig vboxnet1 --ip 192.168.99.1 --netmask 255.255.255.0",
                "list dhcpservers",
                "dhcpserver add --netname HostInterfaceNetworking-vboxnet1 --ip 192.168.99.7 \
                 --netmask 255.255.255.0 --lowerip 192.168.99.100 --upperip 192.168.99.254 --enable",
                "list hostonlyifs",
            ]
        );
    }

    #[test]
    fn test_created_network_not_visible() {
        let vbox = FakeVBoxManage::lenient()
            .on("list hostonlyifs", "")
            .on(
                "hostonlyif create",
                "Interface 'vboxnet1' was successfully created",
            )
            .on("list dhcpservers", "");
        let err = get_or_create_hostonly_network(&vbox, &request()).unwrap_err();
        assert!(VBoxError::matches(&err, |e| matches!(
            e,
            VBoxError::HostOnlyNotVisible
        )));
    }

    #[test]
    fn test_create_without_success_message() {
        let vbox = FakeVBoxManage::new().on("hostonlyif create", "something odd");
        let err = create_hostonly_interface(&vbox).unwrap_err();
        assert_eq!(err.to_string(), "failed to create hostonly interface");
    }

    #[test]
    fn test_save_ipv6_and_dhcp_failure_ignored() {
        let vbox = FakeVBoxManage::lenient()
            .on_err("hostonlyif ipconfig vboxnet0 --dhcp", "error: not implemented");
        let n = HostOnlyNetwork {
            name: "vboxnet0".into(),
            dhcp: true,
            ipv6: Some("fe80::1".parse().unwrap()),
            ipv6_prefix_len: 64,
            ..Default::default()
        };
        n.save(&vbox).unwrap();
        assert_eq!(
            vbox.calls(),
            vec![
                "hostonlyif ipconfig vboxnet0 --ipv6 fe80::1 --netmasklengthv6 64",
                "hostonlyif ipconfig vboxnet0 --dhcp",
            ]
        );
    }

    #[test]
    fn test_bad_address_fails_listing() {
        let out = ONE_NETWORK.replace("IPAddress:       192.168.99.1", "IPAddress:       192.168.99");
        let err = parse_hostonly_networks(&out).unwrap_err();
        assert!(
            err.to_string()
                .starts_with(r#"invalid IPAddress "192.168.99" for vboxnet0"#),
            "{err}"
        );

        let out = ONE_NETWORK.replace("255.255.255.0", "255.255.0.x");
        assert!(parse_hostonly_networks(&out).is_err());
    }

}
