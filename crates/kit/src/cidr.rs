//! IPv4 address/mask values for host-only networks and DHCP ranges

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use color_eyre::{eyre::eyre, Result};
use rand::Rng;
use serde::Serialize;

use crate::error::VBoxError;

/// Last octet of the first address handed out by DHCP
pub const DHCP_LOWER_OCTET: u8 = 100;
/// Last octet of the last address handed out by DHCP
pub const DHCP_UPPER_OCTET: u8 = 254;

const RANDOM_IP_ATTEMPTS: usize = 5;

/// An IPv4 address together with its netmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv4Net {
    /// Interface or network address
    pub ip: Ipv4Addr,
    /// Netmask in dotted form
    pub mask: Ipv4Addr,
}

impl Ipv4Net {
    /// Pair an address with a mask.
    pub fn new(ip: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Self { ip, mask }
    }

    /// The network address (host bits cleared).
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip) & u32::from(self.mask))
    }

    /// Number of leading one bits in the mask.
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.mask).leading_ones()
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len())
    }
}

/// Netmask for a prefix length (0..=32).
pub fn prefix_to_mask(prefix: u8) -> Option<Ipv4Addr> {
    match prefix {
        0 => Some(Ipv4Addr::UNSPECIFIED),
        1..=32 => Some(Ipv4Addr::from(u32::MAX << (32 - u32::from(prefix)))),
        _ => None,
    }
}

/// Parse an address field `key` of the VirtualBox record `owner`.
///
/// An empty value means the field is unset; anything else must parse.
pub fn parse_addr_field<T>(key: &str, owner: &str, val: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let val = val.trim();
    if val.is_empty() {
        return Ok(None);
    }
    val.parse()
        .map(Some)
        .map_err(|e| eyre!("invalid {key} {val:?} for {owner}: {e}"))
}

/// Parse `a.b.c.d/n` into the host address and its network.
///
/// The address must be a host address: `192.168.99.1/24` is accepted,
/// `192.168.99.0/24` is rejected.
pub fn parse_and_validate_cidr(cidr: &str) -> Result<(Ipv4Addr, Ipv4Net)> {
    let invalid = || eyre!("invalid CIDR address: {cidr}");
    let (ip, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let ip: Ipv4Addr = ip.parse().map_err(|_| invalid())?;
    let mask = prefix
        .parse::<u8>()
        .ok()
        .and_then(prefix_to_mask)
        .ok_or_else(invalid)?;
    let network = Ipv4Net::new(Ipv4Net::new(ip, mask).network(), mask);
    if ip == network.ip {
        return Err(VBoxError::NetworkAddressCidr.into());
    }
    Ok((ip, network))
}

/// Replace the last octet of `base`.
pub fn with_last_octet(base: Ipv4Addr, last: u8) -> Ipv4Addr {
    let [a, b, c, _] = base.octets();
    Ipv4Addr::new(a, b, c, last)
}

/// Default DHCP lease range `.100`..=`.254` for a /24-style network.
pub fn dhcp_range(network: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
    (
        with_last_octet(network, DHCP_LOWER_OCTET),
        with_last_octet(network, DHCP_UPPER_OCTET),
    )
}

/// Pick an address in `base`'s /24 with a last octet in 1..=24 that differs from `base`'s.
pub fn random_ip_in_subnet<R: Rng + ?Sized>(rng: &mut R, base: Ipv4Addr) -> Result<Ipv4Addr> {
    let current = base.octets()[3];
    for _ in 0..RANDOM_IP_ATTEMPTS {
        let candidate: u8 = rng.random_range(1..=24);
        if candidate != current {
            return Ok(with_last_octet(base, candidate));
        }
    }
    Err(VBoxError::RandomIpUnavailable.into())
}
