//! Host TCP port allocation and NAT port forwarding rules

use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;

use color_eyre::Result;
use tracing::{debug, info};

use crate::error::VBoxError;
use crate::vboxmanage::VBoxManage;

const PORT_ATTEMPTS: usize = 10;
const PORT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Find a loopback TCP port that can be bound right now.
///
/// `preferred` is tried first (0 asks the OS for any port); after a failure
/// every further attempt asks for an ephemeral port.
pub fn get_available_tcp_port(preferred: u16) -> Result<u16> {
    find_port_with(preferred, |port| {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port))?
            .local_addr()
            .map(|a| a.port())
    })
}

/// `bind` returns the port actually bound for a requested port.
fn find_port_with(preferred: u16, mut bind: impl FnMut(u16) -> io::Result<u16>) -> Result<u16> {
    let mut port = preferred;
    for attempt in 0..PORT_ATTEMPTS {
        match bind(port) {
            Ok(bound) => {
                debug!("Found available TCP port {bound} (attempt {attempt})");
                return Ok(bound);
            }
            Err(e) => {
                debug!("Port {port} unavailable: {e}");
                port = 0;
                std::thread::sleep(PORT_RETRY_DELAY);
            }
        }
    }
    Err(VBoxError::NoAvailablePort.into())
}

/// Format a NAT rule in the `--natpfN` syntax.
pub fn nat_rule_spec(rule: &str, protocol: &str, host_port: u16, guest_port: u16) -> String {
    format!("{rule},{protocol},127.0.0.1,{host_port},,{guest_port}")
}

/// Replace the NAT rule `rule` on `adapter` of `vm` and return the host port used.
///
/// The rule is deleted first (ignoring a failure when it did not exist), then
/// recreated pointing at a freshly verified host port.
pub fn set_port_forward(
    vbox: &dyn VBoxManage,
    vm: &str,
    adapter: u8,
    rule: &str,
    protocol: &str,
    guest_port: u16,
    desired_host_port: u16,
) -> Result<u16> {
    let host_port = get_available_tcp_port(desired_host_port)?;
    if desired_host_port != 0 && host_port != desired_host_port {
        info!("Using port {host_port} for {rule} since {desired_host_port} is not available");
    }

    let natpf = format!("--natpf{adapter}");
    if let Err(e) = vbox.exec(&["modifyvm", vm, &natpf, "delete", rule]) {
        debug!("No previous {rule} rule to delete: {e}");
    }
    let spec = nat_rule_spec(rule, protocol, host_port, guest_port);
    vbox.exec(&["modifyvm", vm, &natpf, &spec])?;
    Ok(host_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeVBoxManage;

    #[test]
    fn test_any_port_is_bindable() {
        let port = get_available_tcp_port(0).unwrap();
        assert_ne!(port, 0);
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
    }

    #[test]
    fn test_busy_preferred_port_falls_back() {
        let busy = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy_port = busy.local_addr().unwrap().port();
        let port = get_available_tcp_port(busy_port).unwrap();
        assert_ne!(port, busy_port);
    }

    #[test]
    fn test_no_port_after_all_attempts() {
        let mut requested = Vec::new();
        let err = find_port_with(2222, |port| {
            requested.push(port);
            Err(io::Error::from(io::ErrorKind::AddrInUse))
        })
        .unwrap_err();
        assert!(VBoxError::matches(&err, |e| matches!(
            e,
            VBoxError::NoAvailablePort
        )));
        assert_eq!(requested.len(), PORT_ATTEMPTS);
        assert_eq!(requested[0], 2222);
        assert!(requested[1..].iter().all(|&p| p == 0));
    }

    #[test]
    fn test_repeated_calls() {
        for _ in 0..20 {
            get_available_tcp_port(0).unwrap();
        }
    }

    #[test]
    fn test_nat_rule_spec() {
        assert_eq!(
            nat_rule_spec("ssh", "tcp", 50022, 22),
            "ssh,tcp,127.0.0.1,50022,,22"
        );
    }

    #[test]
    fn test_set_port_forward() {
        let vbox = FakeVBoxManage::lenient().on_err(
            "modifyvm default --natpf1 delete ssh",
            "VBoxManage: error: Code E_INVALIDARG",
        );
        let port = set_port_forward(&vbox, "default", 1, "ssh", "tcp", 22, 0).unwrap();
        let calls = vbox.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], "modifyvm default --natpf1 delete ssh");
        assert_eq!(
            calls[1],
            format!("modifyvm default --natpf1 ssh,tcp,127.0.0.1,{port},,22")
        );
    }

    #[test]
    fn test_set_port_forward_add_failure() {
        // Only the delete is scripted, so adding the rule fails.
        let vbox = FakeVBoxManage::new().on("modifyvm default --natpf2 delete web", "");
        assert!(set_port_forward(&vbox, "default", 2, "web", "tcp", 80, 0).is_err());
        assert_eq!(vbox.count("modifyvm default --natpf2"), 2);
    }
}
