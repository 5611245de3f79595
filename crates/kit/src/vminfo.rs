//! Reading disk, CPU/memory and NAT settings from `showvminfo`

use std::ops::ControlFlow;

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;

use crate::kvparse::{parse_key_values, LineFormat};
use crate::vboxmanage::VBoxManage;

/// The disk attached at SATA port 1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VirtualDisk {
    /// Medium UUID
    pub uuid: String,
    /// Host path of the disk image
    pub path: String,
}

/// CPU and memory configuration of a VM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VmInfo {
    /// Virtual CPU count
    pub cpus: u32,
    /// Memory in MB
    pub memory_mb: u32,
}

/// One NAT port forwarding rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NatRule {
    /// Rule name, e.g. `ssh`
    pub name: String,
    /// `tcp` or `udp`
    pub protocol: String,
    /// Host side bind address (may be empty)
    pub host_ip: String,
    /// Host side port
    pub host_port: u16,
    /// Guest side port
    pub guest_port: u16,
}

fn showvminfo(vbox: &dyn VBoxManage, name: &str) -> Result<String> {
    vbox.run(&["showvminfo", name, "--machinereadable"])
}

/// Extract the SATA port 1 disk.
///
/// Missing fields yield an empty [`VirtualDisk`] rather than an error.
pub fn parse_disk_info(stdout: &str) -> Result<VirtualDisk> {
    let mut disk = VirtualDisk::default();
    parse_key_values(stdout, LineFormat::Equals, |key, val| {
        match key {
            "SATA-1-0" => disk.path = val.to_string(),
            "SATA-ImageUUID-1-0" => disk.uuid = val.to_string(),
            _ => {}
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(disk)
}

/// Look up the primary disk of `name`.
pub fn get_disk_info(vbox: &dyn VBoxManage, name: &str) -> Result<VirtualDisk> {
    parse_disk_info(&showvminfo(vbox, name)?)
}

/// Extract `cpus` and `memory`; a non-numeric value is an error.
pub fn parse_vm_info(stdout: &str) -> Result<VmInfo> {
    let mut info = VmInfo::default();
    parse_key_values(stdout, LineFormat::Equals, |key, val| {
        let field = match key {
            "cpus" => &mut info.cpus,
            "memory" => &mut info.memory_mb,
            _ => return Ok(ControlFlow::Continue(())),
        };
        *field = val
            .parse()
            .map_err(|e| eyre!("Invalid {key} value {val:?}: {e}"))?;
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(info)
}

/// Look up CPU and memory of `name`.
pub fn get_vm_info(vbox: &dyn VBoxManage, name: &str) -> Result<VmInfo> {
    parse_vm_info(&showvminfo(vbox, name)?)
}

fn parse_nat_rule(val: &str) -> Option<NatRule> {
    let parts: Vec<&str> = val.split(',').collect();
    let [name, protocol, host_ip, host_port, _guest_ip, guest_port] = parts.as_slice() else {
        return None;
    };
    Some(NatRule {
        name: name.to_string(),
        protocol: protocol.to_string(),
        host_ip: host_ip.to_string(),
        host_port: host_port.parse().ok()?,
        guest_port: guest_port.parse().ok()?,
    })
}

/// All `Forwarding(N)` rules, in listing order.
pub fn parse_nat_rules(stdout: &str) -> Result<Vec<NatRule>> {
    let mut rules = Vec::new();
    parse_key_values(stdout, LineFormat::Equals, |key, val| {
        if key.starts_with("Forwarding(") {
            if let Some(rule) = parse_nat_rule(val) {
                rules.push(rule);
            }
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(rules)
}

/// Host port of the NAT rule called `rule`, if the VM has one.
pub fn get_forwarded_port(vbox: &dyn VBoxManage, name: &str, rule: &str) -> Result<Option<u16>> {
    let rules = parse_nat_rules(&showvminfo(vbox, name)?)?;
    Ok(rules
        .into_iter()
        .find(|r| r.name == rule)
        .map(|r| r.host_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeVBoxManage;
    use indoc::indoc;

    #[test]
    fn test_disk_info() {
        let vbox = FakeVBoxManage::new().on(
            "showvminfo default --machinereadable",
            indoc! {r#"
                "SATA-0-0"="/home/x/boot2docker.iso"
                "SATA-1-0"="/home/x/disk.vmdk"
                "SATA-ImageUUID-1-0"="12345-abc"
            "#},
        );
        let disk = get_disk_info(&vbox, "default").unwrap();
        assert_eq!(
            disk,
            VirtualDisk {
                path: "/home/x/disk.vmdk".into(),
                uuid: "12345-abc".into(),
            }
        );
    }

    #[test]
    fn test_disk_info_invalid_output_is_tolerated() {
        let disk = parse_disk_info("INVALID").unwrap();
        assert_eq!(disk, VirtualDisk::default());
    }

    #[test]
    fn test_disk_info_tool_error() {
        let vbox = FakeVBoxManage::new();
        assert!(get_disk_info(&vbox, "default").is_err());
    }

    #[test]
    fn test_vm_info() {
        let vbox = FakeVBoxManage::new().on(
            "showvminfo host --machinereadable",
            "memory=1024\ncpus=2\n",
        );
        let info = get_vm_info(&vbox, "host").unwrap();
        assert_eq!(
            info,
            VmInfo {
                cpus: 2,
                memory_mb: 1024
            }
        );
    }

    #[test]
    fn test_vm_info_non_numeric() {
        let err = parse_vm_info("cpus=two\n").unwrap_err();
        assert!(err.to_string().contains("Invalid cpus value"));
        assert_eq!(parse_vm_info("INVALID").unwrap(), VmInfo::default());
    }

    #[test]
    fn test_nat_rules() {
        let stdout = indoc! {r#"
            natnet1="nat"
            Forwarding(0)="docker,tcp,127.0.0.1,2376,,2376"
            Forwarding(1)="ssh,tcp,127.0.0.1,50022,,22"
            Forwarding(2)="broken"
        "#};
        let rules = parse_nat_rules(stdout).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].name, "ssh");
        assert_eq!(rules[1].host_port, 50022);
        assert_eq!(rules[1].guest_port, 22);

        let vbox = FakeVBoxManage::new().on("showvminfo m --machinereadable", stdout);
        assert_eq!(get_forwarded_port(&vbox, "m", "ssh").unwrap(), Some(50022));
        assert_eq!(get_forwarded_port(&vbox, "m", "http").unwrap(), None);
    }
}
