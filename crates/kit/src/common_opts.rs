//! Machine configuration flags shared by CLI commands
//!
//! Every flag is optional; a flag that is given overrides the value loaded
//! from the configuration file.

use clap::Parser;

use crate::config::DriverConfig;

/// CPU, memory and disk size
#[derive(Parser, Debug, Clone, Default)]
pub struct ResourceOpts {
    /// Number of virtual CPUs (0 or less uses every host core)
    #[clap(long, allow_negative_numbers = true)]
    pub cpus: Option<i32>,

    /// Memory size in MB
    #[clap(long)]
    pub memory: Option<u32>,

    /// Disk size in MB
    #[clap(long)]
    pub disk_size: Option<u32>,
}

impl ResourceOpts {
    /// Overlay the given flags on `config`.
    pub fn apply(&self, config: &mut DriverConfig) {
        if let Some(cpus) = self.cpus {
            config.cpus = cpus;
        }
        if let Some(memory) = self.memory {
            config.memory = memory;
        }
        if let Some(disk_size) = self.disk_size {
            config.disk_size = disk_size;
        }
    }
}

/// NAT and host-only adapter settings
#[derive(Parser, Debug, Clone, Default)]
pub struct NetworkOpts {
    /// Host address and prefix of the host-only network (e.g. 192.168.99.1/24)
    #[clap(long)]
    pub hostonly_cidr: Option<String>,

    /// NIC model of the host-only adapter
    #[clap(long)]
    pub hostonly_nictype: Option<String>,

    /// Promiscuous mode of the host-only adapter (deny, allow-vms, allow-all)
    #[clap(long)]
    pub hostonly_nicpromisc: Option<String>,

    /// NIC model of the NAT adapter
    #[clap(long)]
    pub nat_nictype: Option<String>,

    /// Resolve guest DNS queries through the host resolver
    #[clap(long)]
    pub host_dns_resolver: bool,

    /// Preferred host port for SSH forwarding
    #[clap(long)]
    pub ssh_port: Option<u16>,
}

impl NetworkOpts {
    /// Overlay the given flags on `config`.
    pub fn apply(&self, config: &mut DriverConfig) {
        let strings = [
            (&self.hostonly_cidr, &mut config.hostonly_cidr),
            (&self.hostonly_nictype, &mut config.hostonly_nictype),
            (&self.hostonly_nicpromisc, &mut config.hostonly_nicpromisc),
            (&self.nat_nictype, &mut config.nat_nictype),
        ];
        for (flag, field) in strings {
            if let Some(v) = flag {
                *field = v.clone();
            }
        }
        if self.host_dns_resolver {
            config.host_dns_resolver = true;
        }
        if let Some(port) = self.ssh_port {
            config.ssh_port = port;
        }
    }
}

/// Boot image, base VM and shared folder
#[derive(Parser, Debug, Clone, Default)]
pub struct ImageOpts {
    /// URL of the boot ISO (defaults to the latest release)
    #[clap(long)]
    pub boot2docker_url: Option<String>,

    /// Clone disk and SSH key from this existing VM
    #[clap(long)]
    pub import_vm: Option<String>,

    /// Do not share a host folder with the guest
    #[clap(long, conflicts_with = "share_folder")]
    pub no_share: bool,

    /// Host folder to share, as `hostdir[:name]`
    #[clap(long)]
    pub share_folder: Option<String>,
}

impl ImageOpts {
    /// Overlay the given flags on `config`.
    pub fn apply(&self, config: &mut DriverConfig) {
        if let Some(url) = &self.boot2docker_url {
            config.boot2docker_url = url.clone();
        }
        if self.import_vm.is_some() {
            config.import_vm = self.import_vm.clone();
        }
        if self.no_share {
            config.no_share = true;
        }
        if self.share_folder.is_some() {
            config.share_folder = self.share_folder.clone();
        }
    }
}
