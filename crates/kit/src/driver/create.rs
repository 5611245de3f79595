//! Creating a new machine

use std::fs;
use std::net::Ipv4Addr;

use camino::Utf8Path;
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use tracing::{debug, info};

use super::share::SharedFolder;
use super::Driver;
use crate::cidr::{dhcp_range, parse_and_validate_cidr, random_ip_in_subnet};
use crate::config::host_cpus;
use crate::network::{get_or_create_hostonly_network, HostOnlyNetwork, HostOnlyRequest};
use crate::store::SSH_KEY_NAME;
use crate::vboxmanage::ensure_usable;
use crate::vminfo::{get_disk_info, get_vm_info};

/// Key pair of the base VM imported on the clone path, under `~/.ssh`
const IMPORT_KEY_NAME: &str = "id_boot2docker";

fn on_off(b: bool) -> &'static str {
    if b {
        "on"
    } else {
        "off"
    }
}

impl Driver {
    /// Create, configure and boot the machine.
    pub fn create(&mut self) -> Result<()> {
        ensure_usable(self.vbox.as_ref())?;
        let (host_ip, network) = parse_and_validate_cidr(&self.config.hostonly_cidr)?;

        self.machine.create()?;
        self.config.save(&self.machine.config())?;
        info!("Fetching boot image...");
        let url = Some(self.config.boot2docker_url.as_str()).filter(|u| !u.is_empty());
        let iso = self.machine.iso();
        self.images.fetch(&iso, url)?;

        let (cpus, memory) = match self.config.import_vm.clone() {
            Some(base) => self.import_from(&base)?,
            None => {
                info!("Creating SSH key...");
                self.ssh.generate_keypair(self.machine.path(), SSH_KEY_NAME)?;
                self.create_disk()?;
                (self.config.effective_cpus(host_cpus()), self.config.memory)
            }
        };

        info!("Creating VirtualBox VM...");
        let basefolder = self.machine.path().to_string();
        self.vbox.exec(&[
            "createvm",
            "--basefolder",
            &basefolder,
            "--name",
            &self.name,
            "--register",
        ])?;
        self.configure_vm(cpus, memory)?;

        self.vbox.exec(&[
            "modifyvm",
            &self.name,
            "--nic1",
            "nat",
            "--nictype1",
            &self.config.nat_nictype,
            "--cableconnected1",
            "on",
        ])?;
        let hostonly = self.setup_hostonly_network(host_ip, network.ip, network.mask)?;
        self.vbox.exec(&[
            "modifyvm",
            &self.name,
            "--nic2",
            "hostonly",
            "--nictype2",
            &self.config.hostonly_nictype,
            "--nicpromisc2",
            &self.config.hostonly_nicpromisc,
            "--hostonlyadapter2",
            &hostonly.name,
            "--cableconnected2",
            "on",
        ])?;

        self.attach_storage(&iso)?;

        // Let the guest additions automount shares at /<name>.
        for key in ["MountPrefix", "MountDir"] {
            let prop = format!("/VirtualBox/GuestAdd/SharedFolders/{key}");
            self.vbox
                .exec(&["guestproperty", "set", &self.name, &prop, "/"])?;
        }
        self.attach_shared_folder()?;

        info!("Starting VirtualBox VM...");
        self.start()?;

        let public_key = fs::read_to_string(self.machine.ssh_public_key())
            .with_context(|| format!("Reading {}", self.machine.ssh_public_key()))?;
        self.install_ssh_key(&public_key)?;
        Ok(())
    }

    /// Clone disk, key and resources from an existing VM.
    fn import_from(&self, base: &str) -> Result<(u32, u32)> {
        info!("Importing VM {base}...");
        if let Err(e) = self.vbox.exec(&["controlvm", base, "poweroff"]) {
            debug!("Powering off {base}: {e}");
        }
        let disk = get_disk_info(self.vbox.as_ref(), base)?;
        if !Utf8Path::new(&disk.path).exists() {
            return Err(eyre!("Disk {:?} of VM {base} does not exist", disk.path));
        }
        let dest = self.machine.disk();
        self.vbox.exec(&["clonehd", &disk.path, dest.as_str()])?;

        let vm = get_vm_info(self.vbox.as_ref(), base)?;
        let cpus = if self.config.cpus <= 0 {
            vm.cpus.clamp(1, crate::config::MAX_CPUS)
        } else {
            self.config.effective_cpus(host_cpus())
        };
        let memory = if self.config.memory == 0 {
            vm.memory_mb
        } else {
            self.config.memory
        };

        debug!("Importing SSH key...");
        let home = self
            .home_dir
            .as_ref()
            .ok_or_else(|| eyre!("Unable to determine home directory"))?;
        let src = home.join(".ssh").join(IMPORT_KEY_NAME);
        let src_pub = home.join(".ssh").join(format!("{IMPORT_KEY_NAME}.pub"));
        fs::copy(&src, self.machine.ssh_key()).with_context(|| format!("Copying {src}"))?;
        fs::copy(&src_pub, self.machine.ssh_public_key())
            .with_context(|| format!("Copying {src_pub}"))?;
        Ok((cpus, memory))
    }

    fn create_disk(&self) -> Result<()> {
        let disk = self.machine.disk();
        let size = self.config.disk_size.to_string();
        info!("Creating {size} MB disk image...");
        self.vbox.exec(&[
            "createhd",
            "--filename",
            disk.as_str(),
            "--size",
            &size,
            "--format",
            "VMDK",
        ])
    }

    fn configure_vm(&self, cpus: u32, memory: u32) -> Result<()> {
        let cpus = cpus.to_string();
        let memory = memory.to_string();
        self.vbox.exec(&[
            "modifyvm",
            &self.name,
            "--firmware",
            "bios",
            "--bioslogofadein",
            "off",
            "--bioslogofadeout",
            "off",
            "--bioslogodisplaytime",
            "0",
            "--biosbootmenu",
            "disabled",
            "--ostype",
            "Linux26_64",
            "--cpus",
            &cpus,
            "--memory",
            &memory,
            "--acpi",
            "on",
            "--ioapic",
            "on",
            "--rtcuseutc",
            "on",
            "--natdnshostresolver1",
            on_off(self.config.host_dns_resolver),
            "--natdnsproxy1",
            "off",
            "--cpuhotplug",
            "off",
            "--pae",
            "on",
            "--hpet",
            "on",
            "--hwvirtex",
            "on",
            "--nestedpaging",
            "on",
            "--largepages",
            "on",
            "--vtxvpid",
            "on",
            "--accelerate3d",
            "off",
            "--boot1",
            "dvd",
        ])
    }

    fn setup_hostonly_network(
        &self,
        host_ip: Ipv4Addr,
        network: Ipv4Addr,
        netmask: Ipv4Addr,
    ) -> Result<HostOnlyNetwork> {
        let dhcp_ip = random_ip_in_subnet(&mut rand::rng(), network)?;
        let (lower_ip, upper_ip) = dhcp_range(network);
        get_or_create_hostonly_network(
            self.vbox.as_ref(),
            &HostOnlyRequest {
                host_ip,
                netmask,
                dhcp_ip,
                lower_ip,
                upper_ip,
            },
        )
    }

    fn attach_storage(&self, iso: &Utf8Path) -> Result<()> {
        self.vbox.exec(&[
            "storagectl",
            &self.name,
            "--name",
            "SATA",
            "--add",
            "sata",
            "--hostiocache",
            "on",
        ])?;
        let disk = self.machine.disk();
        for (port, kind, medium) in [("0", "dvddrive", iso), ("1", "hdd", disk.as_path())] {
            self.vbox.exec(&[
                "storageattach",
                &self.name,
                "--storagectl",
                "SATA",
                "--port",
                port,
                "--device",
                "0",
                "--type",
                kind,
                "--medium",
                medium.as_str(),
            ])?;
        }
        Ok(())
    }

    fn attach_shared_folder(&self) -> Result<()> {
        let Some(share) = SharedFolder::resolve(
            self.config.no_share,
            self.config.share_folder.as_deref(),
            self.platform,
        ) else {
            return Ok(());
        };
        match fs::metadata(&share.host_path) {
            Ok(_) => share.attach(self.vbox.as_ref(), &self.name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} does not exist, not sharing it", share.host_path);
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Checking {}", share.host_path)),
        }
    }
}
