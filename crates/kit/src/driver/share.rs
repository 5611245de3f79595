//! Host folders shared into the guest

use color_eyre::Result;
use tracing::{debug, info};

use crate::vboxmanage::VBoxManage;

/// Host operating system family, for shared folder defaults and path syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    /// Shares `/home`
    Linux,
    /// Shares `/Users`
    MacOs,
    /// Shares `C:\Users`
    Windows,
    /// No default share
    Other,
}

impl HostPlatform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                HostPlatform::Linux
            } else if #[cfg(target_os = "macos")] {
                HostPlatform::MacOs
            } else if #[cfg(windows)] {
                HostPlatform::Windows
            } else {
                HostPlatform::Other
            }
        }
    }
}

/// One VirtualBox shared folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFolder {
    /// Share name; the guest mounts it at `/<name>`
    pub name: String,
    /// Directory on the host
    pub host_path: String,
}

/// Convert a Windows path such as `C:\Users\me` to `/c/Users/me`.
///
/// Paths on other platforms are returned unchanged.
pub fn to_guest_path(path: &str, platform: HostPlatform) -> String {
    if platform != HostPlatform::Windows {
        return path.to_string();
    }
    let path = path.replace('\\', "/");
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            format!(
                "/{}/{}",
                drive.to_ascii_lowercase(),
                chars.as_str().trim_start_matches('/')
            )
        }
        _ => path,
    }
}

/// Share name for a host directory: its guest path without the leading `/`.
///
/// VirtualBox mishandles share names starting with `/`.
pub fn share_name_for(host_path: &str, platform: HostPlatform) -> String {
    to_guest_path(host_path, platform)
        .trim_start_matches('/')
        .to_string()
}

impl SharedFolder {
    fn from_host_path(host_path: &str, platform: HostPlatform) -> Self {
        Self {
            name: share_name_for(host_path, platform),
            host_path: host_path.to_string(),
        }
    }

    /// Parse `hostdir[:name]`; a drive letter colon is not a separator.
    pub fn parse(spec: &str, platform: HostPlatform) -> Self {
        if let Some((dir, name)) = spec.rsplit_once(':') {
            let drive_letter = dir.len() == 1 && dir.chars().all(|c| c.is_ascii_alphabetic());
            let name_is_path = name.is_empty() || name.contains(['/', '\\']);
            if !dir.is_empty() && !drive_letter && !name_is_path {
                return Self {
                    name: name.trim_start_matches('/').to_string(),
                    host_path: dir.to_string(),
                };
            }
        }
        Self::from_host_path(spec, platform)
    }

    /// The share used when none is configured.
    pub fn platform_default(platform: HostPlatform) -> Option<Self> {
        let (host_path, name) = match platform {
            HostPlatform::MacOs => ("/Users", "Users"),
            HostPlatform::Linux => ("/home", "hosthome"),
            HostPlatform::Windows => (r"C:\Users", "c/Users"),
            HostPlatform::Other => return None,
        };
        Some(Self {
            name: name.to_string(),
            host_path: host_path.to_string(),
        })
    }

    /// Resolve the folder to share from the `no-share` and `share-folder` settings.
    pub fn resolve(no_share: bool, spec: Option<&str>, platform: HostPlatform) -> Option<Self> {
        if no_share {
            return None;
        }
        match spec {
            Some(spec) => Some(Self::parse(spec, platform)),
            None => Self::platform_default(platform),
        }
    }

    /// Register the folder with auto-mount and allow symlinks inside it.
    pub fn attach(&self, vbox: &dyn VBoxManage, vm: &str) -> Result<()> {
        info!("Sharing {} as {}", self.host_path, self.name);
        vbox.exec(&[
            "sharedfolder",
            "add",
            vm,
            "--name",
            &self.name,
            "--hostpath",
            &self.host_path,
            "--automount",
        ])?;
        let key = format!("VBoxInternal2/SharedFoldersEnableSymlinksCreate/{}", self.name);
        debug!("Enabling symlinks via {key}");
        vbox.exec(&["setextradata", vm, &key, "1"])
    }
}
