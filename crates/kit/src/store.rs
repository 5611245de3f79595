//! On-disk layout of machines
//!
//! ```text
//! <root>/cache/boot2docker.iso
//! <root>/machines/<name>/{config.toml,id_rsa,id_rsa.pub,disk.vmdk,boot2docker.iso}
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};

use crate::bootimage::ISO_FILENAME;

/// Name of the private key inside a machine directory
pub const SSH_KEY_NAME: &str = "id_rsa";
/// Name of the data disk inside a machine directory
pub const DISK_FILENAME: &str = "disk.vmdk";
/// Configuration the machine was created with
pub const CONFIG_FILENAME: &str = "config.toml";

/// Root of all vboxkit state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    /// Use `root` as storage directory.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data dir>/vboxkit`, e.g. `~/.local/share/vboxkit` on Linux.
    pub fn default_root() -> Result<Utf8PathBuf> {
        let data = dirs::data_dir().ok_or_else(|| eyre!("Unable to determine data directory"))?;
        let data = Utf8PathBuf::from_path_buf(data)
            .map_err(|p| eyre!("Data directory is not UTF-8: {}", p.display()))?;
        Ok(data.join("vboxkit"))
    }

    /// Storage root
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Shared boot image cache
    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join("cache")
    }

    /// Directory of one machine
    pub fn machine(&self, name: &str) -> MachineDir {
        MachineDir {
            dir: self.root.join("machines").join(name),
        }
    }
}

/// Files belonging to one machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineDir {
    dir: Utf8PathBuf,
}

impl MachineDir {
    /// The directory itself
    pub fn path(&self) -> &Utf8Path {
        &self.dir
    }

    /// Private SSH key
    pub fn ssh_key(&self) -> Utf8PathBuf {
        self.dir.join(SSH_KEY_NAME)
    }

    /// Public half of [`Self::ssh_key`]
    pub fn ssh_public_key(&self) -> Utf8PathBuf {
        self.dir.join(format!("{SSH_KEY_NAME}.pub"))
    }

    /// Data disk
    pub fn disk(&self) -> Utf8PathBuf {
        self.dir.join(DISK_FILENAME)
    }

    /// Saved [`crate::config::DriverConfig`]
    pub fn config(&self) -> Utf8PathBuf {
        self.dir.join(CONFIG_FILENAME)
    }

    /// Boot ISO copied from the cache
    pub fn iso(&self) -> Utf8PathBuf {
        self.dir.join(ISO_FILENAME)
    }

    /// Whether the directory exists.
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Create the directory and its parents.
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| format!("Creating {}", self.dir))
    }

    /// Delete the directory; a missing directory is not an error.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Removing {}", self.dir)),
        }
    }
}
