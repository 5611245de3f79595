//! `vboxkit create`

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::info;

use super::GlobalOpts;
use crate::common_opts::{ImageOpts, NetworkOpts, ResourceOpts};
use crate::config::DriverConfig;
use crate::driver::Driver;

/// Options for creating a machine
#[derive(Debug, Parser)]
pub struct CreateOpts {
    /// Name of the machine (default: generated)
    pub name: Option<String>,

    /// TOML file with machine settings; flags override it
    #[clap(long)]
    pub config: Option<Utf8PathBuf>,

    /// CPU, memory and disk
    #[clap(flatten)]
    pub resources: ResourceOpts,

    /// Adapters and SSH forwarding
    #[clap(flatten)]
    pub network: NetworkOpts,

    /// Boot image, import and sharing
    #[clap(flatten)]
    pub image: ImageOpts,
}

impl CreateOpts {
    /// File settings overlaid with the flags.
    pub fn driver_config(&self) -> Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::load(path)?,
            None => DriverConfig::default(),
        };
        self.resources.apply(&mut config);
        self.network.apply(&mut config);
        self.image.apply(&mut config);
        Ok(config)
    }

    /// The requested name or `vboxkit-<random>`.
    pub fn machine_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("vboxkit-{}", &id[..8])
            }
        }
    }
}

/// Execute the create command
pub fn run(global: &GlobalOpts, opts: CreateOpts) -> Result<()> {
    let name = opts.machine_name();
    let store = global.store()?;
    if store.machine(&name).exists() {
        return Err(eyre!("Machine '{name}' already exists"));
    }
    let config = opts.driver_config()?;
    let mut driver = Driver::new(name.as_str(), &store, global.vbox(), config);
    driver.create()?;
    info!("Machine '{name}' is running");
    println!("{name}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_generated_name() {
        let opts = CreateOpts::try_parse_from(["create"]).unwrap();
        let name = opts.machine_name();
        assert!(name.starts_with("vboxkit-"));
        assert_eq!(name.len(), "vboxkit-".len() + 8);
        assert_ne!(name, opts.machine_name());

        let opts = CreateOpts::try_parse_from(["create", "dev"]).unwrap();
        assert_eq!(opts.machine_name(), "dev");
    }

    #[test]
    fn test_flags_override_file() {
        let td = tempfile::TempDir::new().unwrap();
        let path = camino::Utf8Path::from_path(td.path()).unwrap().join("m.toml");
        std::fs::write(
            &path,
            indoc! {r#"
                cpus = 4
                memory = 4096
                no-share = true
            "#},
        )
        .unwrap();
        let opts =
            CreateOpts::try_parse_from(["create", "dev", "--config", path.as_str(), "--memory", "512"])
                .unwrap();
        let config = opts.driver_config().unwrap();
        assert_eq!(config.cpus, 4);
        assert_eq!(config.memory, 512);
        assert!(config.no_share);
    }
}
