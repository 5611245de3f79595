//! `vboxkit inspect`

use clap::Parser;
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};

use super::{GlobalOpts, OutputFormat};
use crate::driver::MachineInfo;

/// Options for inspecting a machine
#[derive(Debug, Parser)]
pub struct InspectOpts {
    /// Name of the machine to inspect
    pub name: String,

    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub format: OutputFormat,
}

/// Render `info` in the requested format.
pub fn render(info: &MachineInfo, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => {
            serde_yaml::to_string(info).context("Failed to serialize machine as YAML")
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(info).context("Failed to serialize machine as JSON")
        }
        OutputFormat::Table => Err(eyre!("Table format is not supported for inspect command")),
    }
}

/// Execute the inspect command
pub fn run(global: &GlobalOpts, opts: InspectOpts) -> Result<()> {
    let info = global.driver(&opts.name)?.inspect()?;
    println!("{}", render(&info, opts.format)?.trim_end());
    Ok(())
}
