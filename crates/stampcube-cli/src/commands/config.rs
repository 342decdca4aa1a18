use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use stampcube_core::pipeline::PipelineConfig;

#[derive(Args)]
pub struct ConfigArgs {
    /// Image directory to put in the generated config
    #[arg(long, default_value = "frames")]
    pub image_dir: PathBuf,

    /// Select every high-SNR source instead of catalog row 0
    #[arg(long)]
    pub all: bool,

    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a stamp-creating PipelineConfig with every default spelled out.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = PipelineConfig {
        target_index: (!args.all).then_some(0),
        all_targets: args.all,
        create_stamps: true,
        find_similar: true,
        ..PipelineConfig::for_image_dir(&args.image_dir)
    };
    config.validate()?;
    let text = toml::to_string_pretty(&config).context("Failed to encode config")?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("Failed to write config to {}", path.display()))?;
            println!("Config saved to {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}
