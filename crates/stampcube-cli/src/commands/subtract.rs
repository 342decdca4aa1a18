use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use stampcube_core::background::{subtract_background, subtract::subtracted_dir, BackgroundConfig};
use stampcube_core::observation::Observation;

use crate::progress::{advance_to, counter_bar};
use crate::summary::print_background_report;

#[derive(Args)]
pub struct SubtractArgs {
    /// Directory containing the observation frames
    pub image_dir: PathBuf,

    /// Recompute frames that were already subtracted
    #[arg(long)]
    pub force: bool,

    /// Background tile size in pixels
    #[arg(long, default_value = "64")]
    pub block_size: usize,

    /// Sigma-clipping threshold for background tiles
    #[arg(long, default_value = "3.0")]
    pub clip_sigma: f32,

    /// Sigma-clipping iterations for background tiles
    #[arg(long, default_value = "3")]
    pub clip_iterations: usize,
}

pub fn run(args: &SubtractArgs) -> Result<()> {
    let observation = Observation::load(&args.image_dir)
        .with_context(|| format!("Failed to load frames from {}", args.image_dir.display()))?;
    let config = BackgroundConfig {
        block_size: args.block_size,
        clip_sigma: args.clip_sigma,
        clip_iterations: args.clip_iterations,
    };

    let start = std::time::Instant::now();
    let pb = counter_bar("Subtracting background", observation.frame_count());
    let outcome = subtract_background(&observation, &config, args.force, |n| advance_to(&pb, n))?;
    pb.finish();

    println!();
    print_background_report(&outcome.report);
    println!(
        "\nSubtracted frames in {} ({:.2} s)",
        subtracted_dir(&observation).display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
