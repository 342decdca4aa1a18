use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use stampcube_core::cancel::CancelToken;
use stampcube_core::pipeline::{
    run_pipeline_reported, Collaborators, PipelineConfig, ProgressReporter,
};
use stampcube_core::stamps::StampSize;

use crate::progress::BarReporter;
use crate::summary::{print_pipeline_summary, print_run_header};

#[derive(Args)]
pub struct RunArgs {
    /// Directory containing the observation frames
    #[arg(conflicts_with = "sequence")]
    pub image_dir: Option<PathBuf>,

    /// Pipeline config file (TOML); other flags are ignored when given
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Sequence id to fetch from the archive instead of an image directory
    #[arg(long)]
    pub sequence: Option<String>,

    /// Root directory of the local frame archive
    #[arg(long)]
    pub archive: Option<PathBuf>,

    /// Source catalog (TOML)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Stamp store file
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Row of the high-SNR catalog to process
    #[arg(long, conflicts_with = "all")]
    pub target_index: Option<usize>,

    /// Process every high-SNR source
    #[arg(long)]
    pub all: bool,

    /// Minimum detection SNR for a source to get a stamp
    #[arg(long, default_value = "10")]
    pub snr_limit: f64,

    /// Square stamp side in pixels (odd)
    #[arg(long, default_value = "15")]
    pub stamp_size: usize,

    /// Subtract the sky background before cutting stamps
    #[arg(long)]
    pub subtract: bool,

    /// Create stamps for every high-SNR source
    #[arg(long)]
    pub create_stamps: bool,

    /// Skip the variance stage
    #[arg(long)]
    pub no_variance: bool,

    /// Rank similar sources for each target
    #[arg(long)]
    pub find_similar: bool,

    /// Recompute background-subtracted frames
    #[arg(long)]
    pub force_subtract: bool,

    /// Overwrite existing stamps
    #[arg(long)]
    pub force_stamps: bool,

    /// Replace existing similarity results
    #[arg(long)]
    pub force_similarity: bool,

    /// Exclude frames that carry no WCS
    #[arg(long)]
    pub require_wcs: bool,
}

pub fn run(args: &RunArgs, verbose: bool) -> Result<()> {
    let config = if let Some(ref config_path) = args.config {
        PipelineConfig::load(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?
    } else {
        build_config_from_args(args)?
    };

    print_run_header(&config);

    // Bars and debug log lines interleave badly.
    let reporter: Arc<dyn ProgressReporter> = Arc::new(BarReporter::new(verbose));
    let collaborators = Collaborators::from_config(&config);
    let summary = run_pipeline_reported(&config, &collaborators, reporter, &CancelToken::new())?;

    print_pipeline_summary(&summary);
    Ok(())
}

fn build_config_from_args(args: &RunArgs) -> Result<PipelineConfig> {
    Ok(PipelineConfig {
        image_dir: args.image_dir.clone(),
        sequence: args.sequence.clone(),
        archive_root: args.archive.clone(),
        catalog: args.catalog.clone(),
        store: args.store.clone(),
        target_index: args.target_index,
        all_targets: args.all,
        snr_limit: args.snr_limit,
        stamp_size: StampSize::square(args.stamp_size)?,
        subtract: args.subtract,
        create_stamps: args.create_stamps,
        compute_variance: !args.no_variance,
        find_similar: args.find_similar,
        force_subtract: args.force_subtract,
        force_stamps: args.force_stamps,
        force_similarity: args.force_similarity,
        require_wcs: args.require_wcs,
        ..Default::default()
    })
}
