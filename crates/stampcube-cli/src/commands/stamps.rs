use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use stampcube_core::background::{subtract_background, BackgroundConfig};
use stampcube_core::cancel::CancelToken;
use stampcube_core::catalog::SourceCatalog;
use stampcube_core::consts::DEFAULT_CATALOG_FILE_NAME;
use stampcube_core::observation::Observation;
use stampcube_core::stamps::{extract_into_store, StampSize};
use stampcube_core::store::StampStore;

use crate::progress::{advance_to, counter_bar};
use crate::summary::{print_background_report, print_extraction_report};

#[derive(Args)]
pub struct StampsArgs {
    /// Directory containing the observation frames
    pub image_dir: PathBuf,

    /// Source catalog (TOML); defaults to catalog.toml in the image directory
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Stamp store file; defaults to <sequence>.stamps in the image directory
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Minimum detection SNR for a source to get a stamp
    #[arg(long, default_value = "10")]
    pub snr_limit: f64,

    /// Square stamp side in pixels (odd)
    #[arg(long, default_value = "15")]
    pub stamp_size: usize,

    /// Cut stamps from background-subtracted frames
    #[arg(long)]
    pub subtract: bool,

    /// Overwrite stamps that already exist
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: &StampsArgs) -> Result<()> {
    let size = StampSize::square(args.stamp_size)?;
    let start = Instant::now();

    let mut observation = Observation::load(&args.image_dir)
        .with_context(|| format!("Failed to load frames from {}", args.image_dir.display()))?;
    println!(
        "Using sequence id {} with {} frames",
        observation.sequence_id(),
        observation.frame_count()
    );

    if args.subtract {
        let pb = counter_bar("Subtracting background", observation.frame_count());
        let outcome = subtract_background(&observation, &BackgroundConfig::default(), false, |n| {
            advance_to(&pb, n)
        })?;
        pb.finish();
        print_background_report(&outcome.report);
        observation = outcome.observation;
    }

    let catalog_path = args
        .catalog
        .clone()
        .unwrap_or_else(|| args.image_dir.join(DEFAULT_CATALOG_FILE_NAME));
    let catalog = SourceCatalog::load(&catalog_path)
        .with_context(|| format!("Failed to read catalog {}", catalog_path.display()))?;
    let high_snr = catalog.high_snr(args.snr_limit);
    println!("Sources found: {}", catalog.len());
    println!("Sources found w/ high SNR: {}", high_snr.len());

    let store_path = args
        .store
        .clone()
        .unwrap_or_else(|| observation.stamp_store_path());
    let store = StampStore::open_or_create(&store_path)?;

    let pb = counter_bar("Creating stamps", high_snr.len());
    let report = extract_into_store(
        &store,
        &observation,
        high_snr.as_slice(),
        size,
        args.force,
        &CancelToken::new(),
        |n| advance_to(&pb, n),
    )?;
    pb.finish();
    store
        .flush()
        .with_context(|| format!("Failed to write {}", store_path.display()))?;

    println!();
    print_extraction_report(&report);
    println!("\nStamps file: {}", store_path.display());
    println!("Total time: {:.2} seconds", start.elapsed().as_secs_f64());
    Ok(())
}
