use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use stampcube_core::cancel::CancelToken;
use stampcube_core::catalog::Picid;
use stampcube_core::store::StampStore;
use stampcube_core::variance::{Photometry, VarianceConfig, VarianceEngine, VarianceOutcome};

use crate::progress::{advance_to, counter_bar};
use crate::summary::print_variance_report;

#[derive(Args)]
pub struct VarianceArgs {
    /// Stamp store file
    pub store: PathBuf,

    /// Target source
    #[arg(long, conflicts_with = "all")]
    pub picid: Option<Picid>,

    /// Compute variance for every source in the store
    #[arg(long)]
    pub all: bool,

    /// Comma-separated reference PICIDs (default: quality-filtered ensemble)
    #[arg(long, value_delimiter = ',', requires = "picid")]
    pub references: Option<Vec<Picid>>,

    /// Circular aperture radius in pixels (default: sum of the whole stamp)
    #[arg(long)]
    pub aperture: Option<f64>,

    /// Minimum number of valid frames for a result
    #[arg(long, default_value = "2")]
    pub min_frames: usize,

    /// Recompute stored results
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: &VarianceArgs) -> Result<()> {
    if args.picid.is_none() && !args.all {
        bail!("Target --picid (or --all) required to compute variance");
    }
    let store = StampStore::open(&args.store)
        .with_context(|| format!("Failed to open stamp store {}", args.store.display()))?;

    let photometry = match args.aperture {
        Some(radius) => Photometry::Aperture { radius },
        None => Photometry::Sum,
    };
    let config = VarianceConfig {
        photometry,
        min_valid_frames: args.min_frames,
        ..Default::default()
    };
    let engine = VarianceEngine::new(&store, config);

    if let Some(picid) = args.picid {
        println!("Getting variance for {}", picid);
        match engine.compute_and_store(picid, args.references.as_deref(), args.force)? {
            VarianceOutcome::Computed(result) => {
                println!("Variance:    {:.6e}", result.variance);
                println!("Std dev:     {:.6}", result.std_dev());
                println!("Frames used: {}", result.frame_indices.len());
                println!("References:  {}", result.reference_count);
            }
            VarianceOutcome::InsufficientData {
                valid_frames,
                required,
            } => {
                println!(
                    "Insufficient data: {} valid frame(s), {} required",
                    valid_frames, required
                );
            }
        }
    } else {
        let targets = store.keys();
        let pb = counter_bar("Computing variance", targets.len());
        let report =
            engine.variance_for_all(&targets, args.force, &CancelToken::new(), |n| advance_to(&pb, n))?;
        pb.finish();
        println!();
        print_variance_report(&report);
    }

    store.flush()?;
    Ok(())
}
