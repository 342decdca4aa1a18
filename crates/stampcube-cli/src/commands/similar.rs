use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use stampcube_core::cancel::CancelToken;
use stampcube_core::catalog::Picid;
use stampcube_core::similarity::{MetricKind, SimilarityConfig, SimilarityEngine, SimilarityOutcome};
use stampcube_core::store::StampStore;
use stampcube_core::variance::Photometry;

use crate::progress::{advance_to, counter_bar};
use crate::summary::print_similarity_report;

#[derive(Clone, ValueEnum)]
pub enum MetricArg {
    Morphology,
    FluxCorrelation,
}

#[derive(Args)]
pub struct SimilarArgs {
    /// Stamp store file
    pub store: PathBuf,

    /// Only search for this source; otherwise every source
    #[arg(long)]
    pub picid: Option<Picid>,

    /// Number of similar sources to keep per target
    #[arg(long, default_value = "200")]
    pub top_k: usize,

    /// Similarity metric
    #[arg(long, value_enum, default_value = "morphology")]
    pub metric: MetricArg,

    /// Faintest catalog magnitude accepted as a candidate
    #[arg(long, default_value = "13.0")]
    pub max_vmag: f64,

    /// Replace existing results
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: &SimilarArgs) -> Result<()> {
    let store = StampStore::open(&args.store)
        .with_context(|| format!("Failed to open stamp store {}", args.store.display()))?;

    let mut config = SimilarityConfig {
        top_k: args.top_k,
        metric: match args.metric {
            MetricArg::Morphology => MetricKind::Morphology,
            MetricArg::FluxCorrelation => MetricKind::FluxCorrelation(Photometry::Sum),
        },
        ..Default::default()
    };
    config.quality.max_vmag = args.max_vmag;
    let engine = SimilarityEngine::new(&store, config);

    match args.picid {
        Some(picid) => match engine.find_similar(picid, None, args.force)? {
            SimilarityOutcome::Skipped => {
                println!("Similar sources for {} already exist (use --force)", picid)
            }
            SimilarityOutcome::Rejected => {
                let attrs = store.attrs(picid)?;
                println!(
                    "Source {} fails the quality policy (flags {}, vmag {:.2}); skipping",
                    picid, attrs.flags, attrs.vmag
                )
            }
            SimilarityOutcome::Computed(result) => {
                println!(
                    "\nTop {} similar sources for {} [{}]:",
                    result.len(),
                    picid,
                    result.metric
                );
                println!("{:>5}  {:>12}  {:>12}", "Rank", "PICID", "Score");
                println!("{}", "-".repeat(33));
                for (rank, m) in result.matches.iter().take(20).enumerate() {
                    println!("{:>5}  {:>12}  {:>12.6}", rank + 1, m.picid, m.score);
                }
            }
        },
        None => {
            let pb = counter_bar("Looping sources", store.len());
            let report =
                engine.find_similar_for_all(None, args.force, &CancelToken::new(), |n| advance_to(&pb, n));
            pb.finish();
            println!();
            print_similarity_report(&report);
        }
    }

    store.flush()?;
    Ok(())
}
