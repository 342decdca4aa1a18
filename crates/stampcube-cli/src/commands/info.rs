use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use stampcube_core::catalog::Picid;
use stampcube_core::store::{ResultKind, StampStore};

#[derive(Args)]
pub struct InfoArgs {
    /// Stamp store file
    pub store: PathBuf,

    /// Show one source in detail
    #[arg(long)]
    pub picid: Option<Picid>,

    /// Number of similar sources to list
    #[arg(long, default_value = "10")]
    pub top: usize,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let store = StampStore::open(&args.store)
        .with_context(|| format!("Failed to open stamp store {}", args.store.display()))?;

    let keys = store.keys();
    let with_similarity = keys
        .iter()
        .filter(|&&id| store.has_result(id, ResultKind::Similarity))
        .count();
    let with_variance = keys
        .iter()
        .filter(|&&id| store.has_result(id, ResultKind::Variance))
        .count();

    println!("File:        {}", args.store.display());
    println!("Sources:     {}", store.len());
    match store.stamp_shape() {
        Some((rows, cols, frames)) => {
            println!("Stamp size:  {}x{}", rows, cols);
            println!("Frames:      {}", frames);
        }
        None => println!("Stamp size:  (empty store)"),
    }
    println!("Similarity:  {} source(s)", with_similarity);
    println!("Variance:    {} source(s)", with_variance);

    let Some(picid) = args.picid else {
        return Ok(());
    };
    let entry = store
        .entry(picid)
        .with_context(|| format!("Source {picid} not in store"))?;

    println!();
    println!("PICID:       {}", picid);
    println!("Flags:       {}", entry.attrs.flags);
    println!("Vmag:        {:.2}", entry.attrs.vmag);
    println!("SNR:         {:.1}", entry.attrs.snr);
    println!(
        "Valid:       {}/{} frames",
        entry.stamp.valid_frame_count(),
        entry.stamp.frame_count()
    );

    for (key, result) in &entry.variance {
        println!(
            "Variance:    {:.6e} (std {:.4}, {} frames, {} refs) [{}]",
            result.variance,
            result.std_dev(),
            result.ratio.len(),
            result.reference_count,
            key
        );
    }

    if let Some(similar) = &entry.similarity {
        println!("\nSimilar sources [{}] (of {}):", similar.metric, similar.len());
        println!("{:>5}  {:>12}  {:>12}", "Rank", "PICID", "Score");
        println!("{}", "-".repeat(33));
        for (rank, m) in similar.matches.iter().take(args.top).enumerate() {
            println!("{:>5}  {:>12}  {:>12.6}", rank + 1, m.picid, m.score);
        }
    }

    Ok(())
}
