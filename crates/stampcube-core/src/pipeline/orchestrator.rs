use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::background::subtract_background;
use crate::cancel::CancelToken;
use crate::catalog::{Picid, SourceCatalog};
use crate::error::{Result, StampError};
use crate::frame::Wcs;
use crate::observation::Observation;
use crate::similarity::SimilarityEngine;
use crate::stamps::extract_into_store;
use crate::store::StampStore;
use crate::variance::VarianceEngine;

use super::collaborators::{with_timeout, Collaborators};
use super::config::{PipelineConfig, TargetSelection};
use super::types::{NoOpReporter, PipelineStage, PipelineSummary, ProgressReporter};

/// Load the configured observation, fetching the sequence through the
/// collaborator when no image directory is given.
fn load_observation(config: &PipelineConfig, collaborators: &Collaborators) -> Result<Observation> {
    if let Some(dir) = &config.image_dir {
        return Observation::load(dir);
    }
    let sequence = config
        .sequence
        .clone()
        .ok_or_else(|| StampError::InvalidInput("no observation configured".into()))?;
    let fetcher = collaborators
        .fetcher
        .clone()
        .ok_or_else(|| StampError::InvalidInput("no frame fetcher configured".into()))?;

    let requested = sequence.clone();
    let paths = with_timeout("fetch", collaborators.fetch_timeout, move || {
        fetcher.fetch(&requested)
    })?;
    info!(%sequence, files = paths.len(), "Fetched sequence");
    Observation::from_paths(&sequence, &paths)
}

/// Attach a WCS to every frame the solver accepts and drop the rest.
fn plate_solve(
    observation: &Observation,
    collaborators: &Collaborators,
    reporter: &Arc<dyn ProgressReporter>,
    summary: &mut PipelineSummary,
) -> Result<Observation> {
    let done = AtomicUsize::new(0);
    let results: Vec<Result<Option<Wcs>>> = observation
        .frames()
        .par_iter()
        .map(|frame| {
            let solver = Arc::clone(&collaborators.solver);
            let owned = frame.clone();
            let result = with_timeout("plate-solve", collaborators.solve_timeout, move || {
                solver.solve(&owned)
            });
            reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
            result
        })
        .collect();

    let mut frames = Vec::with_capacity(results.len());
    for (frame, result) in observation.frames().iter().zip(results) {
        match result {
            Ok(wcs) => {
                let mut solved = frame.clone();
                if wcs.is_some() {
                    solved.metadata.wcs = wcs;
                }
                frames.push(solved);
            }
            Err(e) => {
                warn!(frame = frame.metadata.frame_index, error = %e, "Can't solve frame; excluding");
                summary
                    .unsolved_frames
                    .push((frame.metadata.frame_index, e.to_string()));
            }
        }
    }
    Observation::new(observation.sequence_id(), observation.image_dir(), frames)
}

/// Picids that variance and similarity run for, if any.
fn resolve_targets(
    selection: Option<TargetSelection>,
    catalog: &SourceCatalog,
) -> Result<Option<Vec<Picid>>> {
    match selection {
        None => Ok(None),
        Some(TargetSelection::All) => Ok(Some(catalog.iter().map(|s| s.picid).collect())),
        Some(TargetSelection::Index(i)) => {
            let source = catalog.row(i).ok_or_else(|| {
                StampError::InvalidInput(format!(
                    "target index {i} out of range ({} high-SNR sources)",
                    catalog.len()
                ))
            })?;
            info!(index = i, picid = %source.picid, vmag = source.vmag, snr = source.snr, "Selected target");
            Ok(Some(vec![source.picid]))
        }
    }
}

/// Run the full pipeline with a thread-safe progress reporter.
///
/// Stages run in order: fetch, plate-solve, catalog lookup, background,
/// stamps, variance, similarity, writing. Each stage's wall time is recorded
/// in the summary. A cancellation request skips the remaining compute stages;
/// results committed so far are still written.
pub fn run_pipeline_reported(
    config: &PipelineConfig,
    collaborators: &Collaborators,
    reporter: Arc<dyn ProgressReporter>,
    cancel: &CancelToken,
) -> Result<PipelineSummary> {
    config.validate()?;
    let mut summary = PipelineSummary::default();

    // Fetch
    reporter.begin_stage(PipelineStage::Fetch, None);
    let started = Instant::now();
    let loaded = load_observation(config, collaborators)?;
    summary.record(PipelineStage::Fetch, started.elapsed());
    reporter.finish_stage();
    info!(
        sequence = loaded.sequence_id(),
        frames = loaded.frame_count(),
        "Using observation"
    );

    // Plate solve
    reporter.begin_stage(PipelineStage::PlateSolve, Some(loaded.frame_count()));
    let started = Instant::now();
    let observation = Arc::new(plate_solve(&loaded, collaborators, &reporter, &mut summary)?);
    drop(loaded);
    summary.record(PipelineStage::PlateSolve, started.elapsed());
    reporter.finish_stage();

    // Catalog lookup
    reporter.begin_stage(PipelineStage::CatalogLookup, None);
    let started = Instant::now();
    let lookup = Arc::clone(&collaborators.catalog);
    let for_lookup = Arc::clone(&observation);
    let catalog = with_timeout("catalog-lookup", collaborators.lookup_timeout, move || {
        lookup.lookup(&for_lookup)
    })?;
    let high_snr = catalog.high_snr(config.snr_limit);
    info!(
        sources = catalog.len(),
        high_snr = high_snr.len(),
        snr_limit = config.snr_limit,
        "Sources found"
    );
    summary.catalog_sources = catalog.len();
    summary.high_snr_sources = high_snr.len();
    let targets = resolve_targets(config.target_selection(), &high_snr)?;
    summary.record(PipelineStage::CatalogLookup, started.elapsed());
    reporter.finish_stage();

    // Background
    let mut observation = observation;
    if config.subtract && !cancelled(cancel, &mut summary) {
        reporter.begin_stage(PipelineStage::Background, Some(observation.frame_count()));
        let started = Instant::now();
        let outcome = subtract_background(
            &observation,
            &config.background,
            config.force_subtract,
            |n| reporter.advance(n),
        )?;
        observation = Arc::new(outcome.observation);
        summary.background = Some(outcome.report);
        summary.record(PipelineStage::Background, started.elapsed());
        reporter.finish_stage();
    }
    summary.sequence_id = observation.sequence_id().to_string();
    summary.frame_count = observation.frame_count();

    let wants_results = targets.is_some() && (config.compute_variance || config.find_similar);
    if !config.create_stamps && !wants_results {
        info!("No stamp work requested");
        return Ok(summary);
    }

    let store_path = config
        .store
        .clone()
        .unwrap_or_else(|| observation.stamp_store_path());
    let store = if config.create_stamps {
        StampStore::open_or_create(&store_path)?
    } else {
        StampStore::open(&store_path)?
    };

    // Stamps
    if config.create_stamps && !cancelled(cancel, &mut summary) {
        reporter.begin_stage(PipelineStage::Stamps, Some(high_snr.len()));
        let started = Instant::now();
        let report = extract_into_store(
            &store,
            &observation,
            high_snr.as_slice(),
            config.stamp_size,
            config.force_stamps,
            cancel,
            |n| reporter.advance(n),
        )?;
        summary.cancelled |= report.cancelled > 0;
        summary.stamps = Some(report);
        summary.record(PipelineStage::Stamps, started.elapsed());
        reporter.finish_stage();
    }

    if let Some(targets) = &targets {
        // Variance
        if config.compute_variance && !cancelled(cancel, &mut summary) {
            reporter.begin_stage(PipelineStage::Variance, Some(targets.len()));
            let started = Instant::now();
            let engine = VarianceEngine::new(&store, config.variance.clone());
            let report =
                engine.variance_for_all(targets, config.force_variance, cancel, |n| reporter.advance(n))?;
            summary.cancelled |= report.cancelled > 0;
            summary.variance = Some(report);
            summary.record(PipelineStage::Variance, started.elapsed());
            reporter.finish_stage();
        }

        // Similarity
        if config.find_similar && !cancelled(cancel, &mut summary) {
            reporter.begin_stage(PipelineStage::Similarity, Some(targets.len()));
            let started = Instant::now();
            let engine = SimilarityEngine::new(&store, config.similarity.clone());
            let report = engine.find_similar_for_all(
                Some(targets.as_slice()),
                config.force_similarity,
                cancel,
                |n| reporter.advance(n),
            );
            summary.cancelled |= report.cancelled > 0;
            summary.similarity = Some(report);
            summary.record(PipelineStage::Similarity, started.elapsed());
            reporter.finish_stage();
        }
    }

    // Writing
    reporter.begin_stage(PipelineStage::Writing, None);
    let started = Instant::now();
    store.flush()?;
    summary.store_path = store.path().map(Path::to_path_buf);
    summary.record(PipelineStage::Writing, started.elapsed());
    reporter.finish_stage();

    info!(
        total_s = summary.total_elapsed().as_secs_f64(),
        cancelled = summary.cancelled,
        "Pipeline complete"
    );
    Ok(summary)
}

fn cancelled(cancel: &CancelToken, summary: &mut PipelineSummary) -> bool {
    if cancel.is_cancelled() {
        summary.cancelled = true;
    }
    summary.cancelled
}

/// Run the full pipeline with the file-backed collaborators from `config`.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineSummary> {
    let reporter: Arc<dyn ProgressReporter> = Arc::new(NoOpReporter);
    let collaborators = Collaborators::from_config(config);
    run_pipeline_reported(config, &collaborators, reporter, &CancelToken::new())
}
