use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{s, Array3, Axis};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::catalog::{Picid, PointSource};
use crate::consts::{INVALID_PIXEL, PARALLEL_SOURCE_THRESHOLD};
use crate::error::{Result, StampError};
use crate::observation::Observation;
use crate::store::{StampAttrs, StampStore};

use super::stamp::{Stamp, StampSize};

/// Stamps cut in memory, plus the sources that never fell inside any frame.
#[derive(Debug, Default)]
pub struct StampExtraction {
    pub stamps: BTreeMap<Picid, Stamp>,
    pub dropped: Vec<Picid>,
}

/// Counts from writing stamps into a store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionReport {
    pub written: usize,
    pub replaced: usize,
    pub skipped_existing: usize,
    /// Sources whose window was out of bounds in every frame.
    pub dropped: Vec<Picid>,
    pub failed: Vec<(Picid, String)>,
    /// Sources left unprocessed because the run was cancelled.
    pub cancelled: usize,
}

/// Top-left corner (row, col) of the window centred on pixel position (x, y),
/// or `None` when any part of the window leaves the image.
fn window_origin(x: f64, y: f64, size: StampSize, height: usize, width: usize) -> Option<(usize, usize)> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    // Bounds are checked in f64 so far-off positions never reach an integer cast.
    let row0 = y.round() - size.half_rows() as f64;
    let col0 = x.round() - size.half_cols() as f64;
    if row0 < 0.0
        || col0 < 0.0
        || row0 + size.rows as f64 > height as f64
        || col0 + size.cols as f64 > width as f64
    {
        return None;
    }
    Some((row0 as usize, col0 as usize))
}

/// Cut one source's window from every frame. Frames where the window leaves
/// the image are filled with `INVALID_PIXEL`. `None` if no frame is usable.
fn cut_stamp(observation: &Observation, source: &PointSource, size: StampSize) -> Option<Stamp> {
    let frames = observation.frames();
    let mut cube = Array3::from_elem((size.rows, size.cols, frames.len()), INVALID_PIXEL);
    let mut valid = 0usize;

    for (fi, frame) in frames.iter().enumerate() {
        let (x, y) = source.position_in(frame);
        if let Some((r0, c0)) = window_origin(x, y, size, frame.height(), frame.width()) {
            let window = frame.data.slice(s![r0..r0 + size.rows, c0..c0 + size.cols]);
            cube.index_axis_mut(Axis(2), fi).assign(&window);
            valid += 1;
        }
    }

    if valid == 0 {
        return None;
    }
    if valid < frames.len() {
        debug!(
            picid = %source.picid,
            valid,
            frames = frames.len(),
            "Stamp window out of bounds in some frames"
        );
    }
    Stamp::new(cube).ok()
}

/// Cut a stamp for every source across every frame of `observation`.
///
/// Runs in parallel across sources. Each returned stamp has shape
/// `(size.rows, size.cols, frame_count)`.
pub fn extract(
    observation: &Observation,
    sources: &[PointSource],
    size: StampSize,
) -> Result<StampExtraction> {
    size.validate()?;
    if sources.is_empty() {
        return Err(StampError::EmptySourceList);
    }

    let cut_one = |s: &PointSource| (s.picid, cut_stamp(observation, s, size));
    let cut: Vec<(Picid, Option<Stamp>)> = if sources.len() >= PARALLEL_SOURCE_THRESHOLD {
        sources.par_iter().map(cut_one).collect()
    } else {
        sources.iter().map(cut_one).collect()
    };

    let mut extraction = StampExtraction::default();
    for (picid, stamp) in cut {
        match stamp {
            Some(stamp) => {
                extraction.stamps.insert(picid, stamp);
            }
            None => extraction.dropped.push(picid),
        }
    }
    if !extraction.dropped.is_empty() {
        warn!(
            dropped = extraction.dropped.len(),
            "Sources out of bounds in every frame"
        );
    }
    Ok(extraction)
}

enum SourceOutcome {
    Written,
    Replaced,
    Dropped,
    Failed(String),
    Cancelled,
}

/// Cut stamps and commit each one to `store` as soon as it is complete.
///
/// Sources that already have an entry are left untouched unless `force_new`
/// is set, in which case the entry is overwritten in place.
pub fn extract_into_store(
    store: &StampStore,
    observation: &Observation,
    sources: &[PointSource],
    size: StampSize,
    force_new: bool,
    cancel: &CancelToken,
    on_progress: impl Fn(usize) + Send + Sync,
) -> Result<ExtractionReport> {
    size.validate()?;
    if sources.is_empty() {
        return Err(StampError::EmptySourceList);
    }

    let expected = (size.rows, size.cols, observation.frame_count());
    if let Some(existing) = store.stamp_shape() {
        if existing != expected {
            return Err(StampError::ShapeMismatch {
                expected: existing,
                actual: expected,
            });
        }
    }

    let mut report = ExtractionReport::default();
    let pending: Vec<&PointSource> = sources
        .iter()
        .filter(|s| {
            let exists = store.contains(s.picid);
            if exists && !force_new {
                report.skipped_existing += 1;
            }
            force_new || !exists
        })
        .collect();

    let done = AtomicUsize::new(0);
    let outcomes: Vec<(Picid, SourceOutcome)> = pending
        .par_iter()
        .map(|source| {
            let outcome = if cancel.is_cancelled() {
                SourceOutcome::Cancelled
            } else {
                commit_source(store, observation, source, size)
            };
            on_progress(done.fetch_add(1, Ordering::Relaxed) + 1);
            (source.picid, outcome)
        })
        .collect();

    for (picid, outcome) in outcomes {
        match outcome {
            SourceOutcome::Written => report.written += 1,
            SourceOutcome::Replaced => report.replaced += 1,
            SourceOutcome::Dropped => report.dropped.push(picid),
            SourceOutcome::Failed(reason) => {
                warn!(%picid, %reason, "Stamp creation failed");
                report.failed.push((picid, reason));
            }
            SourceOutcome::Cancelled => report.cancelled += 1,
        }
    }

    info!(
        written = report.written,
        replaced = report.replaced,
        skipped = report.skipped_existing,
        dropped = report.dropped.len(),
        failed = report.failed.len(),
        "Stamp extraction complete"
    );
    Ok(report)
}

fn commit_source(
    store: &StampStore,
    observation: &Observation,
    source: &PointSource,
    size: StampSize,
) -> SourceOutcome {
    let Some(stamp) = cut_stamp(observation, source, size) else {
        return SourceOutcome::Dropped;
    };
    let attrs = StampAttrs::from(source);
    let result = if store.contains(source.picid) {
        store
            .replace(source.picid, stamp, attrs)
            .map(|_| SourceOutcome::Replaced)
    } else {
        store
            .put(source.picid, stamp, attrs)
            .map(|_| SourceOutcome::Written)
    };
    result.unwrap_or_else(|e| SourceOutcome::Failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_origin_bounds() {
        let size = StampSize::square(3).unwrap();
        assert_eq!(window_origin(5.0, 5.0, size, 10, 10), Some((4, 4)));
        assert_eq!(window_origin(1.0, 1.0, size, 10, 10), Some((0, 0)));
        assert_eq!(window_origin(0.4, 5.0, size, 10, 10), None);
        assert_eq!(window_origin(8.0, 8.0, size, 10, 10), Some((7, 7)));
        assert_eq!(window_origin(9.0, 8.0, size, 10, 10), None);
        assert_eq!(window_origin(f64::NAN, 2.0, size, 10, 10), None);
        assert_eq!(window_origin(1e19, 5.0, size, 10, 10), None);
        assert_eq!(window_origin(-1e19, 5.0, size, 10, 10), None);
        assert_eq!(window_origin(5.0, f64::MAX, size, 10, 10), None);
        assert_eq!(window_origin(5.0, f64::MIN, size, 10, 10), None);
    }
}
