use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::consts::SUBTRACTED_DIR_NAME;
use crate::error::Result;
use crate::frame::ObservationFrame;
use crate::io::frame_file::{read_frame_file, write_frame_file};
use crate::observation::Observation;

use super::estimate::estimate_background;
use super::BackgroundConfig;

/// Counts from one background pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackgroundReport {
    /// Frames whose background was estimated and written in this run.
    pub subtracted: usize,
    /// Frames whose previously subtracted output was reused.
    pub reused: usize,
    /// Frames (by original frame index) excluded from later stages, with the reason.
    pub failed: Vec<(usize, String)>,
}

pub struct BackgroundOutcome {
    /// The subtracted observation, without failed frames.
    pub observation: Observation,
    pub report: BackgroundReport,
}

enum FrameResult {
    Subtracted(Array2<f32>),
    Reused(Array2<f32>),
    Failed(String),
}

/// Directory holding the subtracted frames of an observation.
pub fn subtracted_dir(observation: &Observation) -> PathBuf {
    observation.image_dir().join(SUBTRACTED_DIR_NAME)
}

fn subtracted_path(dir: &Path, frame: &ObservationFrame) -> PathBuf {
    let stem = frame
        .metadata
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("frame_{:05}", frame.metadata.frame_index));
    dir.join(format!("{stem}.sub"))
}

/// Subtract a sky model from every frame.
///
/// Results are written under `<image_dir>/background_subtracted/` and reused
/// on later runs unless `force` is set. A frame whose estimate or write fails
/// is logged and excluded; the pass fails only if no frame survives.
pub fn subtract_background(
    observation: &Observation,
    config: &BackgroundConfig,
    force: bool,
    on_progress: impl Fn(usize) + Send + Sync,
) -> Result<BackgroundOutcome> {
    let dir = subtracted_dir(observation);
    std::fs::create_dir_all(&dir)?;

    let done = AtomicUsize::new(0);
    let results: Vec<FrameResult> = observation
        .frames()
        .par_iter()
        .map(|frame| {
            let result = process_frame(&dir, frame, config, force);
            let completed = done.fetch_add(1, Ordering::Relaxed) + 1;
            on_progress(completed);
            result
        })
        .collect();

    let mut report = BackgroundReport::default();
    let mut data = Vec::with_capacity(results.len());
    let mut excluded = Vec::new();

    for (pos, (frame, result)) in observation.frames().iter().zip(results).enumerate() {
        let index = frame.metadata.frame_index;
        match result {
            FrameResult::Subtracted(d) => {
                report.subtracted += 1;
                data.push(d);
            }
            FrameResult::Reused(d) => {
                report.reused += 1;
                data.push(d);
            }
            FrameResult::Failed(reason) => {
                warn!(frame = index, %reason, "Background subtraction failed; excluding frame");
                report.failed.push((index, reason));
                excluded.push(pos);
                // Placeholder keeps positions aligned until the frame is dropped.
                data.push(frame.data.clone());
            }
        }
    }

    let subtracted = observation.with_frame_data(data)?;
    // Fails with `EmptyObservation` when every frame was excluded.
    let observation = subtracted.without_frames(&excluded)?;

    info!(
        subtracted = report.subtracted,
        reused = report.reused,
        failed = report.failed.len(),
        "Background subtraction complete"
    );
    Ok(BackgroundOutcome {
        observation,
        report,
    })
}

fn process_frame(
    dir: &Path,
    frame: &ObservationFrame,
    config: &BackgroundConfig,
    force: bool,
) -> FrameResult {
    let path = subtracted_path(dir, frame);

    if !force && path.is_file() {
        match read_frame_file(&path) {
            Ok(d) if d.dim() == frame.data.dim() => {
                debug!(path = %path.display(), "Reusing subtracted frame");
                return FrameResult::Reused(d);
            }
            Ok(d) => warn!(
                path = %path.display(),
                found = ?d.dim(),
                expected = ?frame.data.dim(),
                "Subtracted frame has wrong shape; recomputing"
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "Unreadable subtracted frame; recomputing"),
        }
    }

    let model = match estimate_background(&frame.data, config) {
        Ok(m) => m,
        Err(e) => return FrameResult::Failed(e.to_string()),
    };
    debug!(
        frame = frame.metadata.frame_index,
        level = model.level,
        noise = model.noise,
        "Estimated background"
    );

    let subtracted = &frame.data - &model.surface;
    if let Err(e) = write_frame_file(&path, &subtracted) {
        return FrameResult::Failed(format!("cannot write {}: {e}", path.display()));
    }
    FrameResult::Subtracted(subtracted)
}
