use std::time::Duration;

use crate::background::BackgroundReport;
use crate::similarity::SimilarityBatchReport;
use crate::stamps::ExtractionReport;
use crate::variance::VarianceBatchReport;

/// Pipeline processing stage, used for progress reporting and timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Fetch,
    PlateSolve,
    CatalogLookup,
    Background,
    Stamps,
    Variance,
    Similarity,
    Writing,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch => write!(f, "Loading frames"),
            Self::PlateSolve => write!(f, "Plate-solving"),
            Self::CatalogLookup => write!(f, "Looking up sources"),
            Self::Background => write!(f, "Subtracting background"),
            Self::Stamps => write!(f, "Creating stamps"),
            Self::Variance => write!(f, "Computing variance"),
            Self::Similarity => write!(f, "Finding similar sources"),
            Self::Writing => write!(f, "Writing stamp store"),
        }
    }
}

/// Thread-safe progress reporting for the pipeline.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations. Progress is
/// a side channel only; nothing in the pipeline waits on it.
pub trait ProgressReporter: Send + Sync {
    /// A new pipeline stage has started. `total_items` is the number of
    /// work items in this stage (frames or sources), if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// `items_done` work items within the current stage have completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when `run_pipeline` delegates.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StageTiming {
    pub stage: PipelineStage,
    pub elapsed: Duration,
}

/// Everything a run did, stage by stage.
#[derive(Clone, Debug, Default)]
pub struct PipelineSummary {
    pub sequence_id: String,
    /// Frames that reached stamp extraction.
    pub frame_count: usize,
    /// Frames dropped because plate solving failed, by original frame index.
    pub unsolved_frames: Vec<(usize, String)>,
    pub catalog_sources: usize,
    pub high_snr_sources: usize,
    pub background: Option<BackgroundReport>,
    pub stamps: Option<ExtractionReport>,
    pub variance: Option<VarianceBatchReport>,
    pub similarity: Option<SimilarityBatchReport>,
    pub store_path: Option<std::path::PathBuf>,
    pub timings: Vec<StageTiming>,
    /// Set when a cancellation request cut the run short.
    pub cancelled: bool,
}

impl PipelineSummary {
    pub fn total_elapsed(&self) -> Duration {
        self.timings.iter().map(|t| t.elapsed).sum()
    }

    pub fn elapsed(&self, stage: PipelineStage) -> Option<Duration> {
        self.timings
            .iter()
            .find(|t| t.stage == stage)
            .map(|t| t.elapsed)
    }
}

impl PipelineSummary {
    pub(super) fn record(&mut self, stage: PipelineStage, elapsed: Duration) {
        tracing::info!(%stage, elapsed_s = elapsed.as_secs_f64(), "Stage done");
        self.timings.push(StageTiming { stage, elapsed });
    }
}
