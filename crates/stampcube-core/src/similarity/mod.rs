pub mod metric;

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::catalog::{Picid, QualityPolicy};
use crate::consts::{DEFAULT_MIN_COMMON_FRAMES, DEFAULT_TOP_K};
use crate::error::{Result, StampError};
use crate::store::{ResultKind, ResultValue, StampStore};

pub use metric::{FluxCorrelation, MetricKind, MorphologyDistance, SimilarityMetric};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarityConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Gate applied to candidates and, in batch runs, to targets.
    #[serde(default)]
    pub quality: QualityPolicy,
    #[serde(default = "default_min_common_frames")]
    pub min_common_frames: usize,
    #[serde(default)]
    pub metric: MetricKind,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}
fn default_min_common_frames() -> usize {
    DEFAULT_MIN_COMMON_FRAMES
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            quality: QualityPolicy::default(),
            min_common_frames: DEFAULT_MIN_COMMON_FRAMES,
            metric: MetricKind::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarMatch {
    pub picid: Picid,
    pub score: f64,
}

/// Candidates ranked by descending score, best match first.
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarityResult {
    pub target: Picid,
    pub metric: String,
    pub matches: Vec<SimilarMatch>,
}

impl SimilarityResult {
    pub fn similar_stars(&self) -> Vec<Picid> {
        self.matches.iter().map(|m| m.picid).collect()
    }

    pub fn similar_star_scores(&self) -> Vec<f64> {
        self.matches.iter().map(|m| m.score).collect()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SimilarityOutcome {
    Computed(SimilarityResult),
    /// A result already existed and recompute was not forced.
    Skipped,
    /// The target fails the quality policy and was not searched.
    Rejected,
}

/// Counts from a batch similarity search.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimilarityBatchReport {
    pub computed: usize,
    pub skipped_existing: usize,
    /// Targets that fail the quality policy themselves.
    pub rejected_targets: usize,
    pub failed: Vec<(Picid, String)>,
    pub cancelled: usize,
}

enum BatchItem {
    Computed,
    Skipped,
    Rejected,
    Failed(StampError),
    Cancelled,
}

pub struct SimilarityEngine<'a> {
    store: &'a StampStore,
    config: SimilarityConfig,
    metric: Box<dyn SimilarityMetric>,
}

impl<'a> SimilarityEngine<'a> {
    pub fn new(store: &'a StampStore, config: SimilarityConfig) -> Self {
        let metric = config.metric.build();
        Self::with_metric(store, config, metric)
    }

    /// Use a custom strategy instead of `config.metric`.
    pub fn with_metric(
        store: &'a StampStore,
        config: SimilarityConfig,
        metric: Box<dyn SimilarityMetric>,
    ) -> Self {
        Self {
            store,
            config,
            metric,
        }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    pub fn metric_name(&self) -> &str {
        self.metric.name()
    }

    /// Candidate ids surviving the quality policy, excluding the target.
    fn eligible_candidates(&self, target: Picid, candidates: Option<&[Picid]>) -> Vec<Picid> {
        let ids = match candidates {
            Some(ids) => ids.to_vec(),
            None => self.store.keys(),
        };
        ids.into_iter()
            .filter(|&id| id != target)
            .filter(|&id| match self.store.attrs(id) {
                Ok(a) => self.config.quality.accepts(a.flags, a.vmag),
                Err(_) => {
                    warn!(%target, candidate = %id, "Candidate not in store; ignoring");
                    false
                }
            })
            .collect()
    }

    /// Score and rank candidates against `target` without touching the store.
    pub fn rank(&self, target: Picid, candidates: Option<&[Picid]>) -> Result<SimilarityResult> {
        let target_stamp = self.store.get(target)?;
        let eligible = self.eligible_candidates(target, candidates);

        let mut matches: Vec<SimilarMatch> = eligible
            .par_iter()
            .filter_map(|&id| {
                let stamp = self.store.get(id).ok()?;
                let score = self
                    .metric
                    .score(&target_stamp, &stamp, self.config.min_common_frames)?;
                score.is_finite().then_some(SimilarMatch { picid: id, score })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.picid.cmp(&b.picid)));
        matches.truncate(self.config.top_k);
        debug!(
            %target,
            candidates = eligible.len(),
            kept = matches.len(),
            "Ranked similar sources"
        );

        Ok(SimilarityResult {
            target,
            metric: self.metric.name().to_string(),
            matches,
        })
    }

    /// Rank candidates for `target` and commit the list to the store.
    ///
    /// A target failing the quality policy is never searched and gets
    /// `Rejected`, even with `force`. With `force == false` an existing result
    /// is kept and `Skipped` returned.
    pub fn find_similar(
        &self,
        target: Picid,
        candidates: Option<&[Picid]>,
        force: bool,
    ) -> Result<SimilarityOutcome> {
        let attrs = self.store.attrs(target)?;
        if !self.config.quality.accepts(attrs.flags, attrs.vmag) {
            debug!(%target, flags = attrs.flags, vmag = attrs.vmag, "Target fails quality policy");
            return Ok(SimilarityOutcome::Rejected);
        }
        if !force && self.store.has_result(target, ResultKind::Similarity) {
            debug!(%target, "Similar sources already stored; skipping");
            return Ok(SimilarityOutcome::Skipped);
        }
        let result = self.rank(target, candidates)?;
        self.store
            .set_result(target, ResultValue::Similarity(result.clone()))?;
        Ok(SimilarityOutcome::Computed(result))
    }

    /// Run `find_similar` for many targets (default: every stored source).
    ///
    /// Targets that fail the quality policy are not searched. One target's
    /// failure is counted and never stops the others.
    pub fn find_similar_for_all(
        &self,
        targets: Option<&[Picid]>,
        force: bool,
        cancel: &CancelToken,
        on_progress: impl Fn(usize) + Send + Sync,
    ) -> SimilarityBatchReport {
        let targets = match targets {
            Some(ids) => ids.to_vec(),
            None => self.store.keys(),
        };

        let done = AtomicUsize::new(0);
        let items: Vec<(Picid, BatchItem)> = targets
            .par_iter()
            .map(|&target| {
                let item = self.batch_one(target, force, cancel);
                on_progress(done.fetch_add(1, Ordering::Relaxed) + 1);
                (target, item)
            })
            .collect();

        let mut report = SimilarityBatchReport::default();
        for (target, item) in items {
            match item {
                BatchItem::Computed => report.computed += 1,
                BatchItem::Skipped => report.skipped_existing += 1,
                BatchItem::Rejected => report.rejected_targets += 1,
                BatchItem::Cancelled => report.cancelled += 1,
                BatchItem::Failed(e) => {
                    warn!(%target, error = %e, "Similarity search failed");
                    report.failed.push((target, e.to_string()));
                }
            }
        }
        info!(
            computed = report.computed,
            skipped = report.skipped_existing,
            rejected = report.rejected_targets,
            failed = report.failed.len(),
            "Similarity search complete"
        );
        report
    }

    fn batch_one(&self, target: Picid, force: bool, cancel: &CancelToken) -> BatchItem {
        if cancel.is_cancelled() {
            return BatchItem::Cancelled;
        }
        match self.find_similar(target, None, force) {
            Ok(SimilarityOutcome::Computed(_)) => BatchItem::Computed,
            Ok(SimilarityOutcome::Skipped) => BatchItem::Skipped,
            Ok(SimilarityOutcome::Rejected) => BatchItem::Rejected,
            Err(e) => BatchItem::Failed(e),
        }
    }
}
