//! Differential-photometry variance of a target against a reference ensemble.
//!
//! Each source's per-frame brightness is divided by its own mean. The
//! ensemble composite is the per-frame median of the normalised reference
//! series, so seeing and transparency changes common to the field cancel in
//! the target/composite ratio. The reported variance is that of the ratio
//! rescaled to unit mean.

pub mod photometry;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::catalog::{Picid, QualityPolicy};
use crate::consts::{DEFAULT_MIN_VALID_FRAMES, EPSILON};
use crate::error::{Result, StampError};
use crate::stats::{mean_std, median};
use crate::store::{ResultValue, StampStore};

pub use photometry::{brightness_series, window_flux, Photometry};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VarianceConfig {
    #[serde(default)]
    pub photometry: Photometry,
    #[serde(default = "default_min_valid_frames")]
    pub min_valid_frames: usize,
    /// Gate for sources joining the implicit reference ensemble.
    #[serde(default)]
    pub quality: QualityPolicy,
}

fn default_min_valid_frames() -> usize {
    DEFAULT_MIN_VALID_FRAMES
}

impl Default for VarianceConfig {
    fn default() -> Self {
        Self {
            photometry: Photometry::default(),
            min_valid_frames: DEFAULT_MIN_VALID_FRAMES,
            quality: QualityPolicy::default(),
        }
    }
}

/// Stable key naming one parameterisation of a variance computation.
///
/// An explicit reference set is folded into an FNV-1a digest of its sorted ids.
pub fn params_key(photometry: &Photometry, min_valid_frames: usize, references: Option<&[Picid]>) -> String {
    let refs = match references {
        None => "auto".to_string(),
        Some(ids) => {
            let mut sorted: Vec<u64> = ids.iter().map(|p| p.0).collect();
            sorted.sort_unstable();
            sorted.dedup();
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for id in &sorted {
                for byte in id.to_le_bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(0x0100_0000_01b3);
                }
            }
            format!("{}:{hash:016x}", sorted.len())
        }
    };
    format!("{};min={};refs={}", photometry.key(), min_valid_frames, refs)
}

/// Normalised brightness fluctuation of one target.
#[derive(Clone, Debug, PartialEq)]
pub struct VarianceResult {
    pub target: Picid,
    pub params_key: String,
    /// Number of references that contributed to the composite.
    pub reference_count: usize,
    /// Stamp frame positions used, ascending.
    pub frame_indices: Vec<usize>,
    /// Target/composite ratio at each used frame, rescaled to unit mean.
    pub ratio: Vec<f64>,
    pub variance: f64,
}

impl VarianceResult {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum VarianceOutcome {
    Computed(VarianceResult),
    /// Too few usable frames (or no usable reference) for a numeric answer.
    InsufficientData { valid_frames: usize, required: usize },
}

/// Counts from a batch of variance computations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VarianceBatchReport {
    pub computed: usize,
    /// Targets that already held a result for these parameters.
    pub skipped: usize,
    pub insufficient: Vec<Picid>,
    pub failed: Vec<(Picid, String)>,
    pub cancelled: usize,
}

enum BatchItem {
    Done(VarianceOutcome),
    Skipped,
    Failed(StampError),
    Cancelled,
}

/// Mean-normalised brightness series; `None` marks unusable frames.
#[derive(Debug)]
struct NormalizedSeries {
    values: Vec<Option<f64>>,
}

fn normalize(series: Vec<Option<f64>>) -> Option<NormalizedSeries> {
    let valid: Vec<f64> = series.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    let (mean, _) = mean_std(&valid)?;
    if mean.abs() < EPSILON {
        return None;
    }
    Some(NormalizedSeries {
        values: series
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()).map(|x| x / mean))
            .collect(),
    })
}

pub struct VarianceEngine<'a> {
    store: &'a StampStore,
    config: VarianceConfig,
}

impl<'a> VarianceEngine<'a> {
    pub fn new(store: &'a StampStore, config: VarianceConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &VarianceConfig {
        &self.config
    }

    pub fn params_key(&self, references: Option<&[Picid]>) -> String {
        params_key(&self.config.photometry, self.config.min_valid_frames, references)
    }

    fn series_for(&self, picid: Picid) -> Result<Option<NormalizedSeries>> {
        let stamp = self.store.get(picid)?;
        Ok(normalize(brightness_series(&stamp, &self.config.photometry)))
    }

    /// Reference ids for `target`: the explicit list, or every other stored
    /// source passing the quality policy.
    fn reference_ids(&self, target: Picid, references: Option<&[Picid]>) -> Vec<Picid> {
        match references {
            Some(ids) => ids
                .iter()
                .copied()
                .filter(|&id| id != target)
                .filter(|&id| {
                    let present = self.store.contains(id);
                    if !present {
                        warn!(%target, reference = %id, "Reference source not in store; ignoring");
                    }
                    present
                })
                .collect(),
            None => self
                .store
                .keys()
                .into_iter()
                .filter(|&id| id != target && self.accepted_reference(id))
                .collect(),
        }
    }

    fn accepted_reference(&self, id: Picid) -> bool {
        self.store
            .attrs(id)
            .map(|a| self.config.quality.accepts(a.flags, a.vmag))
            .unwrap_or(false)
    }

    /// Variance of `target`'s brightness relative to a reference ensemble.
    pub fn variance_for(&self, target: Picid, references: Option<&[Picid]>) -> Result<VarianceOutcome> {
        let ids = self.reference_ids(target, references);
        let mut refs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(series) = self.series_for(id)? {
                refs.push(series);
            }
        }
        let refs: Vec<&NormalizedSeries> = refs.iter().collect();
        let target_series = self.series_for(target)?;
        Ok(self.compute(
            target,
            target_series.as_ref(),
            &refs,
            self.params_key(references),
        ))
    }

    fn compute(
        &self,
        target: Picid,
        target_series: Option<&NormalizedSeries>,
        refs: &[&NormalizedSeries],
        key: String,
    ) -> VarianceOutcome {
        let required = self.config.min_valid_frames.max(1);
        let insufficient = |valid_frames: usize| VarianceOutcome::InsufficientData {
            valid_frames,
            required,
        };

        let Some(target_series) = target_series else {
            return insufficient(0);
        };
        let target_valid = target_series.values.iter().flatten().count();
        if target_valid < required || refs.is_empty() {
            debug!(%target, target_valid, references = refs.len(), "Insufficient data for variance");
            return insufficient(target_valid);
        }

        let mut frame_indices = Vec::new();
        let mut ratio = Vec::new();
        for (i, value) in target_series.values.iter().enumerate() {
            let Some(t) = value else { continue };
            let mut column: Vec<f64> = refs.iter().filter_map(|r| r.values.get(i).copied().flatten()).collect();
            let Some(composite) = median(&mut column) else { continue };
            if composite.abs() < EPSILON {
                continue;
            }
            frame_indices.push(i);
            ratio.push(t / composite);
        }

        if ratio.len() < required {
            return insufficient(ratio.len());
        }
        let Some((mean, _)) = mean_std(&ratio) else {
            return insufficient(0);
        };
        if mean.abs() < EPSILON || !mean.is_finite() {
            return insufficient(ratio.len());
        }
        for r in ratio.iter_mut() {
            *r /= mean;
        }
        let variance = match mean_std(&ratio) {
            Some((_, std)) if std.is_finite() => std * std,
            _ => return insufficient(ratio.len()),
        };

        VarianceOutcome::Computed(VarianceResult {
            target,
            params_key: key,
            reference_count: refs.len(),
            frame_indices,
            ratio,
            variance,
        })
    }

    /// Compute and commit the variance of `target`, reusing a stored result
    /// for the same parameterisation unless `force` is set. Force-replacing
    /// any stamp in the store drops stored results, so reuse never spans a
    /// changed reference.
    pub fn compute_and_store(
        &self,
        target: Picid,
        references: Option<&[Picid]>,
        force: bool,
    ) -> Result<VarianceOutcome> {
        let key = self.params_key(references);
        if !force {
            if let Some(existing) = self.store.variance(target, &key) {
                debug!(%target, "Variance already stored; skipping");
                return Ok(VarianceOutcome::Computed((*existing).clone()));
            }
        }
        let outcome = self.variance_for(target, references)?;
        if let VarianceOutcome::Computed(result) = &outcome {
            self.store
                .set_result(target, ResultValue::Variance(result.clone()))?;
        }
        Ok(outcome)
    }

    /// Variance for many targets against the implicit ensemble, in parallel.
    ///
    /// Normalised series are computed once and shared. Per-target failures
    /// are counted and never abort the batch.
    pub fn variance_for_all(
        &self,
        targets: &[Picid],
        force: bool,
        cancel: &CancelToken,
        on_progress: impl Fn(usize) + Send + Sync,
    ) -> Result<VarianceBatchReport> {
        let key = self.params_key(None);
        let mut cache: BTreeMap<Picid, Option<NormalizedSeries>> = BTreeMap::new();
        for id in self.store.keys() {
            cache.insert(id, self.series_for(id)?);
        }
        let eligible: Vec<Picid> = self
            .store
            .keys()
            .into_iter()
            .filter(|&id| self.accepted_reference(id))
            .collect();

        let done = AtomicUsize::new(0);
        let items: Vec<(Picid, BatchItem)> = targets
            .par_iter()
            .map(|&target| {
                let item = if cancel.is_cancelled() {
                    BatchItem::Cancelled
                } else if !force && self.store.has_variance(target, &key) {
                    BatchItem::Skipped
                } else {
                    match self.batch_one(target, &cache, &eligible, &key) {
                        Ok(outcome) => BatchItem::Done(outcome),
                        Err(e) => BatchItem::Failed(e),
                    }
                };
                on_progress(done.fetch_add(1, Ordering::Relaxed) + 1);
                (target, item)
            })
            .collect();

        let mut report = VarianceBatchReport::default();
        for (target, item) in items {
            match item {
                BatchItem::Cancelled => report.cancelled += 1,
                BatchItem::Skipped => report.skipped += 1,
                BatchItem::Done(VarianceOutcome::Computed(_)) => report.computed += 1,
                BatchItem::Done(VarianceOutcome::InsufficientData { .. }) => {
                    report.insufficient.push(target)
                }
                BatchItem::Failed(e) => {
                    warn!(%target, error = %e, "Variance failed");
                    report.failed.push((target, e.to_string()));
                }
            }
        }
        info!(
            computed = report.computed,
            insufficient = report.insufficient.len(),
            failed = report.failed.len(),
            "Variance batch complete"
        );
        Ok(report)
    }

    fn batch_one(
        &self,
        target: Picid,
        cache: &BTreeMap<Picid, Option<NormalizedSeries>>,
        eligible: &[Picid],
        key: &str,
    ) -> Result<VarianceOutcome> {
        let target_series = cache
            .get(&target)
            .ok_or(StampError::SourceNotFound(target))?
            .as_ref();
        let refs: Vec<&NormalizedSeries> = eligible
            .iter()
            .filter(|&&id| id != target)
            .filter_map(|id| cache.get(id).and_then(Option::as_ref))
            .collect();
        let outcome = self.compute(target, target_series, &refs, key.to_string());
        if let VarianceOutcome::Computed(result) = &outcome {
            self.store
                .set_result(target, ResultValue::Variance(result.clone()))?;
        }
        Ok(outcome)
    }
}
