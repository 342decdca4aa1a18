use serde::{Deserialize, Serialize};

use crate::consts::EPSILON;
use crate::stamps::Stamp;
use crate::stats::mean_std;
use crate::variance::{brightness_series, Photometry};

/// Pluggable similarity strategy between two stamps of the same observation.
///
/// Scores are ordered so that a higher score means a closer match. `None`
/// means the pair cannot be compared (too few frames valid in both).
pub trait SimilarityMetric: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `score(a, b) == score(b, a)`.
    fn is_symmetric(&self) -> bool {
        true
    }

    /// Inclusive bounds of the score, if it has any.
    fn bounds(&self) -> Option<(f64, f64)> {
        None
    }

    fn score(&self, target: &Stamp, candidate: &Stamp, min_common_frames: usize) -> Option<f64>;
}

/// Built-in metric selection for configuration files.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Pearson correlation of per-frame brightness.
    FluxCorrelation(Photometry),
    /// Negative mean squared difference of flux-normalised stamps.
    #[default]
    Morphology,
}

impl MetricKind {
    pub fn build(&self) -> Box<dyn SimilarityMetric> {
        match self {
            Self::FluxCorrelation(photometry) => Box::new(FluxCorrelation {
                photometry: photometry.clone(),
            }),
            Self::Morphology => Box::new(MorphologyDistance),
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FluxCorrelation(p) => write!(f, "Flux Correlation ({p})"),
            Self::Morphology => write!(f, "Morphology"),
        }
    }
}

fn common_valid_frames(a: &Stamp, b: &Stamp) -> Vec<usize> {
    let n = a.frame_count().min(b.frame_count());
    (0..n)
        .filter(|&i| a.is_frame_valid(i) && b.is_frame_valid(i))
        .collect()
}

/// Pearson correlation of brightness series over frames valid in both.
/// Bounded to [-1, 1]; undefined (None) when either series is constant.
#[derive(Clone, Debug, Default)]
pub struct FluxCorrelation {
    pub photometry: Photometry,
}

impl SimilarityMetric for FluxCorrelation {
    fn name(&self) -> &str {
        "flux-correlation"
    }

    fn bounds(&self) -> Option<(f64, f64)> {
        Some((-1.0, 1.0))
    }

    fn score(&self, target: &Stamp, candidate: &Stamp, min_common_frames: usize) -> Option<f64> {
        let ts = brightness_series(target, &self.photometry);
        let cs = brightness_series(candidate, &self.photometry);
        let (x, y): (Vec<f64>, Vec<f64>) = ts
            .iter()
            .zip(cs.iter())
            .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
            .unzip();
        if x.len() < min_common_frames.max(2) {
            return None;
        }

        let (mx, sx) = mean_std(&x)?;
        let (my, sy) = mean_std(&y)?;
        if sx < EPSILON || sy < EPSILON {
            return None;
        }
        let cov = x
            .iter()
            .zip(y.iter())
            .map(|(a, b)| (a - mx) * (b - my))
            .sum::<f64>()
            / x.len() as f64;
        Some((cov / (sx * sy)).clamp(-1.0, 1.0))
    }
}

/// Compares stamp shapes frame by frame: each window is divided by its own
/// total flux, then the squared pixel differences are averaged. The score is
/// the negated average, so identical morphology scores 0 and worse matches
/// score lower.
#[derive(Clone, Copy, Debug, Default)]
pub struct MorphologyDistance;

impl SimilarityMetric for MorphologyDistance {
    fn name(&self) -> &str {
        "morphology"
    }

    fn bounds(&self) -> Option<(f64, f64)> {
        Some((f64::NEG_INFINITY, 0.0))
    }

    fn score(&self, target: &Stamp, candidate: &Stamp, min_common_frames: usize) -> Option<f64> {
        if target.size() != candidate.size() {
            return None;
        }
        let mut total = 0.0f64;
        let mut frames = 0usize;
        for i in common_valid_frames(target, candidate) {
            let a = target.frame(i);
            let b = candidate.frame(i);
            let sa: f64 = a.iter().map(|&v| v as f64).sum();
            let sb: f64 = b.iter().map(|&v| v as f64).sum();
            if sa.abs() < EPSILON || sb.abs() < EPSILON {
                continue;
            }
            total += a
                .iter()
                .zip(b.iter())
                .map(|(&pa, &pb)| {
                    let d = pa as f64 / sa - pb as f64 / sb;
                    d * d
                })
                .sum::<f64>();
            frames += 1;
        }
        if frames < min_common_frames.max(1) {
            return None;
        }
        let pixels = target.size().rows * target.size().cols;
        Some(-(total / (frames * pixels) as f64))
    }
}
