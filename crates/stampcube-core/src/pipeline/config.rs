use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::background::BackgroundConfig;
use crate::consts::{
    DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_LOOKUP_TIMEOUT_SECS, DEFAULT_SNR_LIMIT,
    DEFAULT_SOLVE_TIMEOUT_SECS,
};
use crate::error::{Result, StampError};
use crate::similarity::SimilarityConfig;
use crate::stamps::StampSize;
use crate::variance::VarianceConfig;

/// Explicit configuration for one pipeline run.
///
/// Either `image_dir` or `sequence` (with `archive_root`) names the observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub image_dir: Option<PathBuf>,
    pub sequence: Option<String>,
    /// Root of a local archive holding `<root>/<sequence>/` directories.
    pub archive_root: Option<PathBuf>,
    /// Source catalog (TOML). Defaults to `<image_dir>/catalog.toml`.
    pub catalog: Option<PathBuf>,
    /// Stamp container. Defaults to `<image_dir>/<sequence_id>.stamps`.
    pub store: Option<PathBuf>,

    /// Row of the high-SNR catalog to process.
    pub target_index: Option<usize>,
    #[serde(default)]
    pub all_targets: bool,

    #[serde(default = "default_snr_limit")]
    pub snr_limit: f64,
    #[serde(default)]
    pub stamp_size: StampSize,

    #[serde(default)]
    pub subtract: bool,
    #[serde(default)]
    pub create_stamps: bool,
    #[serde(default = "default_true")]
    pub compute_variance: bool,
    #[serde(default)]
    pub find_similar: bool,

    #[serde(default)]
    pub force_subtract: bool,
    #[serde(default)]
    pub force_stamps: bool,
    #[serde(default)]
    pub force_variance: bool,
    #[serde(default)]
    pub force_similarity: bool,

    /// Fail frames that carry no WCS instead of using catalog pixel positions.
    #[serde(default)]
    pub require_wcs: bool,
    #[serde(default = "default_solve_timeout")]
    pub solve_timeout_secs: u64,
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub variance: VarianceConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
}

fn default_snr_limit() -> f64 {
    DEFAULT_SNR_LIMIT
}
fn default_true() -> bool {
    true
}
fn default_solve_timeout() -> u64 {
    DEFAULT_SOLVE_TIMEOUT_SECS
}
fn default_lookup_timeout() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT_SECS
}
fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_dir: None,
            sequence: None,
            archive_root: None,
            catalog: None,
            store: None,
            target_index: None,
            all_targets: false,
            snr_limit: DEFAULT_SNR_LIMIT,
            stamp_size: StampSize::default(),
            subtract: false,
            create_stamps: false,
            compute_variance: true,
            find_similar: false,
            force_subtract: false,
            force_stamps: false,
            force_variance: false,
            force_similarity: false,
            require_wcs: false,
            solve_timeout_secs: DEFAULT_SOLVE_TIMEOUT_SECS,
            lookup_timeout_secs: DEFAULT_LOOKUP_TIMEOUT_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            background: BackgroundConfig::default(),
            variance: VarianceConfig::default(),
            similarity: SimilarityConfig::default(),
        }
    }
}

/// Which catalog sources variance and similarity run for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSelection {
    /// One row of the high-SNR catalog.
    Index(usize),
    All,
}

impl PipelineConfig {
    pub fn for_image_dir(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: Some(image_dir.into()),
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn target_selection(&self) -> Option<TargetSelection> {
        match (self.target_index, self.all_targets) {
            (Some(i), _) => Some(TargetSelection::Index(i)),
            (None, true) => Some(TargetSelection::All),
            (None, false) => None,
        }
    }

    /// Reject configurations that cannot run, before any work starts.
    pub fn validate(&self) -> Result<()> {
        match (&self.image_dir, &self.sequence) {
            (None, None) => {
                return Err(StampError::InvalidInput(
                    "either an image directory or a sequence id is required".into(),
                ))
            }
            (None, Some(_)) if self.archive_root.is_none() => {
                return Err(StampError::InvalidInput(
                    "fetching a sequence requires an archive root".into(),
                ))
            }
            _ => {}
        }
        if self.target_index.is_some() && self.all_targets {
            return Err(StampError::InvalidInput(
                "target index and all targets are mutually exclusive".into(),
            ));
        }
        if self.create_stamps && self.target_selection().is_none() {
            return Err(StampError::InvalidInput(
                "target index (or all targets) required to create stamps".into(),
            ));
        }
        if !self.snr_limit.is_finite() {
            return Err(StampError::InvalidInput(format!(
                "SNR limit must be finite, got {}",
                self.snr_limit
            )));
        }
        self.stamp_size.validate()?;
        if self.background.block_size == 0 {
            return Err(StampError::InvalidInput(
                "background block size must be positive".into(),
            ));
        }
        if self.similarity.top_k == 0 {
            return Err(StampError::InvalidInput("top_k must be positive".into()));
        }
        Ok(())
    }
}
