pub mod estimate;
pub mod subtract;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_BACKGROUND_BLOCK_SIZE, DEFAULT_BACKGROUND_CLIP_ITERATIONS,
    DEFAULT_BACKGROUND_CLIP_SIGMA,
};

pub use estimate::{estimate_background, BackgroundModel};
pub use subtract::{subtract_background, BackgroundOutcome, BackgroundReport};

/// Parameters of the per-frame sky model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Tile side length in pixels.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Rejection threshold in standard deviations.
    #[serde(default = "default_clip_sigma")]
    pub clip_sigma: f32,
    #[serde(default = "default_clip_iterations")]
    pub clip_iterations: usize,
}

fn default_block_size() -> usize {
    DEFAULT_BACKGROUND_BLOCK_SIZE
}
fn default_clip_sigma() -> f32 {
    DEFAULT_BACKGROUND_CLIP_SIGMA
}
fn default_clip_iterations() -> usize {
    DEFAULT_BACKGROUND_CLIP_ITERATIONS
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BACKGROUND_BLOCK_SIZE,
            clip_sigma: DEFAULT_BACKGROUND_CLIP_SIGMA,
            clip_iterations: DEFAULT_BACKGROUND_CLIP_ITERATIONS,
        }
    }
}
