/// Sentinel written into stamp pixels whose frame window fell outside the image.
pub const INVALID_PIXEL: f32 = f32::NAN;

/// Default stamp side length in pixels (odd, so a centre pixel exists).
pub const DEFAULT_STAMP_SIDE: usize = 15;

/// Default detection SNR below which sources receive no stamp.
pub const DEFAULT_SNR_LIMIT: f64 = 10.0;

/// Source-extractor flag value that is tolerated as an acceptable defect
/// (object has neighbours bright enough to bias photometry).
pub const ACCEPTABLE_DEFECT_FLAG: i32 = 2;

/// Catalog V magnitude above which sources are too faint to be references.
pub const DEFAULT_MAX_VMAG: f64 = 13.0;

/// Default number of similar sources kept per target.
pub const DEFAULT_TOP_K: usize = 200;

/// Minimum number of valid frames before a variance is reported.
pub const DEFAULT_MIN_VALID_FRAMES: usize = 2;

/// Minimum number of frames valid in both target and candidate for a score.
pub const DEFAULT_MIN_COMMON_FRAMES: usize = 2;

/// Tile side length (pixels) for the block-median background model.
pub const DEFAULT_BACKGROUND_BLOCK_SIZE: usize = 64;

/// Sigma-clipping rejection threshold for background tiles.
pub const DEFAULT_BACKGROUND_CLIP_SIGMA: f32 = 3.0;

/// Sigma-clipping iterations for background tiles.
pub const DEFAULT_BACKGROUND_CLIP_ITERATIONS: usize = 3;

/// Fraction of a tile that must hold finite pixels for the tile to count.
pub const MIN_TILE_COVERAGE: f32 = 0.25;

/// Name of the directory (inside the image directory) holding subtracted frames.
pub const SUBTRACTED_DIR_NAME: &str = "background_subtracted";

/// Name of the optional per-observation manifest.
pub const MANIFEST_FILE_NAME: &str = "observation.toml";

/// File extension of the per-observation stamp container.
pub const STAMP_CONTAINER_EXTENSION: &str = "stamps";

/// Default time bound (seconds) for a single plate-solve call.
pub const DEFAULT_SOLVE_TIMEOUT_SECS: u64 = 90;

/// Default time bound (seconds) for fetching a whole sequence.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 600;

/// Minimum source count to use source-level Rayon parallelism.
pub const PARALLEL_SOURCE_THRESHOLD: usize = 8;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-12;

/// Default time bound (seconds) for one catalog lookup.
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 300;

/// Catalog file looked up in the image directory when none is configured.
pub const DEFAULT_CATALOG_FILE_NAME: &str = "catalog.toml";
