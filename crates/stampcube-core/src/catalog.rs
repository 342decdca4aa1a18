use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{ACCEPTABLE_DEFECT_FLAG, DEFAULT_MAX_VMAG};
use crate::error::{Result, StampError};
use crate::frame::ObservationFrame;

/// Catalog identifier of a point source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Picid(pub u64);

impl fmt::Display for Picid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Picid {
    type Err = StampError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Picid)
            .map_err(|_| StampError::InvalidInput(format!("not a PICID: {s:?}")))
    }
}

/// One detected object in the field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointSource {
    pub picid: Picid,
    /// Pixel column in the reference frame.
    pub x: f64,
    /// Pixel row in the reference frame.
    pub y: f64,
    #[serde(default)]
    pub ra: Option<f64>,
    #[serde(default)]
    pub dec: Option<f64>,
    pub vmag: f64,
    pub snr: f64,
    /// Source-extractor flags: 0 is clean.
    #[serde(default)]
    pub flags: i32,
}

impl PointSource {
    /// Pixel position (x, y) of the source in `frame`.
    ///
    /// Re-derived from the frame's WCS when both the WCS and sky coordinates
    /// are known, which follows pointing drift; otherwise the catalog position.
    pub fn position_in(&self, frame: &ObservationFrame) -> (f64, f64) {
        match (&frame.metadata.wcs, self.ra, self.dec) {
            (Some(wcs), Some(ra), Some(dec)) => {
                wcs.world_to_pixel(ra, dec).unwrap_or((self.x, self.y))
            }
            _ => (self.x, self.y),
        }
    }
}

/// Quality gate for reference and candidate sources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityPolicy {
    /// The single nonzero flag value tolerated.
    pub acceptable_flag: i32,
    /// Faintest magnitude accepted (inclusive).
    pub max_vmag: f64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            acceptable_flag: ACCEPTABLE_DEFECT_FLAG,
            max_vmag: DEFAULT_MAX_VMAG,
        }
    }
}

impl QualityPolicy {
    pub fn flag_ok(&self, flags: i32) -> bool {
        flags == 0 || flags == self.acceptable_flag
    }

    pub fn vmag_ok(&self, vmag: f64) -> bool {
        vmag.is_finite() && vmag <= self.max_vmag
    }

    pub fn accepts(&self, flags: i32, vmag: f64) -> bool {
        self.flag_ok(flags) && self.vmag_ok(vmag)
    }
}

/// Ordered source list with an explicit PICID-to-row lookup.
///
/// Rows are positions in this catalog only; filtering builds a new catalog
/// with its own index, so a row number never refers into a different list.
#[derive(Clone, Debug, Default)]
pub struct SourceCatalog {
    sources: Vec<PointSource>,
    rows: HashMap<Picid, usize>,
}

#[derive(Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    sources: Vec<PointSource>,
}

impl SourceCatalog {
    /// Build a catalog, rejecting duplicate PICIDs.
    pub fn new(sources: Vec<PointSource>) -> Result<Self> {
        let mut rows = HashMap::with_capacity(sources.len());
        for (row, source) in sources.iter().enumerate() {
            if rows.insert(source.picid, row).is_some() {
                return Err(StampError::InvalidInput(format!(
                    "duplicate PICID {} in catalog",
                    source.picid
                )));
            }
        }
        Ok(Self { sources, rows })
    }

    /// Load a TOML catalog with a `[[sources]]` array.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let doc: CatalogDocument = toml::from_str(contents)?;
        Self::new(doc.sources)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, picid: Picid) -> Option<&PointSource> {
        self.rows.get(&picid).map(|&row| &self.sources[row])
    }

    pub fn row(&self, index: usize) -> Option<&PointSource> {
        self.sources.get(index)
    }

    pub fn row_of(&self, picid: Picid) -> Option<usize> {
        self.rows.get(&picid).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PointSource> {
        self.sources.iter()
    }

    pub fn as_slice(&self) -> &[PointSource] {
        &self.sources
    }

    /// New catalog holding only the sources matching `keep`, in order.
    pub fn filter(&self, keep: impl Fn(&PointSource) -> bool) -> Self {
        let sources: Vec<PointSource> = self.sources.iter().filter(|s| keep(s)).cloned().collect();
        let rows = sources
            .iter()
            .enumerate()
            .map(|(row, s)| (s.picid, row))
            .collect();
        Self { sources, rows }
    }

    /// Sources detected at or above `snr_limit`.
    pub fn high_snr(&self, snr_limit: f64) -> Self {
        self.filter(|s| s.snr >= snr_limit)
    }
}
