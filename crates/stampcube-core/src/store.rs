//! Keyed, persistent storage of stamp cubes and their derived results.
//!
//! Entries live behind `Arc`s inside a `parking_lot::RwLock`. Writers build a
//! complete replacement entry and swap it in under the write lock, so readers
//! holding a snapshot see either the old entry or the new one, never a mix.
//! `flush` persists the whole map through a temp file and rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::catalog::{Picid, PointSource};
use crate::error::{Result, StampError};
use crate::io::container::{read_container, write_container};
use crate::similarity::SimilarityResult;
use crate::stamps::Stamp;
use crate::variance::VarianceResult;

/// Scalar attributes fixed when an entry is created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StampAttrs {
    pub flags: i32,
    pub vmag: f64,
    pub snr: f64,
}

impl From<&PointSource> for StampAttrs {
    fn from(source: &PointSource) -> Self {
        Self {
            flags: source.flags,
            vmag: source.vmag,
            snr: source.snr,
        }
    }
}

/// One source's stamp plus derived result slots.
#[derive(Clone, Debug)]
pub struct StampEntry {
    pub stamp: Arc<Stamp>,
    pub attrs: StampAttrs,
    pub similarity: Option<Arc<SimilarityResult>>,
    /// Variance results keyed by `variance::params_key`.
    pub variance: BTreeMap<String, Arc<VarianceResult>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultKind {
    Similarity,
    Variance,
}

/// A derived result to commit into an entry's slot.
#[derive(Clone, Debug)]
pub enum ResultValue {
    Similarity(SimilarityResult),
    Variance(VarianceResult),
}

#[derive(Default)]
struct StoreInner {
    shape: Option<(usize, usize, usize)>,
    entries: BTreeMap<Picid, Arc<StampEntry>>,
}

pub struct StampStore {
    path: Option<PathBuf>,
    inner: RwLock<StoreInner>,
}

impl StampStore {
    /// A store that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// An empty store that `flush` writes to `path`, replacing any file there.
    pub fn create(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Load an existing container. A missing file is an error.
    pub fn open(path: &Path) -> Result<Self> {
        let contents = read_container(path)?;
        info!(
            path = %path.display(),
            entries = contents.entries.len(),
            "Opened stamp store"
        );
        let entries = contents
            .entries
            .into_iter()
            .map(|(picid, entry)| (picid, Arc::new(entry)))
            .collect();
        Ok(Self {
            path: Some(path.to_path_buf()),
            inner: RwLock::new(StoreInner {
                shape: contents.shape,
                entries,
            }),
        })
    }

    /// Open `path` if it exists, otherwise start an empty store bound to it.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::open(path)
        } else {
            debug!(path = %path.display(), "Creating new stamp store");
            Ok(Self::create(path))
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Shape (rows, cols, frames) shared by every stamp, once the first is written.
    pub fn stamp_shape(&self) -> Option<(usize, usize, usize)> {
        self.inner.read().shape
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn contains(&self, picid: Picid) -> bool {
        self.inner.read().entries.contains_key(&picid)
    }

    /// All source identifiers, ascending.
    pub fn keys(&self) -> Vec<Picid> {
        self.inner.read().entries.keys().copied().collect()
    }

    /// Insert a new entry. Fails if `picid` already has one.
    pub fn put(&self, picid: Picid, stamp: Stamp, attrs: StampAttrs) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&picid) {
            return Err(StampError::EntryExists(picid));
        }
        check_shape(&mut inner, &stamp)?;
        inner.entries.insert(picid, Arc::new(new_entry(stamp, attrs)));
        Ok(())
    }

    /// Overwrite an entry in place (forced recompute). The stamp shape must
    /// match the store's.
    ///
    /// Every stored similarity and variance result is discarded, not only the
    /// replaced entry's: any of them may have used the old stamp as a
    /// candidate or reference.
    pub fn replace(&self, picid: Picid, stamp: Stamp, attrs: StampAttrs) -> Result<()> {
        let mut inner = self.inner.write();
        check_shape(&mut inner, &stamp)?;
        inner.entries.insert(picid, Arc::new(new_entry(stamp, attrs)));

        let mut cleared = 0usize;
        for entry in inner.entries.values_mut() {
            if entry.similarity.is_some() || !entry.variance.is_empty() {
                *entry = Arc::new(StampEntry {
                    similarity: None,
                    variance: BTreeMap::new(),
                    ..StampEntry::clone(entry)
                });
                cleared += 1;
            }
        }
        if cleared > 0 {
            debug!(%picid, cleared, "Stamp replaced; dropped dependent results");
        }
        Ok(())
    }

    /// Snapshot of a whole entry.
    pub fn entry(&self, picid: Picid) -> Option<Arc<StampEntry>> {
        self.inner.read().entries.get(&picid).cloned()
    }

    pub fn get(&self, picid: Picid) -> Result<Arc<Stamp>> {
        self.entry(picid)
            .map(|e| e.stamp.clone())
            .ok_or(StampError::SourceNotFound(picid))
    }

    pub fn attrs(&self, picid: Picid) -> Result<StampAttrs> {
        self.entry(picid)
            .map(|e| e.attrs)
            .ok_or(StampError::SourceNotFound(picid))
    }

    pub fn has_result(&self, picid: Picid, kind: ResultKind) -> bool {
        match (self.entry(picid), kind) {
            (Some(e), ResultKind::Similarity) => e.similarity.is_some(),
            (Some(e), ResultKind::Variance) => !e.variance.is_empty(),
            (None, _) => false,
        }
    }

    pub fn has_variance(&self, picid: Picid, params_key: &str) -> bool {
        self.entry(picid)
            .map(|e| e.variance.contains_key(params_key))
            .unwrap_or(false)
    }

    pub fn similarity(&self, picid: Picid) -> Option<Arc<SimilarityResult>> {
        self.entry(picid).and_then(|e| e.similarity.clone())
    }

    pub fn variance(&self, picid: Picid, params_key: &str) -> Option<Arc<VarianceResult>> {
        self.entry(picid)
            .and_then(|e| e.variance.get(params_key).cloned())
    }

    /// Atomically replace a result slot of an existing entry.
    pub fn set_result(&self, picid: Picid, value: ResultValue) -> Result<()> {
        let mut inner = self.inner.write();
        let current = inner
            .entries
            .get(&picid)
            .ok_or(StampError::SourceNotFound(picid))?;

        let mut updated = StampEntry::clone(current);
        match value {
            ResultValue::Similarity(result) => updated.similarity = Some(Arc::new(result)),
            ResultValue::Variance(result) => {
                updated
                    .variance
                    .insert(result.params_key.clone(), Arc::new(result));
            }
        }
        inner.entries.insert(picid, Arc::new(updated));
        Ok(())
    }

    /// Persist every entry. A store without a path is left untouched.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let (shape, entries) = {
            let inner = self.inner.read();
            let entries: Vec<(Picid, Arc<StampEntry>)> = inner
                .entries
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect();
            (inner.shape, entries)
        };
        write_container(path, shape, &entries)?;
        debug!(path = %path.display(), entries = entries.len(), "Flushed stamp store");
        Ok(())
    }
}

fn new_entry(stamp: Stamp, attrs: StampAttrs) -> StampEntry {
    StampEntry {
        stamp: Arc::new(stamp),
        attrs,
        similarity: None,
        variance: BTreeMap::new(),
    }
}

fn check_shape(inner: &mut StoreInner, stamp: &Stamp) -> Result<()> {
    let actual = stamp.shape();
    match inner.shape {
        Some(expected) if expected != actual => Err(StampError::ShapeMismatch { expected, actual }),
        Some(_) => Ok(()),
        None => {
            inner.shape = Some(actual);
            Ok(())
        }
    }
}
