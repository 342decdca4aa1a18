//! Upstream services the pipeline depends on but does not implement:
//! plate solving, catalog lookup and frame retrieval. Each is a trait so
//! real services can be plugged in; the default implementations work from
//! files on disk.

use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use tracing::debug;

use crate::catalog::SourceCatalog;
use crate::consts::DEFAULT_CATALOG_FILE_NAME;
use crate::error::{Result, StampError};
use crate::frame::{ObservationFrame, Wcs};
use crate::io::image_io::list_frame_files;
use crate::observation::Observation;

use super::config::PipelineConfig;

/// Per-frame astrometric solution.
pub trait PlateSolver: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` accepts the frame without a WCS; `Err` excludes it.
    fn solve(&self, frame: &ObservationFrame) -> Result<Option<Wcs>>;
}

/// Uses the WCS already attached to each frame (from the manifest).
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderWcs {
    pub require_wcs: bool,
}

impl PlateSolver for HeaderWcs {
    fn name(&self) -> &str {
        "header-wcs"
    }

    fn solve(&self, frame: &ObservationFrame) -> Result<Option<Wcs>> {
        match (&frame.metadata.wcs, self.require_wcs) {
            (Some(wcs), _) => Ok(Some(wcs.clone())),
            (None, false) => Ok(None),
            (None, true) => Err(StampError::External(format!(
                "no WCS for {}",
                frame.metadata.path.display()
            ))),
        }
    }
}

/// Point sources in the field of an observation.
pub trait CatalogLookup: Send + Sync {
    fn lookup(&self, observation: &Observation) -> Result<SourceCatalog>;
}

/// Reads a `[[sources]]` TOML catalog, by default `<image_dir>/catalog.toml`.
#[derive(Clone, Debug, Default)]
pub struct CatalogFile {
    pub path: Option<PathBuf>,
}

impl CatalogLookup for CatalogFile {
    fn lookup(&self, observation: &Observation) -> Result<SourceCatalog> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| observation.image_dir().join(DEFAULT_CATALOG_FILE_NAME));
        debug!(path = %path.display(), "Reading source catalog");
        SourceCatalog::load(&path)
    }
}

/// Local file paths of every frame in a named sequence.
pub trait FrameFetcher: Send + Sync {
    fn fetch(&self, sequence: &str) -> Result<Vec<PathBuf>>;
}

/// Resolves `<root>/<sequence>/` to its sorted image files.
#[derive(Clone, Debug)]
pub struct LocalArchive {
    pub root: PathBuf,
}

impl FrameFetcher for LocalArchive {
    fn fetch(&self, sequence: &str) -> Result<Vec<PathBuf>> {
        let dir = self.root.join(sequence);
        if !dir.is_dir() {
            return Err(StampError::External(format!(
                "sequence {sequence} not found under {}",
                self.root.display()
            )));
        }
        let files = list_frame_files(&dir)?;
        if files.is_empty() {
            return Err(StampError::EmptyObservation);
        }
        Ok(files)
    }
}

/// The collaborator set handed to a pipeline run, with per-call time bounds.
#[derive(Clone)]
pub struct Collaborators {
    pub solver: Arc<dyn PlateSolver>,
    pub catalog: Arc<dyn CatalogLookup>,
    pub fetcher: Option<Arc<dyn FrameFetcher>>,
    pub solve_timeout: Duration,
    pub lookup_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Collaborators {
    /// File-backed defaults configured from `config`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            solver: Arc::new(HeaderWcs {
                require_wcs: config.require_wcs,
            }),
            catalog: Arc::new(CatalogFile {
                path: config.catalog.clone(),
            }),
            fetcher: config.archive_root.as_ref().map(|root| {
                Arc::new(LocalArchive { root: root.clone() }) as Arc<dyn FrameFetcher>
            }),
            solve_timeout: Duration::from_secs(config.solve_timeout_secs),
            lookup_timeout: Duration::from_secs(config.lookup_timeout_secs),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }
}

/// Run `f` on a worker thread and give up after `limit`.
///
/// On timeout the worker is detached; its eventual result is discarded.
pub fn with_timeout<T, F>(operation: &str, limit: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name(format!("stampcube-{operation}"))
        .spawn(move || {
            let _ = tx.send(f());
        })?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(StampError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(StampError::External(format!(
            "{operation} worker exited without a result"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_timeout_returns_result() {
        let value = with_timeout("quick", Duration::from_secs(5), || Ok(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("slow", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        assert!(matches!(result, Err(StampError::Timeout { .. })));
    }

    #[test]
    fn test_with_timeout_propagates_error() {
        let result: Result<()> = with_timeout("failing", Duration::from_secs(5), || {
            Err(StampError::External("boom".into()))
        });
        assert!(matches!(result, Err(StampError::External(_))));
    }

    #[test]
    fn test_header_wcs_requires_wcs() {
        let frame = ObservationFrame::new(ndarray::Array2::zeros((2, 2)), Default::default());
        assert!(HeaderWcs { require_wcs: false }.solve(&frame).unwrap().is_none());
        assert!(HeaderWcs { require_wcs: true }.solve(&frame).is_err());
    }
}
