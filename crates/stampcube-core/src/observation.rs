use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consts::{MANIFEST_FILE_NAME, STAMP_CONTAINER_EXTENSION};
use crate::error::{Result, StampError};
use crate::frame::{FrameMetadata, ObservationFrame, Wcs};
use crate::io::image_io::{list_frame_files, load_image};

/// Optional `observation.toml` describing the frames of a directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObservationManifest {
    #[serde(default)]
    pub sequence_id: Option<String>,
    #[serde(default)]
    pub frames: Vec<ManifestFrame>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestFrame {
    /// File name relative to the image directory.
    pub file: PathBuf,
    #[serde(default)]
    pub timestamp_us: Option<u64>,
    #[serde(default)]
    pub wcs: Option<Wcs>,
}

impl ObservationManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Time-ordered exposures of one field on a common pixel grid.
///
/// Immutable once built; stages that drop frames produce a new value.
#[derive(Clone, Debug)]
pub struct Observation {
    sequence_id: String,
    image_dir: PathBuf,
    frames: Vec<ObservationFrame>,
}

impl Observation {
    /// Build from already-loaded frames, checking they share one pixel grid.
    pub fn new(
        sequence_id: impl Into<String>,
        image_dir: impl Into<PathBuf>,
        frames: Vec<ObservationFrame>,
    ) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(StampError::EmptyObservation);
        };
        let expected = first.data.dim();
        for (i, frame) in frames.iter().enumerate() {
            if frame.data.dim() != expected {
                return Err(StampError::FrameGridMismatch {
                    index: i,
                    expected,
                    actual: frame.data.dim(),
                });
            }
        }
        Ok(Self {
            sequence_id: sequence_id.into(),
            image_dir: image_dir.into(),
            frames,
        })
    }

    /// Load every frame in `dir`, using `observation.toml` when present.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        let manifest = if manifest_path.is_file() {
            Some(ObservationManifest::load(&manifest_path)?)
        } else {
            None
        };

        let entries: Vec<ManifestFrame> = match &manifest {
            Some(m) if !m.frames.is_empty() => m.frames.clone(),
            _ => list_frame_files(dir)?
                .into_iter()
                .map(|path| ManifestFrame {
                    file: path.file_name().map(PathBuf::from).unwrap_or(path),
                    timestamp_us: None,
                    wcs: None,
                })
                .collect(),
        };

        let raw_id = manifest
            .and_then(|m| m.sequence_id)
            .or_else(|| {
                dir.file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "observation".to_string());

        let frames = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let path = dir.join(&entry.file);
                let data = load_image(&path)?;
                Ok(ObservationFrame::new(
                    data,
                    FrameMetadata {
                        frame_index: i,
                        path,
                        timestamp_us: entry.timestamp_us,
                        wcs: entry.wcs,
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let observation = Self::new(normalize_sequence_id(&raw_id), dir, frames)?;
        let (h, w) = observation.dimensions();
        info!(
            sequence = %observation.sequence_id,
            frames = observation.frame_count(),
            width = w,
            height = h,
            "Loaded observation"
        );
        Ok(observation)
    }

    /// Load frames from explicit paths (e.g. a fetched sequence).
    pub fn from_paths(sequence_id: &str, paths: &[PathBuf]) -> Result<Self> {
        let image_dir = paths
            .first()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .ok_or(StampError::EmptyObservation)?;
        let frames = paths
            .iter()
            .enumerate()
            .map(|(i, path)| {
                Ok(ObservationFrame::new(
                    load_image(path)?,
                    FrameMetadata {
                        frame_index: i,
                        path: path.clone(),
                        ..Default::default()
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(normalize_sequence_id(sequence_id), image_dir, frames)
    }

    pub fn sequence_id(&self) -> &str {
        &self.sequence_id
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn frames(&self) -> &[ObservationFrame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// (height, width) of every frame.
    pub fn dimensions(&self) -> (usize, usize) {
        self.frames[0].data.dim()
    }

    /// Default location of this observation's stamp container.
    pub fn stamp_store_path(&self) -> PathBuf {
        self.image_dir
            .join(format!("{}.{}", self.sequence_id, STAMP_CONTAINER_EXTENSION))
    }

    /// A new observation without the frames at the given positions.
    /// Frames keep their original `frame_index`.
    pub fn without_frames(&self, excluded: &[usize]) -> Result<Self> {
        if excluded.is_empty() {
            return Ok(self.clone());
        }
        let excluded: HashSet<usize> = excluded.iter().copied().collect();
        let frames: Vec<ObservationFrame> = self
            .frames
            .iter()
            .enumerate()
            .filter(|(i, _)| !excluded.contains(i))
            .map(|(_, f)| f.clone())
            .collect();
        if frames.len() < self.frames.len() {
            warn!(
                excluded = self.frames.len() - frames.len(),
                remaining = frames.len(),
                "Excluding frames from observation"
            );
        }
        Self::new(self.sequence_id.clone(), self.image_dir.clone(), frames)
    }

    /// Replace frame pixel data, keeping metadata and order.
    pub fn with_frame_data(&self, data: Vec<ndarray::Array2<f32>>) -> Result<Self> {
        if data.len() != self.frames.len() {
            return Err(StampError::InvalidInput(format!(
                "expected {} frames, got {}",
                self.frames.len(),
                data.len()
            )));
        }
        let frames = self
            .frames
            .iter()
            .zip(data)
            .map(|(f, d)| ObservationFrame::new(d, f.metadata.clone()))
            .collect();
        Self::new(self.sequence_id.clone(), self.image_dir.clone(), frames)
    }
}

/// Normalise `<unit>_<camera>_<time>` so the unit part is its `PANnnn` token.
/// Identifiers of any other shape are returned unchanged.
pub fn normalize_sequence_id(raw: &str) -> String {
    let parts: Vec<&str> = raw.split('_').collect();
    if parts.len() != 3 {
        return raw.to_string();
    }
    let unit = find_unit_token(parts[0]).unwrap_or(parts[0]);
    format!("{}_{}_{}", unit, parts[1], parts[2])
}

fn find_unit_token(s: &str) -> Option<&str> {
    s.match_indices("PAN").find_map(|(i, _)| {
        let token = s.get(i..i + 6)?;
        token[3..]
            .chars()
            .all(|c| c.is_ascii_digit())
            .then_some(token)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sequence_id() {
        assert_eq!(
            normalize_sequence_id("xPAN012y_14d3bd_20180113T052325"),
            "PAN012_14d3bd_20180113T052325"
        );
        assert_eq!(
            normalize_sequence_id("PAN001_ee04d1_20180101T000000"),
            "PAN001_ee04d1_20180101T000000"
        );
        assert_eq!(normalize_sequence_id("field-a"), "field-a");
        assert_eq!(normalize_sequence_id("PANX_a_b"), "PANX_a_b");
    }
}
