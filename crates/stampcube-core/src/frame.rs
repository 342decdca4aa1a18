use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single calibrated grayscale exposure.
/// Pixel values are f32; raw frames are scaled to [0.0, 1.0] on load,
/// background-subtracted frames may go negative.
#[derive(Clone, Debug)]
pub struct ObservationFrame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
    pub metadata: FrameMetadata,
}

impl ObservationFrame {
    pub fn new(data: Array2<f32>, metadata: FrameMetadata) -> Self {
        Self { data, metadata }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameMetadata {
    /// Index of the frame in the original exposure sequence.
    pub frame_index: usize,
    pub path: PathBuf,
    pub timestamp_us: Option<u64>,
    pub wcs: Option<Wcs>,
}

/// Linear (tangent-plane) world coordinate solution for one frame.
///
/// Sky offsets from `crval` are projected with `cos(dec)` scaling and mapped
/// through the inverse of the `cd` matrix (degrees per pixel). Adequate for
/// the few-arcminute drift between exposures of one field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wcs {
    /// Reference pixel (x, y), zero-based.
    pub crpix: [f64; 2],
    /// Sky coordinate (ra, dec) in degrees at the reference pixel.
    pub crval: [f64; 2],
    /// Pixel-to-sky linear transform in degrees per pixel.
    pub cd: [[f64; 2]; 2],
}

impl Wcs {
    /// Convert a sky position (degrees) into a pixel position (x, y).
    ///
    /// Returns `None` when the CD matrix is singular.
    pub fn world_to_pixel(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let [[a, b], [c, d]] = self.cd;
        let det = a * d - b * c;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let mut dra = ra - self.crval[0];
        if dra > 180.0 {
            dra -= 360.0;
        } else if dra < -180.0 {
            dra += 360.0;
        }
        let xi = dra * self.crval[1].to_radians().cos();
        let eta = dec - self.crval[1];
        let dx = (d * xi - b * eta) / det;
        let dy = (-c * xi + a * eta) / det;
        Some((self.crpix[0] + dx, self.crpix[1] + dy))
    }

    /// Convert a pixel position into a sky position (degrees).
    pub fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let [[a, b], [c, d]] = self.cd;
        let dx = x - self.crpix[0];
        let dy = y - self.crpix[1];
        let xi = a * dx + b * dy;
        let eta = c * dx + d * dy;
        let ra = self.crval[0] + xi / self.crval[1].to_radians().cos();
        (ra.rem_euclid(360.0), self.crval[1] + eta)
    }
}
