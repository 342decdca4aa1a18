use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_STAMP_SIDE;
use crate::error::{Result, StampError};

/// Spatial size of a stamp window. Both sides are positive and odd.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampSize {
    pub rows: usize,
    pub cols: usize,
}

impl Default for StampSize {
    fn default() -> Self {
        Self {
            rows: DEFAULT_STAMP_SIDE,
            cols: DEFAULT_STAMP_SIDE,
        }
    }
}

impl StampSize {
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        let size = Self { rows, cols };
        size.validate()?;
        Ok(size)
    }

    pub fn square(side: usize) -> Result<Self> {
        Self::new(side, side)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 || self.rows % 2 == 0 || self.cols % 2 == 0 {
            return Err(StampError::InvalidStampSize {
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    /// Pixels from the centre to the window edge, vertically.
    pub fn half_rows(&self) -> usize {
        self.rows / 2
    }

    /// Pixels from the centre to the window edge, horizontally.
    pub fn half_cols(&self) -> usize {
        self.cols / 2
    }
}

/// Pixel windows of one source across every frame, shape = (rows, cols, frames).
///
/// A frame whose window left the image holds `INVALID_PIXEL` in every pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct Stamp {
    data: Array3<f32>,
}

impl Stamp {
    pub fn new(data: Array3<f32>) -> Result<Self> {
        let (rows, cols, _) = data.dim();
        StampSize::new(rows, cols)?;
        Ok(Self { data })
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn size(&self) -> StampSize {
        let (rows, cols, _) = self.data.dim();
        StampSize { rows, cols }
    }

    pub fn frame_count(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// The (rows, cols) window cut from frame `index`.
    pub fn frame(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(2), index)
    }

    pub fn is_frame_valid(&self, index: usize) -> bool {
        self.frame(index).iter().all(|v| v.is_finite())
    }

    pub fn valid_frames(&self) -> Vec<usize> {
        (0..self.frame_count())
            .filter(|&i| self.is_frame_valid(i))
            .collect()
    }

    pub fn valid_frame_count(&self) -> usize {
        (0..self.frame_count())
            .filter(|&i| self.is_frame_valid(i))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::INVALID_PIXEL;

    #[test]
    fn test_even_size_rejected() {
        assert!(StampSize::new(4, 5).is_err());
        assert!(StampSize::new(0, 3).is_err());
        assert!(StampSize::square(7).is_ok());
    }

    #[test]
    fn test_invalid_frame_detection() {
        let mut data = Array3::<f32>::ones((3, 3, 4));
        data.index_axis_mut(Axis(2), 1).fill(INVALID_PIXEL);
        let stamp = Stamp::new(data).unwrap();
        assert_eq!(stamp.valid_frames(), vec![0, 2, 3]);
        assert!(!stamp.is_frame_valid(1));
    }
}
