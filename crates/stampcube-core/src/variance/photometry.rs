use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::stamps::Stamp;

/// How a stamp window is reduced to one brightness value per frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Photometry {
    /// Sum of every pixel in the window.
    #[default]
    Sum,
    /// Sum of pixels whose centre lies within `radius` of the window centre.
    Aperture { radius: f64 },
}

impl Photometry {
    pub fn key(&self) -> String {
        match self {
            Self::Sum => "sum".to_string(),
            Self::Aperture { radius } => format!("aperture:{radius:.2}"),
        }
    }
}

impl std::fmt::Display for Photometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sum => write!(f, "Window Sum"),
            Self::Aperture { radius } => write!(f, "Aperture (r={radius} px)"),
        }
    }
}

/// Brightness of one window.
pub fn window_flux(window: &ArrayView2<'_, f32>, photometry: &Photometry) -> f64 {
    match photometry {
        Photometry::Sum => window.iter().map(|&v| v as f64).sum(),
        Photometry::Aperture { radius } => {
            let (h, w) = window.dim();
            let cy = (h / 2) as f64;
            let cx = (w / 2) as f64;
            let r2 = radius * radius;
            let mut sum = 0.0;
            for ((row, col), &v) in window.indexed_iter() {
                let dy = row as f64 - cy;
                let dx = col as f64 - cx;
                if dx * dx + dy * dy <= r2 {
                    sum += v as f64;
                }
            }
            sum
        }
    }
}

/// Per-frame brightness of a stamp; `None` for frames marked invalid.
pub fn brightness_series(stamp: &Stamp, photometry: &Photometry) -> Vec<Option<f64>> {
    (0..stamp.frame_count())
        .map(|i| {
            stamp
                .is_frame_valid(i)
                .then(|| window_flux(&stamp.frame(i), photometry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_aperture_excludes_corners() {
        let window = Array2::<f32>::ones((5, 5));
        let sum = window_flux(&window.view(), &Photometry::Sum);
        let ap = window_flux(&window.view(), &Photometry::Aperture { radius: 1.0 });
        assert_eq!(sum, 25.0);
        // Centre plus four direct neighbours.
        assert_eq!(ap, 5.0);
    }
}
