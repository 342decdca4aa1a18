use ndarray::Array2;

use crate::consts::MIN_TILE_COVERAGE;
use crate::error::{Result, StampError};
use crate::stats::{median, sigma_clipped_stats};

use super::BackgroundConfig;

/// Smooth sky surface for one frame plus its global statistics.
#[derive(Clone, Debug)]
pub struct BackgroundModel {
    /// Background estimate at every pixel, same shape as the frame.
    pub surface: Array2<f32>,
    /// Sigma-clipped median of the whole frame.
    pub level: f32,
    /// Sigma-clipped standard deviation of the whole frame.
    pub noise: f32,
}

/// Estimate a spatially varying background by sigma-clipped tile medians
/// bilinearly interpolated between tile centres.
///
/// Tiles with too few finite pixels borrow the median of the good tiles. The
/// frame fails only when no tile is usable.
pub fn estimate_background(data: &Array2<f32>, config: &BackgroundConfig) -> Result<BackgroundModel> {
    let (h, w) = data.dim();
    let bs = config.block_size.max(1);
    if h == 0 || w == 0 {
        return Err(StampError::InvalidInput("empty frame".into()));
    }

    let nx = w.div_ceil(bs);
    let ny = h.div_ceil(bs);

    let mut tiles: Vec<Option<f32>> = Vec::with_capacity(nx * ny);
    for by in 0..ny {
        for bx in 0..nx {
            let y0 = by * bs;
            let x0 = bx * bs;
            let y1 = (y0 + bs).min(h);
            let x1 = (x0 + bs).min(w);
            let area = (y1 - y0) * (x1 - x0);

            let mut vals: Vec<f32> = Vec::with_capacity(area);
            for y in y0..y1 {
                for x in x0..x1 {
                    let v = data[[y, x]];
                    if v.is_finite() {
                        vals.push(v);
                    }
                }
            }

            if (vals.len() as f32) < area as f32 * MIN_TILE_COVERAGE {
                tiles.push(None);
                continue;
            }
            let stats = sigma_clipped_stats(&mut vals, config.clip_sigma, config.clip_iterations);
            tiles.push(stats.map(|s| s.median));
        }
    }

    let mut good: Vec<f32> = tiles.iter().flatten().copied().collect();
    let fill = median(&mut good).ok_or_else(|| {
        StampError::InvalidInput("no background tile has enough finite pixels".into())
    })?;
    let tile_medians: Vec<f32> = tiles.into_iter().map(|t| t.unwrap_or(fill)).collect();

    let mut surface = Array2::<f32>::zeros((h, w));
    let half = bs as f32 / 2.0;
    for y in 0..h {
        for x in 0..w {
            let bx_f = (x as f32 + 0.5 - half) / bs as f32;
            let by_f = (y as f32 + 0.5 - half) / bs as f32;

            let bx0 = (bx_f.floor().max(0.0) as usize).min(nx - 1);
            let by0 = (by_f.floor().max(0.0) as usize).min(ny - 1);
            let bx1 = (bx0 + 1).min(nx - 1);
            let by1 = (by0 + 1).min(ny - 1);

            let fx = (bx_f - bx0 as f32).clamp(0.0, 1.0);
            let fy = (by_f - by0 as f32).clamp(0.0, 1.0);

            let m00 = tile_medians[by0 * nx + bx0];
            let m10 = tile_medians[by0 * nx + bx1];
            let m01 = tile_medians[by1 * nx + bx0];
            let m11 = tile_medians[by1 * nx + bx1];

            surface[[y, x]] = m00 * (1.0 - fx) * (1.0 - fy)
                + m10 * fx * (1.0 - fy)
                + m01 * (1.0 - fx) * fy
                + m11 * fx * fy;
        }
    }

    let mut all: Vec<f32> = data.iter().copied().collect();
    let global = sigma_clipped_stats(&mut all, config.clip_sigma, config.clip_iterations)
        .ok_or_else(|| StampError::InvalidInput("frame has no finite pixels".into()))?;

    Ok(BackgroundModel {
        surface,
        level: global.median,
        noise: global.std_dev,
    })
}
