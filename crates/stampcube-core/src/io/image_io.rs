use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma};
use ndarray::Array2;

use crate::error::{Result, StampError};

/// File extensions recognised as exposure frames.
const FRAME_EXTENSIONS: [&str; 3] = ["tif", "tiff", "png"];

/// Load a grayscale image file into an array scaled to [0.0, 1.0].
pub fn load_image(path: &Path) -> Result<Array2<f32>> {
    let img = image::open(path)?;
    let gray = img.to_luma16();
    let (w, h) = gray.dimensions();
    let mut data = Array2::<f32>::zeros((h as usize, w as usize));

    for row in 0..h as usize {
        for col in 0..w as usize {
            let pixel = gray.get_pixel(col as u32, row as u32);
            data[[row, col]] = pixel.0[0] as f32 / 65535.0;
        }
    }

    Ok(data)
}

/// Save an array as 16-bit grayscale TIFF (values clamped to [0.0, 1.0]).
pub fn save_tiff(data: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = data.dim();
    let pixels: Vec<u16> = data
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 65535.0).round() as u16)
        .collect();

    let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| StampError::InvalidInput(format!("cannot encode {w}x{h} frame")))?;
    img.save(path)?;
    Ok(())
}

pub fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

/// All frame files directly inside `dir`, sorted by file name.
pub fn list_frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_frame_file(p))
        .collect();
    files.sort();
    Ok(files)
}
