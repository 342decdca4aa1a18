#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3};
use stampcube_core::catalog::{Picid, PointSource};
use stampcube_core::frame::{FrameMetadata, ObservationFrame};
use stampcube_core::observation::Observation;
use stampcube_core::stamps::Stamp;
use stampcube_core::store::{StampAttrs, StampStore};

/// Catalog source at pixel (x, y) passing the default quality policy.
pub fn source(picid: u64, x: f64, y: f64) -> PointSource {
    PointSource {
        picid: Picid(picid),
        x,
        y,
        ra: None,
        dec: None,
        vmag: 10.0,
        snr: 50.0,
        flags: 0,
    }
}

/// Add a circular Gaussian star centred on pixel (x, y).
pub fn add_star(data: &mut Array2<f32>, x: f64, y: f64, amplitude: f32, sigma: f64) {
    let (h, w) = data.dim();
    for r in 0..h {
        for c in 0..w {
            let dx = c as f64 - x;
            let dy = r as f64 - y;
            let g = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            data[[r, c]] += amplitude * g as f32;
        }
    }
}

/// Frames with a flat sky plus one star per source. `amplitude(frame, i)`
/// gives the peak of source `i` in `frame`.
pub fn star_field(
    dir: &Path,
    frame_count: usize,
    (h, w): (usize, usize),
    sources: &[PointSource],
    sky: f32,
    amplitude: impl Fn(usize, usize) -> f32,
) -> Observation {
    let frames = (0..frame_count)
        .map(|f| {
            let mut data = Array2::<f32>::from_elem((h, w), sky);
            for (i, s) in sources.iter().enumerate() {
                add_star(&mut data, s.x, s.y, amplitude(f, i), 1.5);
            }
            ObservationFrame::new(
                data,
                FrameMetadata {
                    frame_index: f,
                    path: frame_path(dir, f),
                    ..Default::default()
                },
            )
        })
        .collect();
    Observation::new("PAN001_14d3bd_20180113T052325", dir, frames).unwrap()
}

/// Observation from explicit frame arrays.
pub fn observation_from(dir: &Path, data: Vec<Array2<f32>>) -> Observation {
    let frames = data
        .into_iter()
        .enumerate()
        .map(|(f, d)| {
            ObservationFrame::new(
                d,
                FrameMetadata {
                    frame_index: f,
                    path: frame_path(dir, f),
                    ..Default::default()
                },
            )
        })
        .collect();
    Observation::new("PAN001_14d3bd_20180113T052325", dir, frames).unwrap()
}

pub fn frame_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("frame_{index:03}.tif"))
}

/// A stamp whose frame `f` is a Gaussian scaled by `flux[f]`; `None` marks
/// an invalid frame.
pub fn gaussian_stamp(side: usize, sigma: f64, flux: &[Option<f32>]) -> Stamp {
    let c = (side / 2) as f64;
    let mut cube = Array3::<f32>::zeros((side, side, flux.len()));
    for (f, scale) in flux.iter().enumerate() {
        for r in 0..side {
            for col in 0..side {
                let dx = col as f64 - c;
                let dy = r as f64 - c;
                let g = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp() as f32;
                cube[[r, col, f]] = match scale {
                    Some(s) => s * g,
                    None => f32::NAN,
                };
            }
        }
    }
    Stamp::new(cube).unwrap()
}

pub fn attrs(flags: i32, vmag: f64) -> StampAttrs {
    StampAttrs {
        flags,
        vmag,
        snr: 50.0,
    }
}

pub fn store_with(stamps: Vec<(u64, Stamp, StampAttrs)>) -> StampStore {
    let store = StampStore::in_memory();
    for (id, stamp, a) in stamps {
        store.put(Picid(id), stamp, a).unwrap();
    }
    store
}
