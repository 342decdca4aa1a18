//! Raw little-endian `f32` frame files used for background-subtracted data.
//!
//! Subtracted frames can hold negative values, so they bypass the 16-bit image
//! formats. Layout: 8-byte magic, u32 width, u32 height, then `width * height`
//! f32 values in row-major order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;

use crate::error::{Result, StampError};

pub const FRAME_FILE_MAGIC: &[u8; 8] = b"SCFRAME1";
const FRAME_FILE_HEADER_SIZE: usize = 16;

/// Write `data` to `path` atomically: the bytes go to a sibling temp file
/// which is renamed over `path` only after a successful flush.
pub fn write_frame_file(path: &Path, data: &Array2<f32>) -> Result<()> {
    let (h, w) = data.dim();
    let tmp = path.with_extension("sub.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(FRAME_FILE_MAGIC)?;
        writer.write_u32::<LittleEndian>(w as u32)?;
        writer.write_u32::<LittleEndian>(h as u32)?;
        for &v in data.iter() {
            writer.write_f32::<LittleEndian>(v)?;
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_frame_file(path: &Path) -> Result<Array2<f32>> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < FRAME_FILE_HEADER_SIZE || &mmap[0..8] != FRAME_FILE_MAGIC {
        return Err(StampError::InvalidFrameFile(format!(
            "{}: missing frame header",
            path.display()
        )));
    }

    let mut cursor = std::io::Cursor::new(&mmap[8..]);
    let w = cursor.read_u32::<LittleEndian>()? as usize;
    let h = cursor.read_u32::<LittleEndian>()? as usize;

    let expected = FRAME_FILE_HEADER_SIZE + w * h * std::mem::size_of::<f32>();
    if mmap.len() != expected {
        return Err(StampError::InvalidFrameFile(format!(
            "{}: expected {} bytes, got {}",
            path.display(),
            expected,
            mmap.len()
        )));
    }

    let mut values = vec![0.0f32; w * h];
    cursor.read_f32_into::<LittleEndian>(&mut values)?;
    Array2::from_shape_vec((h, w), values)
        .map_err(|e| StampError::InvalidFrameFile(e.to_string()))
}
