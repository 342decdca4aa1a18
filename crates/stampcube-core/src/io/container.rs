//! Binary container holding every stamp of one observation.
//!
//! All integers and floats are little-endian.
//!
//! ```text
//! header   magic "STMPCUBE" | u32 version | u32 rows | u32 cols | u32 frames | u32 entries
//! entry    str key | i32 flags | f64 vmag | f64 snr | f32 cube[rows*cols*frames] (r, c, f order)
//!          u8 has_similarity
//!            [str metric | u32 n | str similar_stars[n] | f64 similar_star_scores[n]]
//!          u32 variance_count
//!            (str params | f64 variance | u32 references | u32 n | u32 frames[n] | f64 ratio[n])*
//! str      u16 byte length | utf-8 bytes
//! ```
//!
//! A header with `rows == 0` describes an empty store whose stamp shape is not
//! yet fixed.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array3;

use crate::catalog::Picid;
use crate::error::{Result, StampError};
use crate::similarity::{SimilarMatch, SimilarityResult};
use crate::stamps::Stamp;
use crate::store::{StampAttrs, StampEntry};
use crate::variance::VarianceResult;

pub const CONTAINER_MAGIC: &[u8; 8] = b"STMPCUBE";
pub const CONTAINER_VERSION: u32 = 1;

/// Decoded container: the fixed stamp shape (if any entry was ever written)
/// and the entries in key order.
pub struct ContainerContents {
    pub shape: Option<(usize, usize, usize)>,
    pub entries: Vec<(Picid, StampEntry)>,
}

/// Write a container to `path` via a sibling temp file and a rename, so a
/// reader never observes a half-written container.
pub fn write_container(
    path: &Path,
    shape: Option<(usize, usize, usize)>,
    entries: &[(Picid, Arc<StampEntry>)],
) -> Result<()> {
    let tmp = path.with_extension("stamps.tmp");
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        let (rows, cols, frames) = shape.unwrap_or((0, 0, 0));
        w.write_all(CONTAINER_MAGIC)?;
        w.write_u32::<LittleEndian>(CONTAINER_VERSION)?;
        w.write_u32::<LittleEndian>(rows as u32)?;
        w.write_u32::<LittleEndian>(cols as u32)?;
        w.write_u32::<LittleEndian>(frames as u32)?;
        w.write_u32::<LittleEndian>(entries.len() as u32)?;

        for (picid, entry) in entries {
            write_entry(&mut w, *picid, entry)?;
        }
        w.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn write_entry(w: &mut impl Write, picid: Picid, entry: &StampEntry) -> Result<()> {
    write_str(w, &picid.to_string())?;
    w.write_i32::<LittleEndian>(entry.attrs.flags)?;
    w.write_f64::<LittleEndian>(entry.attrs.vmag)?;
    w.write_f64::<LittleEndian>(entry.attrs.snr)?;
    for &v in entry.stamp.data().iter() {
        w.write_f32::<LittleEndian>(v)?;
    }

    match &entry.similarity {
        Some(result) => {
            w.write_u8(1)?;
            write_str(w, &result.metric)?;
            w.write_u32::<LittleEndian>(result.matches.len() as u32)?;
            for m in &result.matches {
                write_str(w, &m.picid.to_string())?;
            }
            for m in &result.matches {
                w.write_f64::<LittleEndian>(m.score)?;
            }
        }
        None => w.write_u8(0)?,
    }

    w.write_u32::<LittleEndian>(entry.variance.len() as u32)?;
    for (key, result) in &entry.variance {
        write_str(w, key)?;
        w.write_f64::<LittleEndian>(result.variance)?;
        w.write_u32::<LittleEndian>(result.reference_count as u32)?;
        w.write_u32::<LittleEndian>(result.frame_indices.len() as u32)?;
        for &i in &result.frame_indices {
            w.write_u32::<LittleEndian>(i as u32)?;
        }
        for &r in &result.ratio {
            w.write_f64::<LittleEndian>(r)?;
        }
    }
    Ok(())
}

fn write_str(w: &mut impl Write, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| StampError::InvalidInput(format!("string too long for container: {s}")))?;
    w.write_u16::<LittleEndian>(len)?;
    w.write_all(bytes)?;
    Ok(())
}

/// Read and fully decode a container file.
pub fn read_container(path: &Path) -> Result<ContainerContents> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < 8 || &mmap[0..8] != CONTAINER_MAGIC {
        return Err(StampError::InvalidContainer(format!(
            "{}: missing STMPCUBE magic",
            path.display()
        )));
    }

    parse_body(&mmap[8..])
        .map_err(|e| StampError::InvalidContainer(format!("{}: {e}", path.display())))
}

fn parse_body(buf: &[u8]) -> std::result::Result<ContainerContents, String> {
    let mut cursor = Cursor::new(buf);
    let io = |e: std::io::Error| e.to_string();

    let version = cursor.read_u32::<LittleEndian>().map_err(io)?;
    if version != CONTAINER_VERSION {
        return Err(format!("unsupported version {version}"));
    }
    let rows = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;
    let cols = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;
    let frames = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;
    let count = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;

    let shape = if rows == 0 {
        if count > 0 {
            return Err("entries present but stamp shape unset".into());
        }
        None
    } else {
        Some((rows, cols, frames))
    };

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let (rows, cols, frames) = shape.unwrap_or((0, 0, 0));
        entries.push(read_entry(&mut cursor, rows, cols, frames)?);
    }

    if (cursor.position() as usize) != buf.len() {
        return Err("trailing bytes after last entry".into());
    }

    Ok(ContainerContents { shape, entries })
}

fn read_entry(
    cursor: &mut Cursor<&[u8]>,
    rows: usize,
    cols: usize,
    frames: usize,
) -> std::result::Result<(Picid, StampEntry), String> {
    let io = |e: std::io::Error| e.to_string();

    let picid = read_picid(cursor)?;
    let flags = cursor.read_i32::<LittleEndian>().map_err(io)?;
    let vmag = cursor.read_f64::<LittleEndian>().map_err(io)?;
    let snr = cursor.read_f64::<LittleEndian>().map_err(io)?;

    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    let len = rows * cols * frames;
    if len.saturating_mul(4) > remaining {
        return Err(format!("cube for {picid} runs past end of file"));
    }
    let mut values = vec![0.0f32; len];
    cursor
        .read_f32_into::<LittleEndian>(&mut values)
        .map_err(io)?;
    let cube = Array3::from_shape_vec((rows, cols, frames), values).map_err(|e| e.to_string())?;
    let stamp = Stamp::new(cube).map_err(|e| e.to_string())?;

    let similarity = match cursor.read_u8().map_err(io)? {
        0 => None,
        1 => {
            let metric = read_str(cursor)?;
            let n = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;
            let ids = (0..n)
                .map(|_| read_picid(cursor))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut scores = vec![0.0f64; n];
            cursor
                .read_f64_into::<LittleEndian>(&mut scores)
                .map_err(io)?;
            let matches = ids
                .into_iter()
                .zip(scores)
                .map(|(picid, score)| SimilarMatch { picid, score })
                .collect();
            Some(Arc::new(SimilarityResult {
                target: picid,
                metric,
                matches,
            }))
        }
        other => return Err(format!("bad similarity marker {other} for {picid}")),
    };

    let variance_count = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;
    let mut variance = BTreeMap::new();
    for _ in 0..variance_count {
        let key = read_str(cursor)?;
        let value = cursor.read_f64::<LittleEndian>().map_err(io)?;
        let reference_count = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;
        let n = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;
        let mut idx = vec![0u32; n];
        cursor.read_u32_into::<LittleEndian>(&mut idx).map_err(io)?;
        let mut ratio = vec![0.0f64; n];
        cursor.read_f64_into::<LittleEndian>(&mut ratio).map_err(io)?;
        variance.insert(
            key.clone(),
            Arc::new(VarianceResult {
                target: picid,
                params_key: key,
                reference_count,
                frame_indices: idx.into_iter().map(|i| i as usize).collect(),
                ratio,
                variance: value,
            }),
        );
    }

    let entry = StampEntry {
        stamp: Arc::new(stamp),
        attrs: StampAttrs { flags, vmag, snr },
        similarity,
        variance,
    };
    Ok((picid, entry))
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> std::result::Result<String, String> {
    let len = cursor
        .read_u16::<LittleEndian>()
        .map_err(|e| e.to_string())? as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

fn read_picid(cursor: &mut Cursor<&[u8]>) -> std::result::Result<Picid, String> {
    let key = read_str(cursor)?;
    key.parse::<Picid>().map_err(|e| e.to_string())
}
