//! Binary persistence.
//!
//! All fields are little-endian `u32`/`i32`/`f32`:
//!
//! ```text
//! major minor                       version (1.0)
//! num_scales
//! n  matrix                         scale 0
//! n  matrix  u32vec u32vec f32vec i32vec  matrix      every later scale
//! ```
//!
//! The vectors of a later scale are, in order, `landmark_to_original_data_idx`,
//! `landmark_to_previous_scale_idx`, `landmark_weight` and
//! `previous_scale_to_landmark_idx`; the trailing matrix is the area of
//! influence. A matrix is `rows, then per row: nnz, (key, value)*`; a vector
//! is `len, values`. Scale 0 stores only its transition matrix; its identity
//! mappings and unit weights are rebuilt on load.
//!
//! Parameters are not stored; [`load`] takes the ones the loaded hierarchy
//! should carry.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::hierarchy::{Hierarchy, HsneParams, Scale};
use crate::sparse::AffinityRow;

/// Version written by [`save`]; the only one [`load`] accepts.
pub const FORMAT_VERSION: (u32, u32) = (1, 0);

/// Upper bound on up-front allocation driven by counts read from a stream.
const MAX_PREALLOC: usize = 1 << 20;

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_i32<W: Write>(w: &mut W, v: i32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f32<W: Write>(w: &mut W, v: f32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_len<W: Write>(w: &mut W, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| Error::Format(format!("length {len} exceeds u32")))?;
    write_u32(w, len)
}

fn write_matrix<R: AffinityRow, W: Write>(w: &mut W, rows: &[R]) -> Result<()> {
    write_len(w, rows.len())?;
    for row in rows {
        let entries = row.entries();
        write_len(w, entries.len())?;
        for &(k, v) in entries.iter() {
            write_u32(w, k)?;
            write_f32(w, v)?;
        }
    }
    Ok(())
}

fn read_err(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        Error::Format("unexpected end of stream".into())
    } else {
        Error::Io(e)
    }
}

fn read_u32<Rd: Read>(r: &mut Rd) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(read_err)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32<Rd: Read>(r: &mut Rd) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(read_err)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_f32<Rd: Read>(r: &mut Rd) -> Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(read_err)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_vec<Rd: Read, T>(r: &mut Rd, mut item: impl FnMut(&mut Rd) -> Result<T>) -> Result<Vec<T>> {
    let len = read_u32(r)? as usize;
    let mut out = Vec::with_capacity(len.min(MAX_PREALLOC));
    for _ in 0..len {
        out.push(item(r)?);
    }
    Ok(out)
}

/// Read a matrix whose keys must be below `width`.
fn read_matrix<R: AffinityRow, Rd: Read>(r: &mut Rd, width: usize) -> Result<Vec<R>> {
    read_vec(r, |r| {
        let pairs = read_vec(r, |r| Ok((read_u32(r)?, read_f32(r)?)))?;
        if let Some(&(k, _)) = pairs.iter().find(|&&(k, _)| k as usize >= width) {
            return Err(Error::Format(format!("key {k} out of range (width {width})")));
        }
        let mut row = R::default();
        row.bulk_initialize(pairs, f32::NEG_INFINITY)
            .map_err(|_| Error::Format("row keys are not strictly increasing".into()))?;
        Ok(row)
    })
}

fn expect_len(what: &str, scale: usize, found: usize, expected: usize) -> Result<()> {
    if found != expected {
        return Err(Error::Format(format!(
            "scale {scale}: {what} has {found} entries, expected {expected}"
        )));
    }
    Ok(())
}

/// Write `hierarchy` to `w`.
pub fn save<R: AffinityRow, W: Write>(hierarchy: &Hierarchy<R>, w: &mut W) -> Result<()> {
    let scales = hierarchy.scales();
    let Some(first) = scales.first() else {
        return Err(Error::precondition("cannot save an empty hierarchy"));
    };
    hierarchy.logger().message("Saving hierarchy...");

    write_u32(w, FORMAT_VERSION.0)?;
    write_u32(w, FORMAT_VERSION.1)?;
    write_len(w, scales.len())?;

    write_len(w, first.len())?;
    write_matrix(w, first.transition_matrix())?;
    for (s, scale) in scales.iter().enumerate().skip(1) {
        debug!(scale = s, landmarks = scale.len(), "saving scale");
        write_len(w, scale.len())?;
        write_matrix(w, scale.transition_matrix())?;
        write_len(w, scale.landmark_to_original_data_idx().len())?;
        for &v in scale.landmark_to_original_data_idx() {
            write_u32(w, v)?;
        }
        write_len(w, scale.landmark_to_previous_scale_idx().len())?;
        for &v in scale.landmark_to_previous_scale_idx() {
            write_u32(w, v)?;
        }
        write_len(w, scale.landmark_weight().len())?;
        for &v in scale.landmark_weight() {
            write_f32(w, v)?;
        }
        write_len(w, scale.previous_scale_to_landmark_idx().len())?;
        for &v in scale.previous_scale_to_landmark_idx() {
            write_i32(w, v)?;
        }
        write_matrix(w, scale.area_of_influence())?;
    }
    w.flush()?;
    Ok(())
}

/// Read a hierarchy written by [`save`], attaching `params` to it.
///
/// Lengths and keys are checked against the scale sizes; violations are
/// reported as [`Error::Format`].
pub fn load<R: AffinityRow, Rd: Read>(r: &mut Rd, params: HsneParams) -> Result<Hierarchy<R>> {
    let major = read_u32(r)?;
    let minor = read_u32(r)?;
    if (major, minor) != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion { major, minor });
    }
    let num_scales = read_u32(r)? as usize;
    if num_scales == 0 {
        return Err(Error::Format("no scales".into()));
    }

    let n = read_u32(r)? as usize;
    let rows = read_matrix::<R, _>(r, n)?;
    expect_len("transition matrix", 0, rows.len(), n)?;
    let mut scales: Vec<Scale<R>> = Vec::with_capacity(num_scales.min(64));
    scales.push(Scale::first(rows));

    for s in 1..num_scales {
        let prev_n = scales[s - 1].len();
        let n = read_u32(r)? as usize;
        let transition_matrix = read_matrix::<R, _>(r, n)?;
        let landmark_to_original_data_idx = read_vec(r, read_u32)?;
        let landmark_to_previous_scale_idx = read_vec(r, read_u32)?;
        let landmark_weight = read_vec(r, read_f32)?;
        let previous_scale_to_landmark_idx = read_vec(r, read_i32)?;
        let area_of_influence = read_matrix::<R, _>(r, n)?;

        expect_len("transition matrix", s, transition_matrix.len(), n)?;
        expect_len("landmark_to_original_data_idx", s, landmark_to_original_data_idx.len(), n)?;
        expect_len("landmark_to_previous_scale_idx", s, landmark_to_previous_scale_idx.len(), n)?;
        expect_len("landmark_weight", s, landmark_weight.len(), n)?;
        expect_len(
            "previous_scale_to_landmark_idx",
            s,
            previous_scale_to_landmark_idx.len(),
            prev_n,
        )?;
        expect_len("area of influence", s, area_of_influence.len(), prev_n)?;
        debug!(scale = s, landmarks = n, "loaded scale");

        scales.push(Scale {
            landmark_to_original_data_idx,
            landmark_to_previous_scale_idx,
            previous_scale_to_landmark_idx,
            landmark_weight,
            transition_matrix,
            area_of_influence,
        });
    }
    info!(scales = num_scales, data_points = n, "hierarchy loaded");
    Hierarchy::from_scales(params, scales)
}

/// [`save`] into a newly created file.
pub fn save_to_path<R: AffinityRow>(hierarchy: &Hierarchy<R>, path: impl AsRef<Path>) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    save(hierarchy, &mut w)
}

/// [`load`] from a file.
pub fn load_from_path<R: AffinityRow>(path: impl AsRef<Path>, params: HsneParams) -> Result<Hierarchy<R>> {
    let mut r = BufReader::new(File::open(path)?);
    load(&mut r, params)
}
