//! Coarse transition matrices.
//!
//! Two landmarks are similar when they influence the same vertices. With
//! `I` the area-of-influence matrix (vertex × landmark) and `w` the vertex
//! weights of the previous scale, the unnormalized transition weight is
//!
//! ```text
//! T[l1][l2] = Σ_d  I[d][l1] · I[d][l2] · w[d]      (l1 ≠ l2)
//! ```
//!
//! and each row is then scaled to sum to 1.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{Error, Result};
use crate::pool::par_map;
use crate::sparse::{invert, normalize_row, AffinityRow};

/// Build the transition matrix from a stored area of influence.
///
/// Influence probabilities at or below `prune_fraction` do not contribute.
/// After normalization, weights at or below `threshold` are dropped. Rows
/// with no mass come back empty.
pub fn from_area_of_influence<R: AffinityRow>(
    area_of_influence: &[R],
    previous_weight: &[f32],
    num_landmarks: usize,
    prune_fraction: f64,
    threshold: f32,
) -> Result<Vec<R>> {
    if previous_weight.len() != area_of_influence.len() {
        return Err(Error::DimensionMismatch {
            expected: area_of_influence.len(),
            found: previous_weight.len(),
        });
    }
    let inverse = invert(area_of_influence, num_landmarks)?;

    let rows = par_map(num_landmarks, |l| -> Result<R> {
        let l = l as u32;
        let mut acc: BTreeMap<u32, f64> = BTreeMap::new();
        for &(d, p_dl) in inverse[l as usize].entries().iter() {
            if f64::from(p_dl) <= prune_fraction {
                continue;
            }
            let w = f64::from(previous_weight[d as usize]);
            for &(l2, p) in area_of_influence[d as usize].entries().iter() {
                if l2 == l || f64::from(p) <= prune_fraction {
                    continue;
                }
                *acc.entry(l2).or_insert(0.0) += f64::from(p_dl) * f64::from(p) * w;
            }
        }

        let mass: f64 = acc.values().sum();
        let mut row = R::default();
        if mass > 0.0 {
            row.bulk_initialize(acc.into_iter().map(|(k, v)| (k, (v / mass) as f32)), threshold)?;
            row.shrink_to_fit();
        }
        Ok(row)
    });
    rows.into_iter().collect()
}

/// Summary of [`normalize_rows`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationSummary {
    /// Stored entries.
    pub entries: usize,
    /// Entries above the effective threshold.
    pub effective_entries: usize,
    /// Rows that had no mass and were left empty.
    pub empty_rows: Vec<usize>,
}

/// Scale every row to unit sum.
///
/// Rows without mass stay empty and are listed in the summary, or fail with
/// [`Error::ZeroRowMass`] when `strict` is set.
pub fn normalize_rows<R: AffinityRow>(
    rows: &mut [R],
    effective_threshold: f32,
    strict: bool,
) -> Result<NormalizationSummary> {
    let mut summary = NormalizationSummary::default();
    for (i, row) in rows.iter_mut().enumerate() {
        summary.entries += row.len();
        match normalize_row(row, effective_threshold) {
            Some(n) => summary.effective_entries += n.effective_entries,
            None if strict => return Err(Error::ZeroRowMass { row: i }),
            None => {
                row.clear();
                summary.empty_rows.push(i);
            }
        }
    }
    if !summary.empty_rows.is_empty() {
        warn!(
            empty = summary.empty_rows.len(),
            rows = rows.len(),
            "transition rows without mass left empty"
        );
    }
    Ok(summary)
}
