//! Whole-matrix operations written against [`AffinityRow`].

use std::collections::BTreeSet;

use super::AffinityRow;
use crate::error::{Error, Result};

/// Transpose a row matrix with `n_cols` columns.
///
/// Row `j` of the result holds `(i, m[i][j])` for every row `i` of `rows`
/// that stores column `j`. Used to answer "who points at me" without a
/// full scan per query.
pub fn invert<R: AffinityRow>(rows: &[R], n_cols: usize) -> Result<Vec<R>> {
    let mut inverse: Vec<R> = vec![R::default(); n_cols];
    for (i, row) in rows.iter().enumerate() {
        for &(key, value) in row.entries().iter() {
            let slot = inverse.get_mut(key as usize).ok_or(Error::IndexOutOfRange {
                what: "column",
                index: key as usize,
                len: n_cols,
            })?;
            *slot.at(i as u32) = value;
        }
    }
    for row in &mut inverse {
        row.shrink_to_fit();
    }
    Ok(inverse)
}

/// Sum of a row's weights, accumulated in key order.
pub fn row_sum<R: AffinityRow>(row: &R) -> f64 {
    row.entries().iter().map(|&(_, v)| f64::from(v)).sum()
}

/// Outcome of normalizing one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowNormalization {
    /// Mass before normalization.
    pub mass: f64,
    /// Entries above `effective_threshold` after normalization.
    pub effective_entries: usize,
}

/// Scale a row to unit sum. Returns `None` (row untouched) if it has no mass.
pub fn normalize_row<R: AffinityRow>(row: &mut R, effective_threshold: f32) -> Option<RowNormalization> {
    let mass = row_sum(row);
    if mass <= 0.0 {
        return None;
    }
    let mut effective_entries = 0;
    row.for_each_mut(|_, v| {
        *v = (f64::from(*v) / mass) as f32;
        if *v > effective_threshold {
            effective_entries += 1;
        }
    });
    Some(RowNormalization {
        mass,
        effective_entries,
    })
}

/// Non-zero support of a matrix as `(row, column)` pairs.
pub fn support<R: AffinityRow>(rows: &[R]) -> BTreeSet<(u32, u32)> {
    rows.iter()
        .enumerate()
        .flat_map(|(i, row)| {
            row.entries()
                .iter()
                .filter(|&&(_, v)| v != 0.0)
                .map(|&(k, _)| (i as u32, k))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Fraction of empty cells in an `n_rows x n_cols` matrix holding `nnz` entries.
pub fn sparsity(nnz: usize, n_rows: usize, n_cols: usize) -> f64 {
    let cells = n_rows as f64 * n_cols as f64;
    if cells == 0.0 {
        return 1.0;
    }
    1.0 - nnz as f64 / cells
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sparse::SortedRow;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashMap};

    fn matrix(entries: &[&[(u32, f32)]]) -> Vec<SortedRow> {
        entries
            .iter()
            .map(|row| row.iter().copied().collect())
            .collect()
    }

    #[test]
    fn invert_transposes() {
        let m = matrix(&[&[(1, 0.5), (2, 0.5)], &[(0, 1.0)], &[]]);
        let t = invert(&m, 3).unwrap();
        assert_eq!(t[0].entries().as_ref(), &[(1, 1.0)]);
        assert_eq!(t[1].entries().as_ref(), &[(0, 0.5)]);
        assert_eq!(t[2].entries().as_ref(), &[(0, 0.5)]);
    }

    #[test]
    fn invert_rejects_out_of_range_columns() {
        let m = matrix(&[&[(5, 1.0)]]);
        let err = invert(&m, 2).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn normalize_reports_zero_mass() {
        let mut empty = SortedRow::new();
        assert!(normalize_row(&mut empty, 0.01).is_none());

        let mut row: SortedRow = [(0, 1.0), (3, 3.0)].into_iter().collect();
        let n = normalize_row(&mut row, 0.01).unwrap();
        assert_eq!(n.mass, 4.0);
        assert_eq!(n.effective_entries, 2);
        assert!((row_sum(&row) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn backings_invert_identically() {
        let sorted = matrix(&[&[(2, 0.25), (0, 0.75)], &[(1, 1.0)], &[(0, 0.5), (2, 0.5)]]);
        let btree: Vec<BTreeMap<u32, f32>> = sorted
            .iter()
            .map(|r| r.iter().copied().collect())
            .collect();
        let hash: Vec<HashMap<u32, f32>> = sorted
            .iter()
            .map(|r| r.iter().copied().collect())
            .collect();

        let a: Vec<Vec<(u32, f32)>> = invert(&sorted, 3)
            .unwrap()
            .iter()
            .map(|r| r.entries().into_owned())
            .collect();
        let b: Vec<Vec<(u32, f32)>> = invert(&btree, 3)
            .unwrap()
            .iter()
            .map(|r| r.entries().into_owned())
            .collect();
        let c: Vec<Vec<(u32, f32)>> = invert(&hash, 3)
            .unwrap()
            .iter()
            .map(|r| r.entries().into_owned())
            .collect();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn sparsity_of_empty_shape_is_one() {
        assert_eq!(sparsity(0, 0, 10), 1.0);
        assert!((sparsity(5, 2, 5) - 0.5).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn double_inversion_preserves_support(
            rows in proptest::collection::vec(
                proptest::collection::btree_map(0u32..20, 0.01f32..1.0, 0..8),
                1..30,
            )
        ) {
            let m: Vec<SortedRow> = rows
                .iter()
                .map(|r| r.iter().map(|(&k, &v)| (k, v)).collect())
                .collect();
            let t = invert(&m, 20).unwrap();
            let back = invert(&t, m.len()).unwrap();
            prop_assert_eq!(support(&m), support(&back));
        }
    }
}
