//! Sparse affinity rows.
//!
//! Every matrix in a hierarchy (transition matrices, areas of influence,
//! interpolation weights) is a `Vec<R>` of rows, where a row maps a `u32`
//! vertex index to a non-negative `f32` weight.
//!
//! The algorithms are written against the [`AffinityRow`] capability set
//! rather than a concrete container:
//!
//! | Capability | Method |
//! |------------|--------|
//! | Indexed mutable access | [`AffinityRow::at`] |
//! | Read-only lookup | [`AffinityRow::find`] |
//! | Ordered iteration | [`AffinityRow::entries`] |
//! | Bulk sorted construction | [`AffinityRow::bulk_initialize`] |
//!
//! Three backings conform: [`SortedRow`] (the default, a sorted vector of
//! pairs), `BTreeMap<u32, f32>` and `HashMap<u32, f32>`. Anything that is
//! sensitive to summation order reads rows through `entries()`, which yields
//! ascending keys for every backing, so the three produce identical results
//! for identical seeds.

mod ops;
mod sorted;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};

pub use ops::{invert, normalize_row, row_sum, sparsity, support, RowNormalization};
pub use sorted::SortedRow;

/// A row of a sparse affinity matrix.
pub trait AffinityRow: Default + Clone + Send + Sync {
    /// Mutable access to the weight of `key`, inserting `0.0` if absent.
    fn at(&mut self, key: u32) -> &mut f32;

    /// Weight of `key`, if present.
    fn find(&self, key: u32) -> Option<f32>;

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// True if no entries are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in ascending key order.
    fn entries(&self) -> Cow<'_, [(u32, f32)]>;

    /// Apply `f` to every stored weight.
    fn for_each_mut(&mut self, f: impl FnMut(u32, &mut f32));

    /// Remove every entry.
    fn clear(&mut self);

    /// Release spare capacity.
    fn shrink_to_fit(&mut self) {}

    /// Bytes held by the row, when the backing can tell.
    fn memory_bytes(&self) -> Option<usize> {
        None
    }

    /// Fill an empty row from entries sorted by strictly increasing key,
    /// keeping only weights above `threshold`.
    ///
    /// On error the row is left empty.
    fn bulk_initialize<I>(&mut self, sorted: I, threshold: f32) -> Result<()>
    where
        I: IntoIterator<Item = (u32, f32)>,
    {
        if !self.is_empty() {
            return Err(Error::precondition("bulk_initialize on a populated row"));
        }
        let mut last: Option<u32> = None;
        for (key, value) in sorted {
            if last.is_some_and(|l| key <= l) {
                self.clear();
                return Err(Error::precondition(format!(
                    "bulk_initialize input is not strictly increasing at key {key}"
                )));
            }
            last = Some(key);
            if value > threshold {
                *self.at(key) = value;
            }
        }
        Ok(())
    }
}

/// A sparse matrix stored as one row per vertex.
pub type SparseMatrix<R> = Vec<R>;

impl AffinityRow for BTreeMap<u32, f32> {
    fn at(&mut self, key: u32) -> &mut f32 {
        self.entry(key).or_insert(0.0)
    }

    fn find(&self, key: u32) -> Option<f32> {
        self.get(&key).copied()
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn entries(&self) -> Cow<'_, [(u32, f32)]> {
        Cow::Owned(self.iter().map(|(&k, &v)| (k, v)).collect())
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(u32, &mut f32)) {
        for (k, v) in self.iter_mut() {
            f(*k, v);
        }
    }

    fn clear(&mut self) {
        BTreeMap::clear(self);
    }
}

impl AffinityRow for HashMap<u32, f32> {
    fn at(&mut self, key: u32) -> &mut f32 {
        self.entry(key).or_insert(0.0)
    }

    fn find(&self, key: u32) -> Option<f32> {
        self.get(&key).copied()
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn entries(&self) -> Cow<'_, [(u32, f32)]> {
        let mut out: Vec<(u32, f32)> = self.iter().map(|(&k, &v)| (k, v)).collect();
        out.sort_unstable_by_key(|&(k, _)| k);
        Cow::Owned(out)
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(u32, &mut f32)) {
        for (k, v) in self.iter_mut() {
            f(*k, v);
        }
    }

    fn clear(&mut self) {
        HashMap::clear(self);
    }

    fn shrink_to_fit(&mut self) {
        HashMap::shrink_to_fit(self);
    }

    fn memory_bytes(&self) -> Option<usize> {
        Some(self.capacity() * std::mem::size_of::<(u32, f32)>())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn exercise<R: AffinityRow>() {
        let mut row = R::default();
        *row.at(7) += 1.0;
        *row.at(2) += 2.0;
        *row.at(7) += 1.0;
        assert_eq!(row.len(), 2);
        assert_eq!(row.find(7), Some(2.0));
        assert_eq!(row.find(3), None);
        assert_eq!(row.entries().as_ref(), &[(2, 2.0), (7, 2.0)]);

        let err = row.bulk_initialize([(1, 1.0)], 0.0).unwrap_err();
        assert!(err.is_precondition());

        let mut fresh = R::default();
        fresh
            .bulk_initialize([(1, 0.5), (4, 0.001), (9, 0.7)], 0.01)
            .unwrap();
        assert_eq!(fresh.entries().as_ref(), &[(1, 0.5), (9, 0.7)]);

        let mut bad = R::default();
        assert!(bad.bulk_initialize([(3, 1.0), (3, 1.0)], 0.0).is_err());
        assert!(bad.is_empty());
    }

    #[test]
    fn btree_backing_conforms() {
        exercise::<BTreeMap<u32, f32>>();
    }

    #[test]
    fn hash_backing_conforms() {
        exercise::<HashMap<u32, f32>>();
    }

    #[test]
    fn sorted_backing_conforms() {
        exercise::<SortedRow>();
    }
}
