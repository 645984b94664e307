//! Memory-lean row backed by a sorted vector of pairs.

use std::borrow::Cow;

use super::AffinityRow;
use crate::error::{Error, Result};

/// Sparse row stored as `(key, weight)` pairs sorted by key.
///
/// Lookups are binary searches; insertion of a new key shifts the tail, so
/// random-order construction is O(n) per insert. Rows built in key order
/// (bulk initialization, inversion) only ever append.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedRow {
    memory: Vec<(u32, f32)>,
}

impl SortedRow {
    /// Empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty row with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            memory: Vec::with_capacity(capacity),
        }
    }

    /// Allocated capacity, in entries.
    pub fn capacity(&self) -> usize {
        self.memory.capacity()
    }

    /// Iterate entries in key order without copying.
    pub fn iter(&self) -> std::slice::Iter<'_, (u32, f32)> {
        self.memory.iter()
    }

    /// Append an entry whose key is larger than every stored key.
    pub(crate) fn push_sorted(&mut self, key: u32, value: f32) {
        debug_assert!(self.memory.last().map_or(true, |&(k, _)| k < key));
        self.memory.push((key, value));
    }

    fn search(&self, key: u32) -> std::result::Result<usize, usize> {
        self.memory.binary_search_by_key(&key, |&(k, _)| k)
    }
}

impl AffinityRow for SortedRow {
    fn at(&mut self, key: u32) -> &mut f32 {
        let pos = match self.search(key) {
            Ok(pos) => pos,
            Err(pos) => {
                self.memory.insert(pos, (key, 0.0));
                pos
            }
        };
        &mut self.memory[pos].1
    }

    fn find(&self, key: u32) -> Option<f32> {
        self.search(key).ok().map(|pos| self.memory[pos].1)
    }

    fn len(&self) -> usize {
        self.memory.len()
    }

    fn entries(&self) -> Cow<'_, [(u32, f32)]> {
        Cow::Borrowed(&self.memory)
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(u32, &mut f32)) {
        for (k, v) in &mut self.memory {
            f(*k, v);
        }
    }

    fn clear(&mut self) {
        self.memory.clear();
    }

    fn shrink_to_fit(&mut self) {
        self.memory.shrink_to_fit();
    }

    fn memory_bytes(&self) -> Option<usize> {
        Some(self.memory.capacity() * std::mem::size_of::<(u32, f32)>())
    }

    fn bulk_initialize<I>(&mut self, sorted: I, threshold: f32) -> Result<()>
    where
        I: IntoIterator<Item = (u32, f32)>,
    {
        if !self.memory.is_empty() {
            return Err(Error::precondition("bulk_initialize on a populated row"));
        }
        let iter = sorted.into_iter();
        self.memory.reserve(iter.size_hint().0);
        let mut last: Option<u32> = None;
        for (key, value) in iter {
            if last.is_some_and(|l| key <= l) {
                self.memory = Vec::new();
                return Err(Error::precondition(format!(
                    "bulk_initialize input is not strictly increasing at key {key}"
                )));
            }
            last = Some(key);
            if value > threshold {
                self.memory.push((key, value));
            }
        }
        Ok(())
    }
}

impl FromIterator<(u32, f32)> for SortedRow {
    /// Collect arbitrary-order pairs; repeated keys accumulate.
    fn from_iter<T: IntoIterator<Item = (u32, f32)>>(iter: T) -> Self {
        let mut row = SortedRow::new();
        for (k, v) in iter {
            *row.at(k) += v;
        }
        row
    }
}
