//! Random walks over a frozen transition matrix.
//!
//! A [`WalkTable`] is a CSR snapshot of a row matrix with per-row cumulative
//! weights. A step draws `r` uniformly in `[0, 1)` and moves to the first
//! entry (in ascending key order) whose cumulative weight exceeds `r`. If
//! the row's mass does not exceed `r` the step fails; for row-stochastic
//! matrices that only happens on empty rows and rounding slivers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::sparse::AffinityRow;

/// Immutable walk view of a row matrix.
#[derive(Debug, Clone, Default)]
pub struct WalkTable {
    offsets: Vec<usize>,
    targets: Vec<u32>,
    cumulative: Vec<f64>,
}

impl WalkTable {
    /// Snapshot `rows`.
    pub fn from_rows<R: AffinityRow>(rows: &[R]) -> Self {
        let nnz: usize = rows.iter().map(AffinityRow::len).sum();
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        let mut targets = Vec::with_capacity(nnz);
        let mut cumulative = Vec::with_capacity(nnz);
        offsets.push(0);
        for row in rows {
            let mut acc = 0.0f64;
            for &(key, value) in row.entries().iter() {
                acc += f64::from(value);
                targets.push(key);
                cumulative.push(acc);
            }
            offsets.push(targets.len());
        }
        Self {
            offsets,
            targets,
            cumulative,
        }
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// True if the table has no vertices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Out-degree of `v`.
    pub fn degree(&self, v: u32) -> usize {
        let v = v as usize;
        self.offsets[v + 1] - self.offsets[v]
    }

    /// One step from `from`; `None` if the draw falls past the row's mass.
    pub fn step<G: Rng + ?Sized>(&self, from: u32, rng: &mut G) -> Option<u32> {
        let from = from as usize;
        let (lo, hi) = (self.offsets[from], self.offsets[from + 1]);
        if lo == hi {
            return None;
        }
        let r: f64 = rng.random();
        let cum = &self.cumulative[lo..hi];
        let pos = cum.partition_point(|&c| c <= r);
        (pos < cum.len()).then(|| self.targets[lo + pos])
    }

    /// Walk exactly `length` steps and return the final vertex.
    pub fn walk_fixed<G: Rng + ?Sized>(&self, start: u32, length: usize, rng: &mut G) -> Option<u32> {
        let mut cur = start;
        for _ in 0..length {
            cur = self.step(cur, rng)?;
        }
        Some(cur)
    }

    /// Like [`WalkTable::walk_fixed`], recording every visited vertex
    /// (`start` included) into `path`.
    pub fn walk_fixed_path<G: Rng + ?Sized>(
        &self,
        start: u32,
        length: usize,
        rng: &mut G,
        path: &mut Vec<u32>,
    ) -> Option<u32> {
        path.clear();
        path.push(start);
        let mut cur = start;
        for _ in 0..length {
            cur = self.step(cur, rng)?;
            path.push(cur);
        }
        Some(cur)
    }

    /// Walk from `start` until landing on a vertex with `stops[v] != -1`.
    ///
    /// At least one step is always taken. Gives up after `max_jumps` steps.
    pub fn walk_until<G: Rng + ?Sized>(
        &self,
        start: u32,
        stops: &[i32],
        max_jumps: usize,
        rng: &mut G,
    ) -> Option<u32> {
        let mut cur = start;
        for _ in 0..max_jumps {
            cur = self.step(cur, rng)?;
            if stops[cur as usize] != -1 {
                return Some(cur);
            }
        }
        None
    }
}

/// Walk phases; each gets its own RNG stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Selection = 1,
    Influence = 2,
}

/// Deterministic generator for task `index` of `phase` at `scale`.
///
/// Streams are independent of how tasks are scheduled, so results depend on
/// the seed and not on the number of workers.
pub(crate) fn task_rng(seed: u64, scale: usize, phase: Phase, index: u64) -> StdRng {
    let mut h = splitmix64(seed ^ splitmix64(scale as u64));
    h = splitmix64(h ^ (phase as u64));
    StdRng::seed_from_u64(splitmix64(h ^ index))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sparse::SortedRow;

    fn cycle(n: u32) -> Vec<SortedRow> {
        (0..n).map(|i| [((i + 1) % n, 1.0)].into_iter().collect()).collect()
    }

    #[test]
    fn deterministic_rows_follow_the_only_edge() {
        let table = WalkTable::from_rows(&cycle(5));
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(table.walk_fixed(0, 7, &mut rng), Some(2));
        assert_eq!(table.degree(3), 1);
    }

    #[test]
    fn empty_row_fails() {
        let mut rows = cycle(3);
        rows[1] = SortedRow::new();
        let table = WalkTable::from_rows(&rows);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(table.walk_fixed(0, 3, &mut rng), None);
    }

    #[test]
    fn walk_until_takes_at_least_one_step() {
        let table = WalkTable::from_rows(&cycle(4));
        let stops = [0, -1, -1, 1];
        let mut rng = StdRng::seed_from_u64(2);
        // Starting on a stop vertex still walks away from it first.
        assert_eq!(table.walk_until(0, &stops, 10, &mut rng), Some(3));
        assert_eq!(table.walk_until(0, &stops, 2, &mut rng), None);
    }

    #[test]
    fn path_records_start_and_every_step() {
        let table = WalkTable::from_rows(&cycle(4));
        let mut rng = StdRng::seed_from_u64(3);
        let mut path = Vec::new();
        let end = table.walk_fixed_path(2, 3, &mut rng, &mut path);
        assert_eq!(end, Some(1));
        assert_eq!(path, vec![2, 3, 0, 1]);
    }

    #[test]
    fn step_frequencies_follow_weights() {
        let rows: Vec<SortedRow> = vec![
            [(0, 0.25), (1, 0.75)].into_iter().collect(),
            [(0, 1.0)].into_iter().collect(),
        ];
        let table = WalkTable::from_rows(&rows);
        let mut rng = StdRng::seed_from_u64(4);
        let ones = (0..20_000)
            .filter(|_| table.step(0, &mut rng) == Some(1))
            .count();
        let freq = ones as f64 / 20_000.0;
        assert!((freq - 0.75).abs() < 0.02, "{freq}");
    }

    #[test]
    fn task_streams_differ() {
        let mut a = task_rng(7, 1, Phase::Selection, 0);
        let mut b = task_rng(7, 1, Phase::Selection, 1);
        let mut c = task_rng(7, 1, Phase::Influence, 0);
        let mut a2 = task_rng(7, 1, Phase::Selection, 0);
        let x: u64 = a.random();
        assert_ne!(x, b.random::<u64>());
        assert_ne!(x, c.random::<u64>());
        assert_eq!(x, a2.random::<u64>());
    }
}
