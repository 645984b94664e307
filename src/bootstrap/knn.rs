//! Nearest-neighbor search used by the scale-0 bootstrap.
//!
//! Any k-NN backend (an HNSW index, a KD-forest, a GPU search) plugs in by
//! implementing [`NeighborSearch`]. [`ExactKnn`] is the brute-force
//! reference: O(n²·d), fine for tests and a few thousand points.

use ndarray::ArrayView2;
use tracing::warn;

use crate::error::{Error, Result};
use crate::pool::par_map;

/// k nearest neighbors of every point, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighborhoods {
    k: usize,
    indices: Vec<u32>,
    sq_distances: Vec<f32>,
}

impl Neighborhoods {
    /// Wrap flat row-major results: row `i` occupies `[i*k, (i+1)*k)`.
    pub fn new(k: usize, indices: Vec<u32>, sq_distances: Vec<f32>) -> Result<Self> {
        if indices.len() != sq_distances.len() {
            return Err(Error::DimensionMismatch {
                expected: indices.len(),
                found: sq_distances.len(),
            });
        }
        if k == 0 || indices.len() % k != 0 {
            return Err(Error::precondition(format!(
                "{} neighbor entries do not split into rows of {k}",
                indices.len()
            )));
        }
        Ok(Self {
            k,
            indices,
            sq_distances,
        })
    }

    /// Neighbors per point.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.indices.len() / self.k
    }

    /// True if no points are stored.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Neighbor indices and squared distances of point `i`.
    pub fn row(&self, i: usize) -> (&[u32], &[f32]) {
        let r = i * self.k..(i + 1) * self.k;
        (&self.indices[r.clone()], &self.sq_distances[r])
    }
}

/// A k-nearest-neighbor backend over row vectors.
pub trait NeighborSearch {
    /// For every row of `data`, its `k` nearest rows by squared Euclidean
    /// distance, ascending. The query itself is expected among them.
    fn search(&self, data: ArrayView2<'_, f32>, k: usize) -> Result<Neighborhoods>;
}

/// Exhaustive search.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactKnn;

impl ExactKnn {
    fn squared_distance(a: &ndarray::ArrayView1<'_, f32>, b: &ndarray::ArrayView1<'_, f32>) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
    }
}

impl NeighborSearch for ExactKnn {
    fn search(&self, data: ArrayView2<'_, f32>, k: usize) -> Result<Neighborhoods> {
        let n = data.nrows();
        if n == 0 {
            return Err(Error::EmptyInput);
        }
        if k == 0 {
            return Err(Error::InvalidParameter {
                name: "k",
                message: "must be at least 1",
            });
        }
        let k_eff = k.min(n);
        if k_eff < k {
            warn!(requested = k, available = n, "fewer points than neighbors requested");
        }

        let rows = par_map(n, |i| {
            let query = data.row(i);
            let mut scored: Vec<(f32, u32)> = (0..n)
                .map(|j| (Self::squared_distance(&query, &data.row(j)), j as u32))
                .collect();
            scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            scored.truncate(k_eff);
            scored
        });

        let mut indices = Vec::with_capacity(n * k_eff);
        let mut sq_distances = Vec::with_capacity(n * k_eff);
        for row in rows {
            for (d, j) in row {
                indices.push(j);
                sq_distances.push(d);
            }
        }
        Neighborhoods::new(k_eff, indices, sq_distances)
    }
}
