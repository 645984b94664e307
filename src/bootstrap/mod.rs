//! Scale-0 transition matrix from raw inputs.
//!
//! Two entry points:
//!
//! - **Vectors**: k-NN search ([`NeighborSearch`]), then each point's
//!   neighbor distances become a Gaussian distribution calibrated to
//!   perplexity `k / 3` ([`calibrate`]), then rows are assembled
//!   ([`assemble`]).
//! - **Graphs**: a weighted `petgraph` graph is row-normalized directly
//!   ([`similarities_from_graph`]).
//!
//! Either way self-affinity is zero and every row sums to 1 (or is empty).

mod knn;
mod perplexity;

use petgraph::graph::Graph;
use petgraph::visit::EdgeRef;
use petgraph::EdgeType;

use crate::error::{Error, Result};
use crate::pool::par_map;
use crate::sparse::{normalize_row, AffinityRow};

pub use knn::{ExactKnn, NeighborSearch, Neighborhoods};
pub use perplexity::{gaussian_with_perplexity, Calibration};

/// One calibrated neighborhood: neighbor indices and their probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedRow {
    /// Neighbor indices, self excluded.
    pub neighbors: Vec<u32>,
    /// Probability of each neighbor.
    pub probabilities: Vec<f32>,
    /// Whether the perplexity search converged for this point.
    pub converged: bool,
}

/// Calibrate every neighborhood to perplexity `(k - 1) / 3`.
///
/// Each point is moved to the front of its own neighbor list; if the backend
/// did not return it (duplicates can push it out), the farthest neighbor is
/// dropped to make room.
pub fn calibrate(nn: &Neighborhoods, max_iterations: usize, tolerance: f64) -> Vec<CalibratedRow> {
    let k = nn.k();
    let perplexity = ((k.saturating_sub(1)) as f64 / 3.0).max(1.0);

    par_map(nn.len(), |i| {
        let (idx, dist) = nn.row(i);
        let mut idx = idx.to_vec();
        let mut dist = dist.to_vec();
        let me = i as u32;
        match idx.iter().position(|&j| j == me) {
            Some(0) => {}
            Some(p) => {
                idx.swap(0, p);
                dist.swap(0, p);
            }
            None => {
                idx.pop();
                dist.pop();
                idx.insert(0, me);
                dist.insert(0, 0.0);
            }
        }

        let c = gaussian_with_perplexity(&dist, perplexity, max_iterations, tolerance, Some(0));
        CalibratedRow {
            neighbors: idx[1..].to_vec(),
            probabilities: c.probabilities[1..].to_vec(),
            converged: c.converged,
        }
    })
}

/// Build sparse rows from calibrated neighborhoods.
pub fn assemble<R: AffinityRow>(calibrated: &[CalibratedRow]) -> Result<Vec<R>> {
    let rows = par_map(calibrated.len(), |i| {
        let c = &calibrated[i];
        let mut pairs: Vec<(u32, f32)> = c
            .neighbors
            .iter()
            .copied()
            .zip(c.probabilities.iter().copied())
            .collect();
        pairs.sort_unstable_by_key(|&(k, _)| k);
        pairs.dedup_by_key(|p| p.0);
        let mut row = R::default();
        row.bulk_initialize(pairs, 0.0).map(|()| row)
    });
    rows.into_iter().collect()
}

/// Row-normalized transition matrix of a weighted graph.
///
/// Undirected edges contribute in both directions; parallel edges add up.
/// Self-loops are ignored. Vertices without outgoing weight get empty rows.
pub fn similarities_from_graph<N, Ty, R>(graph: &Graph<N, f32, Ty>) -> Result<Vec<R>>
where
    Ty: EdgeType,
    R: AffinityRow,
{
    let n = graph.node_count();
    if n == 0 {
        return Err(Error::EmptyInput);
    }
    let mut rows = vec![R::default(); n];
    for edge in graph.edge_references() {
        let w = *edge.weight();
        if !(w >= 0.0) || !w.is_finite() {
            return Err(Error::InvalidParameter {
                name: "edge weight",
                message: "must be finite and non-negative",
            });
        }
        let (a, b) = (edge.source().index(), edge.target().index());
        if a == b || w == 0.0 {
            continue;
        }
        *rows[a].at(b as u32) += w;
        if !graph.is_directed() {
            *rows[b].at(a as u32) += w;
        }
    }
    for row in &mut rows {
        if normalize_row(row, 0.0).is_none() {
            row.clear();
        }
    }
    Ok(rows)
}

/// Check caller-supplied similarity rows.
pub(crate) fn check_similarities<R: AffinityRow>(rows: &[R]) -> Result<()> {
    if rows.is_empty() {
        return Err(Error::EmptyInput);
    }
    let n = rows.len();
    for row in rows {
        for &(k, v) in row.entries().iter() {
            if k as usize >= n {
                return Err(Error::IndexOutOfRange {
                    what: "similarity column",
                    index: k as usize,
                    len: n,
                });
            }
            if !(v >= 0.0) || !v.is_finite() {
                return Err(Error::InvalidParameter {
                    name: "similarity",
                    message: "weights must be finite and non-negative",
                });
            }
        }
    }
    Ok(())
}
