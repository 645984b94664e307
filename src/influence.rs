//! Areas of influence.
//!
//! Every vertex of the previous scale launches `walks_per_landmark` walks
//! that stop on the first landmark they land on. The fraction of walks ending
//! on landmark `l` is the influence of `l` over that vertex. Walks that run
//! out of jumps (or hit a dead end) are dropped, so a row sums to at most 1.
//!
//! The same walks also drive the coarser transition matrix. Two strategies:
//!
//! - [`in_core`] hands each vertex's landmark co-occurrences to a shared
//!   buffer under one lock, then folds them into the matrix in vertex order.
//! - [`out_of_core`] stores the influence rows first and hands them to
//!   [`transition::from_area_of_influence`](crate::transition::from_area_of_influence),
//!   which needs no shared mutable state.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::Result;
use crate::landmarks::Selection;
use crate::log::Progress;
use crate::pool::par_map;
use crate::sparse::AffinityRow;
use crate::transition;
use crate::walk::{task_rng, Phase, WalkTable};

/// Landmarks hit by the walks of one vertex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reached {
    /// Landmark index to number of walks that ended there.
    pub counts: BTreeMap<u32, u32>,
    /// Walks that did not reach any landmark.
    pub failed: u32,
}

/// Launch `walks` stopping walks from `start`.
pub fn reach<G: Rng + ?Sized>(
    table: &WalkTable,
    start: u32,
    previous_to_landmark: &[i32],
    walks: usize,
    max_jumps: usize,
    rng: &mut G,
) -> Reached {
    let mut reached = Reached::default();
    for _ in 0..walks {
        match table.walk_until(start, previous_to_landmark, max_jumps, rng) {
            Some(stop) => {
                let l = previous_to_landmark[stop as usize] as u32;
                *reached.counts.entry(l).or_insert(0) += 1;
            }
            None => reached.failed += 1,
        }
    }
    reached
}

/// Walk parameters shared by both strategies.
#[derive(Debug, Clone, Copy)]
pub struct WalkBudget {
    /// Walks per previous-scale vertex.
    pub walks_per_landmark: usize,
    /// Steps before a walk is declared failed.
    pub max_jumps: usize,
    /// Base seed.
    pub seed: u64,
    /// Index of the scale being built.
    pub scale: usize,
}

/// Output of either strategy.
#[derive(Debug, Clone)]
pub struct Influence<R> {
    /// One row per previous-scale vertex, keyed by landmark index.
    pub area_of_influence: Vec<R>,
    /// Unnormalized (in-core) or normalized (out-of-core) transition rows.
    pub transition_matrix: Vec<R>,
    /// Mass each landmark absorbs, weighted by the origin vertex's weight.
    pub landmark_weight: Vec<f32>,
    /// Walks launched.
    pub walks: u64,
    /// Walks that reached no landmark.
    pub failed_walks: u64,
}

impl<R: AffinityRow> Influence<R> {
    /// Stored entries in the area of influence.
    pub fn aoi_entries(&self) -> usize {
        self.area_of_influence.iter().map(AffinityRow::len).sum()
    }
}

fn probabilities(reached: &Reached, walks: usize) -> impl Iterator<Item = (u32, f32)> + '_ {
    reached
        .counts
        .iter()
        .map(move |(&l, &c)| (l, c as f32 / walks as f32))
}

/// In-core strategy.
///
/// For every vertex `d` with weight `w`, and every pair of distinct
/// landmarks `l1, l2` both reached more than `prune_walk_count` times,
/// `T[l1][l2] += c1 * c2 * w`. Walk outcomes land in a buffer under a single
/// lock in completion order; the fold then runs in vertex order, so the
/// result does not depend on the worker count.
pub fn in_core<R: AffinityRow>(
    table: &WalkTable,
    selection: &Selection,
    previous_weight: &[f32],
    budget: WalkBudget,
    prune_walk_count: f64,
    progress: &Progress<'_>,
) -> Result<Influence<R>> {
    let n = table.len();
    let num_landmarks = selection.len();
    let pending: Mutex<Vec<(usize, Reached)>> = Mutex::new(Vec::with_capacity(n));

    let rows = par_map(n, |d| {
        let mut rng = task_rng(budget.seed, budget.scale, Phase::Influence, d as u64);
        let reached = reach(
            table,
            d as u32,
            &selection.previous_to_landmark,
            budget.walks_per_landmark,
            budget.max_jumps,
            &mut rng,
        );
        let mut row = R::default();
        let built = row.bulk_initialize(probabilities(&reached, budget.walks_per_landmark), 0.0);
        let failed = reached.failed;
        pending.lock().push((d, reached));
        progress.tick();
        built.map(|()| (row, failed))
    });

    let mut area_of_influence = Vec::with_capacity(n);
    let mut failed_walks = 0u64;
    for r in rows {
        let (row, failed) = r?;
        area_of_influence.push(row);
        failed_walks += u64::from(failed);
    }

    let mut pending = pending.into_inner();
    pending.sort_unstable_by_key(|&(d, _)| d);
    let mut transition = vec![R::default(); num_landmarks];
    let mut weights = vec![0.0f64; num_landmarks];
    for (d, reached) in &pending {
        let w = previous_weight[*d];
        for (&l1, &c1) in &reached.counts {
            if f64::from(c1) <= prune_walk_count {
                continue;
            }
            for (&l2, &c2) in &reached.counts {
                if l1 == l2 || f64::from(c2) <= prune_walk_count {
                    continue;
                }
                *transition[l1 as usize].at(l2) += (c1 as f32) * (c2 as f32) * w;
            }
        }
        for (l, p) in probabilities(reached, budget.walks_per_landmark) {
            weights[l as usize] += f64::from(p) * f64::from(w);
        }
    }

    Ok(Influence {
        area_of_influence,
        transition_matrix: transition,
        landmark_weight: weights.into_iter().map(|w| w as f32).collect(),
        walks: (n as u64) * (budget.walks_per_landmark as u64),
        failed_walks,
    })
}

/// Out-of-core strategy.
///
/// Influence rows are computed independently and stored compactly; landmark
/// weights are accumulated in vertex order; the transition matrix is then
/// built landmark by landmark from the inverted influence matrix.
pub fn out_of_core<R: AffinityRow>(
    table: &WalkTable,
    selection: &Selection,
    previous_weight: &[f32],
    budget: WalkBudget,
    prune_fraction: f64,
    transition_threshold: f32,
    progress: &Progress<'_>,
) -> Result<Influence<R>> {
    let n = table.len();
    let num_landmarks = selection.len();

    let rows = par_map(n, |d| {
        let mut rng = task_rng(budget.seed, budget.scale, Phase::Influence, d as u64);
        let reached = reach(
            table,
            d as u32,
            &selection.previous_to_landmark,
            budget.walks_per_landmark,
            budget.max_jumps,
            &mut rng,
        );
        let mut row = R::default();
        let built = row.bulk_initialize(probabilities(&reached, budget.walks_per_landmark), 0.0);
        row.shrink_to_fit();
        progress.tick();
        built.map(|()| (row, reached.failed))
    });

    let mut area_of_influence = Vec::with_capacity(n);
    let mut failed_walks = 0u64;
    for r in rows {
        let (row, failed) = r?;
        area_of_influence.push(row);
        failed_walks += u64::from(failed);
    }

    let mut weights = vec![0.0f64; num_landmarks];
    for (d, row) in area_of_influence.iter().enumerate() {
        let w = f64::from(previous_weight[d]);
        for &(l, p) in row.entries().iter() {
            weights[l as usize] += f64::from(p) * w;
        }
    }

    let transition_matrix = transition::from_area_of_influence(
        &area_of_influence,
        previous_weight,
        num_landmarks,
        prune_fraction,
        transition_threshold,
    )?;

    Ok(Influence {
        area_of_influence,
        transition_matrix,
        landmark_weight: weights.into_iter().map(|w| w as f32).collect(),
        walks: (n as u64) * (budget.walks_per_landmark as u64),
        failed_walks,
    })
}
