//! Landmark selection.
//!
//! Two policies pick the vertices of the previous scale that survive into
//! the next one:
//!
//! - **Stationary**: every vertex launches a handful of fixed-length walks;
//!   vertices where many walks end (high stationary probability) are kept.
//!   The number of landmarks is whatever passes the threshold.
//! - **Fixed ratio**: a target count is drawn by uniform sampling followed by
//!   a short shake-off walk, which moves candidates off outliers and onto
//!   well-connected vertices.
//!
//! Walk RNGs are derived per task from the base seed, so the selected set
//! does not depend on the number of workers.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pool::{par_for_each, par_map};
use crate::walk::{task_rng, Phase, WalkTable};

/// Landmarks chosen from one scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Previous-scale index of each landmark, in landmark order.
    pub landmark_to_previous: Vec<u32>,
    /// Landmark index of each previous-scale vertex, `-1` if not selected.
    pub previous_to_landmark: Vec<i32>,
    /// Walks launched.
    pub walks: u64,
}

impl Selection {
    fn from_mask(selected: impl Iterator<Item = bool>, n: usize, walks: u64) -> Self {
        let mut landmark_to_previous = Vec::new();
        let mut previous_to_landmark = vec![-1i32; n];
        for (i, keep) in selected.enumerate() {
            if keep {
                previous_to_landmark[i] = landmark_to_previous.len() as i32;
                landmark_to_previous.push(i as u32);
            }
        }
        Self {
            landmark_to_previous,
            previous_to_landmark,
            walks,
        }
    }

    /// Number of landmarks.
    pub fn len(&self) -> usize {
        self.landmark_to_previous.len()
    }

    /// True if nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.landmark_to_previous.is_empty()
    }
}

/// Keep vertices that end more than `num_walks * landmark_threshold` walks.
pub fn select_stationary(
    table: &WalkTable,
    num_walks: usize,
    landmark_threshold: f64,
    walk_length: usize,
    seed: u64,
    scale: usize,
) -> Result<Selection> {
    let n = table.len();
    let hits: Vec<AtomicU32> = (0..n).map(|_| AtomicU32::new(0)).collect();

    par_for_each(n, |d| {
        let mut rng = task_rng(seed, scale, Phase::Selection, d as u64);
        for _ in 0..num_walks {
            if let Some(end) = table.walk_fixed(d as u32, walk_length, &mut rng) {
                hits[end as usize].fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    let threshold = num_walks as f64 * landmark_threshold;
    let walks = (n as u64) * (num_walks as u64);
    let selection = Selection::from_mask(
        hits.iter()
            .map(|h| f64::from(h.load(Ordering::Relaxed)) > threshold),
        n,
        walks,
    );
    debug!(
        previous = n,
        landmarks = selection.len(),
        threshold,
        "stationary landmark selection"
    );
    if selection.is_empty() {
        return Err(Error::NoLandmarks {
            previous_scale_size: n,
        });
    }
    Ok(selection)
}

/// Fixed-ratio selection parameters.
#[derive(Debug, Clone, Copy)]
pub struct FixedRatio {
    /// Fraction of the previous scale to keep.
    pub reduction_factor: f64,
    /// Steps of the shake-off walk.
    pub outlier_removal_jumps: usize,
    /// Prefer candidates whose shake-off path crosses no selected landmark.
    pub reject_covered: bool,
    /// Consecutive covered rejections after which any unselected end vertex
    /// is accepted again.
    pub covered_patience: usize,
    /// Candidate budget per requested landmark.
    pub max_attempts_per_landmark: usize,
}

/// Select `floor(n * reduction_factor)` landmarks.
///
/// Candidates are drawn in batches: the walks of a batch run in parallel,
/// then candidates are accepted in draw order. A candidate is rejected if its
/// walk failed or its end vertex is already a landmark. With
/// `reject_covered` it is also rejected when any vertex of its path is a
/// landmark, until `covered_patience` such rejections happen in a row; from
/// then on until the next acceptance only the end vertex is checked.
pub fn select_fixed_ratio(table: &WalkTable, cfg: FixedRatio, seed: u64, scale: usize) -> Result<Selection> {
    let n = table.len();
    let wanted = (n as f64 * cfg.reduction_factor).floor() as usize;
    if wanted == 0 {
        return Err(Error::NoLandmarks {
            previous_scale_size: n,
        });
    }
    let budget = cfg.max_attempts_per_landmark.saturating_mul(wanted);

    let mut previous_to_landmark = vec![-1i32; n];
    let mut landmark_to_previous: Vec<u32> = Vec::with_capacity(wanted);
    let mut attempts = 0usize;
    let mut covered_streak = 0usize;

    while landmark_to_previous.len() < wanted && attempts < budget {
        let batch = (wanted - landmark_to_previous.len()).max(64).min(budget - attempts);
        let first = attempts;
        let candidates = par_map(batch, |b| {
            let mut rng = task_rng(seed, scale, Phase::Selection, (first + b) as u64);
            let start = rng.random_range(0..n) as u32;
            let mut path = Vec::with_capacity(cfg.outlier_removal_jumps + 1);
            table
                .walk_fixed_path(start, cfg.outlier_removal_jumps, &mut rng, &mut path)
                .map(|end| (end, path))
        });

        for candidate in candidates {
            if landmark_to_previous.len() == wanted {
                break;
            }
            attempts += 1;
            let Some((end, path)) = candidate else {
                continue;
            };
            if previous_to_landmark[end as usize] != -1 {
                continue;
            }
            if cfg.reject_covered
                && covered_streak < cfg.covered_patience
                && path.iter().any(|&v| previous_to_landmark[v as usize] != -1)
            {
                covered_streak += 1;
                continue;
            }
            covered_streak = 0;
            previous_to_landmark[end as usize] = landmark_to_previous.len() as i32;
            landmark_to_previous.push(end);
        }
    }

    debug!(
        previous = n,
        wanted,
        selected = landmark_to_previous.len(),
        attempts,
        "fixed-ratio landmark selection"
    );
    if landmark_to_previous.len() < wanted {
        return Err(Error::LandmarkSelectionExhausted {
            attempts,
            selected: landmark_to_previous.len(),
            requested: wanted,
        });
    }
    Ok(Selection {
        landmark_to_previous,
        previous_to_landmark,
        walks: (attempts as u64) * (cfg.outlier_removal_jumps as u64),
    })
}
