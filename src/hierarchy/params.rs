//! Construction parameters.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How each new scale picks its landmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LandmarkPolicy {
    /// Markov-chain Monte Carlo estimate of the stationary distribution.
    ///
    /// Every vertex launches `num_walks` walks of `walk_length` steps; a
    /// vertex that ends more than `num_walks * landmark_threshold` of all
    /// walks becomes a landmark.
    Stationary {
        /// Walks started per vertex.
        num_walks: usize,
        /// Multiple of `num_walks` a vertex must exceed.
        landmark_threshold: f64,
        /// Steps per walk.
        walk_length: usize,
    },
    /// A fixed fraction of the previous scale, sampled by short random walks.
    FixedRatio {
        /// Fraction of the previous scale kept as landmarks.
        reduction_factor: f64,
        /// Steps of the shake-off walk applied to each uniform candidate.
        outlier_removal_jumps: usize,
        /// Prefer candidates whose shake-off path touches no selected landmark.
        reject_covered: bool,
        /// Covered rejections in a row before an unselected end vertex is
        /// accepted anyway.
        covered_patience: usize,
        /// Candidate budget per requested landmark.
        max_attempts_per_landmark: usize,
    },
}

impl LandmarkPolicy {
    /// Stationary policy with defaults (10 walks, threshold 1.5, length 10).
    pub fn stationary() -> Self {
        LandmarkPolicy::Stationary {
            num_walks: 10,
            landmark_threshold: 1.5,
            walk_length: 10,
        }
    }

    /// Fixed-ratio policy keeping `reduction_factor` of each scale.
    pub fn fixed_ratio(reduction_factor: f64) -> Self {
        LandmarkPolicy::FixedRatio {
            reduction_factor,
            outlier_removal_jumps: 10,
            reject_covered: true,
            covered_patience: 100,
            max_attempts_per_landmark: 1000,
        }
    }
}

impl Default for LandmarkPolicy {
    fn default() -> Self {
        Self::stationary()
    }
}

/// How walk outcomes are folded into the coarser transition matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Aggregation {
    /// Collect walk outcomes under a lock, then fold co-occurrences in
    /// vertex order.
    InCore {
        /// Walk budget before a walk is declared failed.
        max_jumps: usize,
        /// Landmarks reached this many times or fewer stay out of the
        /// transition matrix (they are still in the area of influence).
        prune_walk_count: f64,
    },
    /// Store areas of influence first, then build rows from the inverted
    /// matrix with no shared mutable state.
    OutOfCore {
        /// Walk budget before a walk is declared failed.
        max_jumps: usize,
        /// Influence probabilities at or below this are skipped.
        prune_fraction: f64,
        /// Normalized transition weights at or below this are dropped.
        transition_threshold: f32,
    },
}

impl Aggregation {
    /// In-core defaults (100 jumps, prune count 1.5).
    pub fn in_core() -> Self {
        Aggregation::InCore {
            max_jumps: 100,
            prune_walk_count: 1.5,
        }
    }

    /// Out-of-core defaults (200 jumps, prune fraction 0.015, threshold 0.001).
    pub fn out_of_core() -> Self {
        Aggregation::OutOfCore {
            max_jumps: 200,
            prune_fraction: 0.015,
            transition_threshold: 0.001,
        }
    }

    /// Walk budget of either strategy.
    pub fn max_jumps(&self) -> usize {
        match *self {
            Aggregation::InCore { max_jumps, .. } | Aggregation::OutOfCore { max_jumps, .. } => {
                max_jumps
            }
        }
    }

    /// Threshold above which a normalized transition weight counts as effective.
    pub(crate) fn effective_threshold(&self) -> f32 {
        match self {
            Aggregation::InCore { .. } => 0.01,
            Aggregation::OutOfCore { .. } => 0.001,
        }
    }
}

impl Default for Aggregation {
    fn default() -> Self {
        Self::in_core()
    }
}

/// Parameters for building a [`Hierarchy`](super::Hierarchy).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HsneParams {
    /// Base seed. `None` draws one from the thread RNG at construction.
    pub seed: Option<u64>,
    /// Neighbors per point for the scale-0 bootstrap.
    pub num_neighbors: usize,
    /// Landmark selection policy.
    pub landmark_policy: LandmarkPolicy,
    /// Walks started from each vertex when computing areas of influence.
    pub walks_per_landmark: usize,
    /// Transition-matrix construction strategy.
    pub aggregation: Aggregation,
    /// Worker count. `None` shares the global pool.
    pub num_threads: Option<usize>,
    /// Fail with [`Error::ZeroRowMass`] instead of leaving empty transition rows.
    pub strict_normalization: bool,
    /// Binary-search iterations of the perplexity calibration.
    pub perplexity_max_iterations: usize,
    /// Entropy tolerance of the perplexity calibration.
    pub perplexity_tolerance: f64,
}

impl Default for HsneParams {
    fn default() -> Self {
        Self {
            seed: None,
            num_neighbors: 30,
            landmark_policy: LandmarkPolicy::default(),
            walks_per_landmark: 100,
            aggregation: Aggregation::default(),
            num_threads: None,
            strict_normalization: false,
            perplexity_max_iterations: 200,
            perplexity_tolerance: 1e-5,
        }
    }
}

impl HsneParams {
    /// Default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set neighbors per point for the bootstrap.
    pub fn with_num_neighbors(mut self, k: usize) -> Self {
        self.num_neighbors = k;
        self
    }

    /// Set the landmark selection policy.
    pub fn with_landmark_policy(mut self, policy: LandmarkPolicy) -> Self {
        self.landmark_policy = policy;
        self
    }

    /// Set walks per vertex for areas of influence.
    pub fn with_walks_per_landmark(mut self, walks: usize) -> Self {
        self.walks_per_landmark = walks;
        self
    }

    /// Set the aggregation strategy.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Use a dedicated pool of `n` workers.
    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Treat empty transition rows as errors.
    pub fn with_strict_normalization(mut self, strict: bool) -> Self {
        self.strict_normalization = strict;
        self
    }

    /// Check every field.
    pub fn validate(&self) -> Result<()> {
        if self.num_neighbors == 0 {
            return Err(invalid("num_neighbors", "must be at least 1"));
        }
        if self.walks_per_landmark == 0 {
            return Err(invalid("walks_per_landmark", "must be at least 1"));
        }
        if self.num_threads == Some(0) {
            return Err(invalid("num_threads", "must be at least 1"));
        }
        if self.perplexity_max_iterations == 0 {
            return Err(invalid("perplexity_max_iterations", "must be at least 1"));
        }
        if !(self.perplexity_tolerance > 0.0) {
            return Err(invalid("perplexity_tolerance", "must be positive"));
        }

        match self.landmark_policy {
            LandmarkPolicy::Stationary {
                num_walks,
                landmark_threshold,
                walk_length,
            } => {
                if num_walks == 0 {
                    return Err(invalid("num_walks", "must be at least 1"));
                }
                if !(landmark_threshold >= 0.0) {
                    return Err(invalid("landmark_threshold", "must be non-negative"));
                }
                if walk_length == 0 {
                    return Err(invalid("walk_length", "must be at least 1"));
                }
            }
            LandmarkPolicy::FixedRatio {
                reduction_factor,
                max_attempts_per_landmark,
                ..
            } => {
                if !(reduction_factor > 0.0 && reduction_factor < 1.0) {
                    return Err(invalid("reduction_factor", "must be in (0, 1)"));
                }
                if max_attempts_per_landmark == 0 {
                    return Err(invalid("max_attempts_per_landmark", "must be at least 1"));
                }
            }
        }

        match self.aggregation {
            Aggregation::InCore {
                max_jumps,
                prune_walk_count,
            } => {
                if max_jumps == 0 {
                    return Err(invalid("max_jumps", "must be at least 1"));
                }
                if !(prune_walk_count >= 0.0) {
                    return Err(invalid("prune_walk_count", "must be non-negative"));
                }
            }
            Aggregation::OutOfCore {
                max_jumps,
                prune_fraction,
                transition_threshold,
            } => {
                if max_jumps == 0 {
                    return Err(invalid("max_jumps", "must be at least 1"));
                }
                if !(0.0..1.0).contains(&prune_fraction) {
                    return Err(invalid("prune_fraction", "must be in [0, 1)"));
                }
                if !(0.0..1.0).contains(&transition_threshold) {
                    return Err(invalid("transition_threshold", "must be in [0, 1)"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(name: &'static str, message: &'static str) -> Error {
    Error::InvalidParameter { name, message }
}
