//! Multiscale landmark hierarchy.
//!
//! A [`Hierarchy`] is an ordered list of [`Scale`]s. Scale 0 is a sparse
//! row-stochastic transition matrix over every data point, built from
//! vectors, a graph or caller-supplied similarities. Each call to
//! [`Hierarchy::add_scale`] coarsens the current top scale:
//!
//! ```text
//! top scale ──► select landmarks ──► walks to landmarks ──► transition matrix
//!   (n)           (L ≪ n)              (n × L influence)       (L × L)
//! ```
//!
//! 1. **Landmarks** are picked by random walks on the top scale
//!    ([`LandmarkPolicy`]).
//! 2. **Areas of influence**: every top-scale vertex sends walks that stop
//!    at the first landmark they meet; the hit frequencies say how much each
//!    landmark "owns" the vertex.
//! 3. **Transition matrix**: landmarks that share influence over the same
//!    vertices are connected, weighted by the vertices' own weights
//!    ([`Aggregation`]).
//!
//! Queries ([`Hierarchy::influence_on_data_point`],
//! [`Hierarchy::interpolation_weights`], ...) chain areas of influence across
//! scales to relate data points and landmarks at any level.
//!
//! # Example
//!
//! ```rust,ignore
//! use hsne::{ExactKnn, Hierarchy, HsneParams};
//!
//! let mut h = Hierarchy::new(HsneParams::new().with_seed(7))?;
//! h.initialize_from_vectors(data.view(), &ExactKnn)?;
//! while h.top_scale().map_or(0, |s| s.len()) > 100 {
//!     h.add_scale()?;
//! }
//! println!("{}", h.validate());
//! ```

mod params;
mod query;
mod scale;
mod stats;
mod validate;

use std::sync::Arc;
use std::time::Instant;

use ndarray::ArrayView2;
use petgraph::graph::Graph;
use petgraph::EdgeType;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::bootstrap::{self, NeighborSearch};
use crate::error::{Error, Result};
use crate::influence::{self, WalkBudget};
use crate::landmarks::{self, FixedRatio};
use crate::log::{NoopLog, Progress, ProgressLog};
use crate::pool::TaskPool;
use crate::sparse::{sparsity, AffinityRow, SortedRow};
use crate::transition;
use crate::walk::WalkTable;

pub use params::{Aggregation, HsneParams, LandmarkPolicy};
pub use scale::Scale;
pub use stats::Statistics;
pub use validate::{HealthCheck, HealthReport, Severity, ValidationIssue, ValidationReport};

pub(crate) use stats::timed;

/// Multiscale landmark hierarchy over rows of type `R`.
pub struct Hierarchy<R = SortedRow> {
    params: HsneParams,
    seed: u64,
    scales: Vec<Scale<R>>,
    statistics: Statistics,
    pool: TaskPool,
    log: Arc<dyn ProgressLog>,
}

impl<R> std::fmt::Debug for Hierarchy<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hierarchy")
            .field("params", &self.params)
            .field("seed", &self.seed)
            .field("scales", &self.scales.len())
            .field("pool", &self.pool)
            .finish()
    }
}

impl<R: AffinityRow> Hierarchy<R> {
    /// Empty hierarchy; call one of the `initialize_*` methods next.
    pub fn new(params: HsneParams) -> Result<Self> {
        params.validate()?;
        let seed = params.seed.unwrap_or_else(|| rand::rng().random());
        let pool = TaskPool::new(params.num_threads)?;
        Ok(Self {
            params,
            seed,
            scales: Vec::new(),
            statistics: Statistics::default(),
            pool,
            log: Arc::new(NoopLog),
        })
    }

    /// Report progress and statistics to `log`.
    pub fn with_logger(mut self, log: Arc<dyn ProgressLog>) -> Self {
        self.log = log;
        self
    }

    /// Rebuild from already computed scales (used by persistence).
    pub(crate) fn from_scales(params: HsneParams, scales: Vec<Scale<R>>) -> Result<Self> {
        let mut h = Self::new(params)?;
        h.scales = scales;
        Ok(h)
    }

    /// Build scale 0 from row vectors through a neighbor search backend.
    pub fn initialize_from_vectors<S>(&mut self, data: ArrayView2<'_, f32>, search: &S) -> Result<()>
    where
        S: NeighborSearch + Sync + ?Sized,
    {
        let n = data.nrows();
        if n == 0 || data.ncols() == 0 {
            return Err(Error::EmptyInput);
        }
        let start = Instant::now();
        let mut stats = Statistics::default();
        let k = self.params.num_neighbors + 1;
        let (iters, tol) = (
            self.params.perplexity_max_iterations,
            self.params.perplexity_tolerance,
        );
        self.log.message("Initializing the first scale...");
        self.log.value("data points", n as f64);

        let rows = self.pool.install(|| -> Result<Vec<R>> {
            let nn = timed(&mut stats.init_knn, || search.search(data, k))?;
            if nn.len() != n {
                return Err(Error::DimensionMismatch {
                    expected: n,
                    found: nn.len(),
                });
            }
            let calibrated = timed(&mut stats.init_probabilities, || {
                bootstrap::calibrate(&nn, iters, tol)
            });
            let unconverged = calibrated.iter().filter(|c| !c.converged).count();
            if unconverged > 0 {
                warn!(unconverged, "perplexity search fell back to uniform rows");
            }
            timed(&mut stats.init_transition, || bootstrap::assemble(&calibrated))
        })?;

        self.install_first_scale(rows, stats, start);
        Ok(())
    }

    /// Build scale 0 from a weighted graph (see
    /// [`similarities_from_graph`](crate::bootstrap::similarities_from_graph)).
    pub fn initialize_from_graph<N, Ty: EdgeType>(&mut self, graph: &Graph<N, f32, Ty>) -> Result<()> {
        let start = Instant::now();
        let mut stats = Statistics::default();
        let rows = timed(&mut stats.init_transition, || {
            bootstrap::similarities_from_graph(graph)
        })?;
        self.install_first_scale(rows, stats, start);
        Ok(())
    }

    /// Use caller-supplied rows as the scale-0 transition matrix, as is.
    ///
    /// Keys must index rows and weights must be non-negative.
    pub fn initialize_from_similarities(&mut self, rows: Vec<R>) -> Result<()> {
        let start = Instant::now();
        let mut stats = Statistics::default();
        timed(&mut stats.init_transition, || {
            bootstrap::check_similarities(&rows)
        })?;
        self.install_first_scale(rows, stats, start);
        Ok(())
    }

    fn install_first_scale(&mut self, rows: Vec<R>, mut stats: Statistics, start: Instant) {
        let scale = Scale::first(rows);
        info!(points = scale.len(), "first scale ready");
        self.log
            .value("min memory (MB)", scale.min_memory_occupation());
        self.scales = vec![scale];
        stats.total = Some(start.elapsed());
        stats.log(self.log.as_ref());
        self.statistics = stats;
    }

    /// Coarsen the current top scale and append the result.
    pub fn add_scale(&mut self) -> Result<&Scale<R>> {
        let prev_idx = self
            .scales
            .len()
            .checked_sub(1)
            .ok_or_else(|| Error::precondition("add_scale on an uninitialized hierarchy"))?;
        let scale_idx = prev_idx + 1;
        let start = Instant::now();
        let mut stats = Statistics::default();

        let prev = &self.scales[prev_idx];
        let params = &self.params;
        let seed = self.seed;
        let log: &dyn ProgressLog = self.log.as_ref();
        log.message(&format!("Adding scale {scale_idx}..."));

        let scale = self.pool.install(|| -> Result<Scale<R>> {
            let table = WalkTable::from_rows(&prev.transition_matrix);

            let selection = match params.landmark_policy {
                LandmarkPolicy::Stationary {
                    num_walks,
                    landmark_threshold,
                    walk_length,
                } => timed(&mut stats.mcmc_sampling, || {
                    landmarks::select_stationary(
                        &table,
                        num_walks,
                        landmark_threshold,
                        walk_length,
                        seed,
                        scale_idx,
                    )
                })?,
                LandmarkPolicy::FixedRatio {
                    reduction_factor,
                    outlier_removal_jumps,
                    reject_covered,
                    covered_patience,
                    max_attempts_per_landmark,
                } => timed(&mut stats.landmark_selection, || {
                    landmarks::select_fixed_ratio(
                        &table,
                        FixedRatio {
                            reduction_factor,
                            outlier_removal_jumps,
                            reject_covered,
                            covered_patience,
                            max_attempts_per_landmark,
                        },
                        seed,
                        scale_idx,
                    )
                })?,
            };
            stats.landmark_selection_walks = Some(selection.walks);
            log.value("landmarks", selection.len() as f64);

            let budget = WalkBudget {
                walks_per_landmark: params.walks_per_landmark,
                max_jumps: params.aggregation.max_jumps(),
                seed,
                scale: scale_idx,
            };
            let progress = Progress::new(log, "area of influence", prev.len());
            let mut inf = timed(&mut stats.aoi, || match params.aggregation {
                Aggregation::InCore {
                    prune_walk_count, ..
                } => influence::in_core::<R>(
                    &table,
                    &selection,
                    &prev.landmark_weight,
                    budget,
                    prune_walk_count,
                    &progress,
                ),
                Aggregation::OutOfCore {
                    prune_fraction,
                    transition_threshold,
                    ..
                } => influence::out_of_core::<R>(
                    &table,
                    &selection,
                    &prev.landmark_weight,
                    budget,
                    prune_fraction,
                    transition_threshold,
                    &progress,
                ),
            })?;
            let num_landmarks = selection.len();
            stats.aoi_walks = Some(inf.walks);
            stats.aoi_failed_walks = Some(inf.failed_walks);
            stats.aoi_sparsity = Some(sparsity(inf.aoi_entries(), prev.len(), num_landmarks));

            let summary = timed(&mut stats.transition, || {
                transition::normalize_rows(
                    &mut inf.transition_matrix,
                    params.aggregation.effective_threshold(),
                    params.strict_normalization,
                )
            })?;
            stats.transition_sparsity = Some(sparsity(summary.entries, num_landmarks, num_landmarks));
            stats.transition_effective_sparsity = Some(sparsity(
                summary.effective_entries,
                num_landmarks,
                num_landmarks,
            ));
            stats.empty_transition_rows = Some(summary.empty_rows.len());

            let landmark_to_original_data_idx = selection
                .landmark_to_previous
                .iter()
                .map(|&p| prev.landmark_to_original_data_idx[p as usize])
                .collect();
            Ok(Scale {
                landmark_to_original_data_idx,
                landmark_to_previous_scale_idx: selection.landmark_to_previous,
                previous_scale_to_landmark_idx: selection.previous_to_landmark,
                landmark_weight: inf.landmark_weight,
                transition_matrix: inf.transition_matrix,
                area_of_influence: inf.area_of_influence,
            })
        })?;

        debug!(
            scale = scale_idx,
            landmarks = scale.len(),
            previous = self.scales[prev_idx].len(),
            "scale added"
        );
        self.log
            .value("min memory (MB)", scale.min_memory_occupation());
        stats.total = Some(start.elapsed());
        stats.log(self.log.as_ref());
        self.statistics = stats;
        self.scales.push(scale);
        Ok(&self.scales[scale_idx])
    }

    /// Parameters the hierarchy was built with.
    pub fn params(&self) -> &HsneParams {
        &self.params
    }

    /// Base seed actually used (drawn at construction if none was given).
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Statistics of the last initialization or `add_scale`.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// All scales, finest first.
    pub fn scales(&self) -> &[Scale<R>] {
        &self.scales
    }

    /// Number of scales.
    pub fn num_scales(&self) -> usize {
        self.scales.len()
    }

    /// True once scale 0 exists.
    pub fn is_initialized(&self) -> bool {
        !self.scales.is_empty()
    }

    /// Scale `s`.
    pub fn scale(&self, s: usize) -> Result<&Scale<R>> {
        self.scales.get(s).ok_or(Error::IndexOutOfRange {
            what: "scale",
            index: s,
            len: self.scales.len(),
        })
    }

    /// Coarsest scale, if initialized.
    pub fn top_scale(&self) -> Option<&Scale<R>> {
        self.scales.last()
    }

    /// Number of data points (size of scale 0).
    pub fn num_data_points(&self) -> usize {
        self.scales.first().map_or(0, Scale::len)
    }

    pub(crate) fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub(crate) fn logger(&self) -> &dyn ProgressLog {
        self.log.as_ref()
    }
}
