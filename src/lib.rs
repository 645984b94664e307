//! # hsne
//!
//! Multiscale landmark hierarchies: a data set (vectors, a graph or raw
//! similarities) becomes a finite Markov chain over its points, and every
//! new scale keeps a subset of landmarks with a coarser chain over them.
//!
//! - [`Hierarchy`]: scale construction and cross-scale influence queries
//! - [`ClusterTree`]: landmark clusters over the scales, with a consistency audit
//! - [`io`]: binary persistence
//!
//! Rows of every sparse matrix are generic over [`AffinityRow`]; the default
//! backing is [`SortedRow`]. The `parallel` feature (on by default) runs
//! per-vertex work on rayon.
//!
//! ```rust,ignore
//! use hsne::{ExactKnn, Hierarchy, HsneParams, LandmarkPolicy};
//!
//! let params = HsneParams::new()
//!     .with_seed(42)
//!     .with_landmark_policy(LandmarkPolicy::fixed_ratio(0.1));
//! let mut h: Hierarchy = Hierarchy::new(params)?;
//! h.initialize_from_vectors(points.view(), &ExactKnn)?;
//! h.add_scale()?;
//! h.add_scale()?;
//! let weights = h.interpolation_weights(2)?;
//! ```

pub mod bootstrap;
pub mod cluster_tree;
/// Error types used across `hsne`.
pub mod error;
pub mod hierarchy;
pub mod influence;
pub mod io;
pub mod landmarks;
pub mod log;
pub mod pool;
pub mod sparse;
pub mod transition;
pub mod walk;

#[cfg(test)]
mod hierarchy_tests;

pub use bootstrap::{ExactKnn, NeighborSearch, Neighborhoods};
pub use cluster_tree::{Association, Cluster, ClusterAudit, ClusterTree};
pub use error::{Error, Result};
pub use hierarchy::{
    Aggregation, HealthCheck, HealthReport, Hierarchy, HsneParams, LandmarkPolicy, Scale,
    Severity, Statistics, ValidationIssue, ValidationReport,
};
pub use log::{MemoryLog, NoopLog, ProgressLog, TracingLog};
pub use sparse::{AffinityRow, SortedRow, SparseMatrix};
