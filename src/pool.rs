//! Task submission.
//!
//! All per-vertex loops go through [`par_map`]. With the `parallel` feature
//! it fans out on the rayon pool that is current when it is called, so
//! running it inside [`TaskPool::install`] pins the work to a dedicated pool
//! of a chosen size. Without the feature it is a plain sequential map.
//!
//! Results come back in index order either way.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{Error, Result};

/// Apply `f` to `0..n` and collect the results in index order.
pub fn par_map<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        (0..n).into_par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        (0..n).map(f).collect()
    }
}

/// Run `f` for every index in `0..n`, in no particular order.
pub fn par_for_each<F>(n: usize, f: F)
where
    F: Fn(usize) + Sync + Send,
{
    #[cfg(feature = "parallel")]
    (0..n).into_par_iter().for_each(f);

    #[cfg(not(feature = "parallel"))]
    (0..n).for_each(f);
}

/// Optional dedicated worker pool.
///
/// `TaskPool::new(None)` uses the global rayon pool; `Some(n)` builds a pool
/// with exactly `n` workers.
pub struct TaskPool {
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl TaskPool {
    /// Build a pool with `num_threads` workers, or share the global one.
    pub fn new(num_threads: Option<usize>) -> Result<Self> {
        if num_threads == Some(0) {
            return Err(Error::InvalidParameter {
                name: "num_threads",
                message: "must be at least 1",
            });
        }

        #[cfg(feature = "parallel")]
        {
            let pool = match num_threads {
                Some(n) => Some(
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(n)
                        .build()
                        .map_err(|e| Error::Other(e.to_string()))?,
                ),
                None => None,
            };
            Ok(Self { pool })
        }

        #[cfg(not(feature = "parallel"))]
        {
            Ok(Self {})
        }
    }

    /// Run `op` with this pool as the current one.
    pub fn install<T, OP>(&self, op: OP) -> T
    where
        T: Send,
        OP: FnOnce() -> T + Send,
    {
        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            return pool.install(op);
        }
        op()
    }

    /// Workers that [`par_map`] will use inside [`TaskPool::install`].
    pub fn num_threads(&self) -> usize {
        #[cfg(feature = "parallel")]
        {
            match &self.pool {
                Some(pool) => pool.current_num_threads(),
                None => rayon::current_num_threads(),
            }
        }

        #[cfg(not(feature = "parallel"))]
        {
            1
        }
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn par_map_keeps_index_order() {
        let out = par_map(1000, |i| i * 2);
        assert!(out.iter().enumerate().all(|(i, &v)| v == i * 2));
    }

    #[test]
    fn par_for_each_visits_every_index() {
        let hits = AtomicUsize::new(0);
        par_for_each(257, |i| {
            hits.fetch_add(i, Ordering::Relaxed);
        });
        assert_eq!(hits.into_inner(), 256 * 257 / 2);
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(TaskPool::new(Some(0)).unwrap_err().is_precondition());
    }

    #[test]
    fn install_runs_on_requested_pool() {
        let pool = TaskPool::new(Some(2)).unwrap();
        let out = pool.install(|| par_map(10, |i| i + 1));
        assert_eq!(out, (1..=10).collect::<Vec<_>>());
        #[cfg(feature = "parallel")]
        assert_eq!(pool.num_threads(), 2);
    }
}
