use std::time::{Duration, Instant};

use crate::log::ProgressLog;

/// Timings and ratios recorded by the last initialization or `add_scale`.
///
/// Fields that the last call did not touch stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    /// Wall time of the whole call.
    pub total: Option<Duration>,
    /// Neighbor search.
    pub init_knn: Option<Duration>,
    /// Perplexity calibration.
    pub init_probabilities: Option<Duration>,
    /// Assembling the scale-0 transition matrix.
    pub init_transition: Option<Duration>,
    /// Stationary-policy walks.
    pub mcmc_sampling: Option<Duration>,
    /// Landmark selection.
    pub landmark_selection: Option<Duration>,
    /// Walks spent on landmark selection.
    pub landmark_selection_walks: Option<u64>,
    /// Area-of-influence walks.
    pub aoi: Option<Duration>,
    /// Walks spent on the area of influence.
    pub aoi_walks: Option<u64>,
    /// Area-of-influence walks that ran out of jumps or hit a dead end.
    pub aoi_failed_walks: Option<u64>,
    /// Transition-matrix construction and normalization.
    pub transition: Option<Duration>,
    /// `1 - nnz / (prev * landmarks)` of the area of influence.
    pub aoi_sparsity: Option<f64>,
    /// `1 - nnz / landmarks²` of the transition matrix.
    pub transition_sparsity: Option<f64>,
    /// Same, counting only weights above the effective threshold.
    pub transition_effective_sparsity: Option<f64>,
    /// Transition rows left empty because they had no mass.
    pub empty_transition_rows: Option<usize>,
}

impl Statistics {
    /// Report every recorded field to `log`.
    pub fn log(&self, log: &dyn ProgressLog) {
        log.message("--------------- Hierarchy statistics ---------------");
        let secs = [
            ("total time (s)", self.total),
            ("knn time (s)", self.init_knn),
            ("probabilities time (s)", self.init_probabilities),
            ("initial transition time (s)", self.init_transition),
            ("mcmc sampling time (s)", self.mcmc_sampling),
            ("landmark selection time (s)", self.landmark_selection),
            ("area of influence time (s)", self.aoi),
            ("transition time (s)", self.transition),
        ];
        for (name, d) in secs {
            if let Some(d) = d {
                log.value(name, d.as_secs_f64());
            }
        }
        let counts = [
            ("landmark selection walks", self.landmark_selection_walks),
            ("aoi walks", self.aoi_walks),
            ("aoi failed walks", self.aoi_failed_walks),
            (
                "empty transition rows",
                self.empty_transition_rows.map(|n| n as u64),
            ),
        ];
        for (name, n) in counts {
            if let Some(n) = n {
                log.value(name, n as f64);
            }
        }
        let ratios = [
            ("aoi sparsity (%)", self.aoi_sparsity),
            ("transition sparsity (%)", self.transition_sparsity),
            (
                "transition effective sparsity (%)",
                self.transition_effective_sparsity,
            ),
        ];
        for (name, r) in ratios {
            if let Some(r) = r {
                log.value(name, r * 100.0);
            }
        }
        log.message("----------------------------------------------------");
    }
}

/// Runs a closure and stores its wall time.
pub(crate) fn timed<T>(slot: &mut Option<Duration>, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    *slot = Some(start.elapsed());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogEntry, MemoryLog};

    #[test]
    fn only_recorded_fields_are_logged() {
        let stats = Statistics {
            aoi_walks: Some(400),
            aoi_sparsity: Some(0.25),
            ..Default::default()
        };
        let log = MemoryLog::new();
        stats.log(&log);
        assert_eq!(log.last_value("aoi walks"), Some(400.0));
        assert_eq!(log.last_value("aoi sparsity (%)"), Some(25.0));
        let values = log
            .entries()
            .iter()
            .filter(|e| matches!(e, LogEntry::Value(..)))
            .count();
        assert_eq!(values, 2);
    }

    #[test]
    fn timed_records_duration() {
        let mut slot = None;
        let v = timed(&mut slot, || 7);
        assert_eq!(v, 7);
        assert!(slot.is_some());
    }
}
