//! Structural validation and health checking.
//!
//! Verifies the invariants a hierarchy must hold after construction or
//! loading:
//! - mapping vectors have matching lengths and invert each other
//! - scale 0 has identity mappings and unit weights
//! - area-of-influence rows index valid landmarks and sum to at most 1
//! - transition rows index valid landmarks and sum to 1 (or are empty)
//!
//! # Example
//!
//! ```rust,ignore
//! use hsne::{HealthCheck, Hierarchy};
//!
//! let report = hierarchy.health_check();
//! if !report.is_healthy() {
//!     for issue in &report.validation.issues {
//!         eprintln!("{issue}");
//!     }
//! }
//! ```

use super::{Hierarchy, Scale};
use crate::sparse::{row_sum, AffinityRow};

const SUM_TOLERANCE: f64 = 1e-5;

/// How badly an issue compromises queries on the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Recorded for context only.
    Info,
    /// Allowed, but queries lose mass (empty rows, a scale that grew).
    Warning,
    /// An invariant is broken; query results may be wrong.
    Error,
    /// Vector lengths disagree; indexing the scale may go out of bounds.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        })
    }
}

/// One broken or suspicious invariant, located by scale and row.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    /// Scale the issue was found in.
    pub scale: Option<usize>,
    /// Row, landmark or cluster within that scale.
    pub index: Option<usize>,
    /// Offending values, e.g. the bad key or row sum.
    pub context: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            scale: None,
            index: None,
            context: None,
        }
    }

    pub fn with_scale(mut self, scale: usize) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    /// `[ERROR] scale 2 row 7: message (context)`
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.severity)?;
        if let Some(s) = self.scale {
            write!(f, " scale {s}")?;
        }
        if let Some(i) = self.index {
            write!(f, " row {i}")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(ctx) = &self.context {
            write!(f, " ({ctx})")?;
        }
        Ok(())
    }
}

/// Issues collected by [`Hierarchy::validate`] or a cluster audit.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    fn info(&mut self, message: impl Into<String>) {
        self.add(ValidationIssue::new(Severity::Info, message));
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.add(ValidationIssue::new(Severity::Warning, message));
    }

    /// No issue at [`Severity::Error`] or above.
    pub fn is_healthy(&self) -> bool {
        self.worst().map_or(true, |s| s < Severity::Error)
    }

    /// Highest severity present.
    pub fn worst(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    /// Issues at exactly `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(worst) = self.worst() else {
            return write!(f, "no issues");
        };
        writeln!(f, "{} issues, worst {}", self.issues.len(), worst)?;
        for issue in &self.issues {
            writeln!(f, "  {issue}")?;
        }
        Ok(())
    }
}

/// Validation plus storage totals over every scale.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub validation: ValidationReport,
    /// Landmarks per scale, scale 0 first.
    pub scale_sizes: Vec<usize>,
    pub transition_entries: usize,
    pub aoi_entries: usize,
    /// Empty transition rows above scale 0.
    pub empty_transition_rows: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.validation.is_healthy()
    }
}

impl std::fmt::Display for HealthReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "scales {:?}: {} transition entries ({} empty rows), {} aoi entries",
            self.scale_sizes, self.transition_entries, self.empty_transition_rows, self.aoi_entries
        )?;
        write!(f, "{}", self.validation)
    }
}

/// Structures that can audit themselves.
pub trait HealthCheck {
    fn health_check(&self) -> HealthReport;

    fn is_healthy(&self) -> bool {
        self.health_check().is_healthy()
    }
}

fn check_rows<R: AffinityRow>(
    report: &mut ValidationReport,
    rows: &[R],
    width: usize,
    scale: usize,
    what: &str,
    stochastic: bool,
) {
    for (i, row) in rows.iter().enumerate() {
        if let Some(&(k, _)) = row.entries().iter().find(|&&(k, _)| k as usize >= width) {
            report.add(
                ValidationIssue::new(Severity::Error, format!("{what} key out of range"))
                    .with_scale(scale)
                    .with_index(i)
                    .with_context(format!("key {k}, width {width}")),
            );
        }
        if row.is_empty() {
            continue;
        }
        let sum = row_sum(row);
        let bad = if stochastic {
            (sum - 1.0).abs() > SUM_TOLERANCE
        } else {
            sum > 1.0 + SUM_TOLERANCE
        };
        if bad {
            report.add(
                ValidationIssue::new(Severity::Error, format!("{what} row sum out of bounds"))
                    .with_scale(scale)
                    .with_index(i)
                    .with_context(format!("sum {sum}")),
            );
        }
    }
}

fn check_first<R: AffinityRow>(report: &mut ValidationReport, s0: &Scale<R>) {
    let n = s0.len();
    let identity = |v: &[u32]| v.len() == n && v.iter().enumerate().all(|(i, &x)| x as usize == i);
    if !identity(s0.landmark_to_original_data_idx.as_slice())
        || !identity(s0.landmark_to_previous_scale_idx.as_slice())
    {
        report.add(
            ValidationIssue::new(Severity::Critical, "scale 0 mappings are not the identity")
                .with_scale(0),
        );
    }
    if s0.landmark_weight.len() != n || s0.landmark_weight.iter().any(|&w| w != 1.0) {
        report.add(ValidationIssue::new(Severity::Error, "scale 0 weights are not 1").with_scale(0));
    }
    if !s0.area_of_influence.is_empty() {
        report.add(
            ValidationIssue::new(Severity::Warning, "scale 0 carries an area of influence")
                .with_scale(0),
        );
    }
    check_rows(report, &s0.transition_matrix, n, 0, "transition", false);
}

fn check_scale<R: AffinityRow>(report: &mut ValidationReport, s: usize, prev: &Scale<R>, cur: &Scale<R>) {
    let n = cur.len();
    let lengths = [
        ("landmark_weight", cur.landmark_weight.len()),
        ("landmark_to_original_data_idx", cur.landmark_to_original_data_idx.len()),
        ("landmark_to_previous_scale_idx", cur.landmark_to_previous_scale_idx.len()),
    ];
    for (name, len) in lengths {
        if len != n {
            report.add(
                ValidationIssue::new(Severity::Critical, format!("{name} length mismatch"))
                    .with_scale(s)
                    .with_context(format!("{len} vs {n} landmarks")),
            );
        }
    }
    for (name, len) in [
        ("previous_scale_to_landmark_idx", cur.previous_scale_to_landmark_idx.len()),
        ("area_of_influence", cur.area_of_influence.len()),
    ] {
        if len != prev.len() {
            report.add(
                ValidationIssue::new(Severity::Critical, format!("{name} length mismatch"))
                    .with_scale(s)
                    .with_context(format!("{len} vs {} previous-scale vertices", prev.len())),
            );
        }
    }

    for (l, &p) in cur.landmark_to_previous_scale_idx.iter().enumerate() {
        let back = cur.previous_scale_to_landmark_idx.get(p as usize).copied();
        if back != Some(l as i32) {
            report.add(
                ValidationIssue::new(Severity::Error, "landmark mappings do not invert")
                    .with_scale(s)
                    .with_index(l),
            );
            continue;
        }
        let expected = prev.landmark_to_original_data_idx.get(p as usize).copied();
        if cur.landmark_to_original_data_idx.get(l).copied() != expected {
            report.add(
                ValidationIssue::new(Severity::Error, "landmark data index disagrees with previous scale")
                    .with_scale(s)
                    .with_index(l),
            );
        }
    }
    let marked = cur
        .previous_scale_to_landmark_idx
        .iter()
        .filter(|&&l| l != -1)
        .count();
    if marked != n {
        report.add(
            ValidationIssue::new(Severity::Error, "selected vertex count differs from landmark count")
                .with_scale(s)
                .with_context(format!("{marked} marked, {n} landmarks")),
        );
    }

    check_rows(report, &cur.area_of_influence, n, s, "area of influence", false);
    check_rows(report, &cur.transition_matrix, n, s, "transition", true);

    if n > prev.len() {
        report.warn(format!(
            "scale {s} has more landmarks than scale {} ({n} > {})",
            s - 1,
            prev.len()
        ));
    }
}

impl<R: AffinityRow> HealthCheck for Hierarchy<R> {
    fn health_check(&self) -> HealthReport {
        let mut validation = ValidationReport::new();
        let scales = self.scales();

        match scales.first() {
            Some(s0) => check_first(&mut validation, s0),
            None => validation.info("hierarchy is not initialized"),
        }
        for s in 1..scales.len() {
            check_scale(&mut validation, s, &scales[s - 1], &scales[s]);
        }

        let empty_transition_rows = scales
            .iter()
            .skip(1)
            .flat_map(|s| s.transition_matrix.iter())
            .filter(|r| r.is_empty())
            .count();
        if empty_transition_rows > 0 {
            validation.warn(format!(
                "{empty_transition_rows} transition rows above scale 0 are empty"
            ));
        }

        HealthReport {
            validation,
            scale_sizes: scales.iter().map(Scale::len).collect(),
            transition_entries: scales
                .iter()
                .flat_map(|s| s.transition_matrix.iter())
                .map(AffinityRow::len)
                .sum(),
            aoi_entries: scales
                .iter()
                .flat_map(|s| s.area_of_influence.iter())
                .map(AffinityRow::len)
                .sum(),
            empty_transition_rows,
        }
    }
}

impl<R: AffinityRow> Hierarchy<R> {
    /// Check every structural invariant; see [`HealthCheck`] for statistics.
    pub fn validate(&self) -> ValidationReport {
        self.health_check().validation
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sparse::SortedRow;
    use crate::{HsneParams, LandmarkPolicy};

    fn row(e: &[(u32, f32)]) -> SortedRow {
        e.iter().copied().collect()
    }

    fn ring(n: u32) -> Vec<SortedRow> {
        (0..n)
            .map(|i| row(&[((i + n - 1) % n, 0.5), ((i + 1) % n, 0.5)]))
            .collect()
    }

    #[test]
    fn worst_issue_decides_health() {
        let mut report = ValidationReport::new();
        assert!(report.is_healthy());
        assert_eq!(report.worst(), None);

        report.add(ValidationIssue::new(Severity::Warning, "scale grew").with_scale(2));
        assert!(report.is_healthy());
        report.add(ValidationIssue::new(Severity::Critical, "length mismatch").with_scale(1));
        report.add(ValidationIssue::new(Severity::Error, "bad key").with_scale(1));
        assert!(!report.is_healthy());
        assert_eq!(report.worst(), Some(Severity::Critical));
        assert_eq!(report.count(Severity::Error), 1);
        assert!(report.to_string().starts_with("3 issues, worst CRITICAL"));
    }

    #[test]
    fn empty_transition_rows_only_warn() {
        // Two disconnected pairs: each landmark has no one to link to.
        let pairs = vec![row(&[(1, 1.0)]), row(&[(0, 1.0)]), row(&[(3, 1.0)]), row(&[(2, 1.0)])];
        let params = HsneParams::new()
            .with_seed(3)
            .with_landmark_policy(LandmarkPolicy::fixed_ratio(0.5));
        let mut h: Hierarchy = Hierarchy::new(params).unwrap();
        h.initialize_from_similarities(pairs).unwrap();
        h.add_scale().unwrap();

        let report = h.health_check();
        assert!(report.is_healthy(), "{report}");
        assert_eq!(report.empty_transition_rows, 2);
        assert_eq!(report.validation.worst(), Some(Severity::Warning));
        assert_eq!(report.transition_entries, 4);
    }

    #[test]
    fn issue_display_names_scale_and_row() {
        let issue = ValidationIssue::new(Severity::Error, "transition row sum out of bounds")
            .with_scale(2)
            .with_index(7)
            .with_context("sum 0.5");
        assert_eq!(
            issue.to_string(),
            "[ERROR] scale 2 row 7: transition row sum out of bounds (sum 0.5)"
        );
        let bare = ValidationIssue::new(Severity::Info, "hierarchy is not initialized");
        assert_eq!(bare.to_string(), "[INFO]: hierarchy is not initialized");
    }

    #[test]
    fn built_hierarchy_is_healthy() {
        let params = HsneParams::new()
            .with_seed(9)
            .with_landmark_policy(LandmarkPolicy::fixed_ratio(0.05));
        let mut h: Hierarchy = Hierarchy::new(params).unwrap();
        h.initialize_from_similarities(ring(100)).unwrap();
        h.add_scale().unwrap();
        let report = h.health_check();
        assert!(report.is_healthy(), "{}", report);
        assert_eq!(report.scale_sizes, vec![100, 5]);
    }

    #[test]
    fn broken_mapping_is_reported() {
        let s0 = Scale::first(ring(4));
        let mut s1 = Scale {
            landmark_to_original_data_idx: vec![0, 2],
            landmark_to_previous_scale_idx: vec![0, 2],
            previous_scale_to_landmark_idx: vec![0, -1, 1, -1],
            landmark_weight: vec![2.0, 2.0],
            transition_matrix: vec![row(&[(1, 1.0)]), row(&[(0, 1.0)])],
            area_of_influence: vec![
                row(&[(0, 1.0)]),
                row(&[(0, 0.5), (1, 0.5)]),
                row(&[(1, 1.0)]),
                row(&[(0, 0.5), (1, 0.5)]),
            ],
        };
        let ok = Hierarchy::from_scales(HsneParams::new(), vec![s0.clone(), s1.clone()]).unwrap();
        assert!(ok.validate().is_healthy(), "{}", ok.validate());

        s1.previous_scale_to_landmark_idx[2] = -1;
        s1.area_of_influence[1] = row(&[(0, 0.9), (5, 0.9)]);
        let bad = Hierarchy::from_scales(HsneParams::new(), vec![s0, s1]).unwrap();
        let report = bad.validate();
        assert!(!report.is_healthy());
        let messages: Vec<&str> = report.issues.iter().map(|i| i.message.as_str()).collect();
        assert!(messages.contains(&"landmark mappings do not invert"));
        assert!(messages.contains(&"area of influence key out of range"));
        assert!(messages.contains(&"area of influence row sum out of bounds"));
    }
}
