//! Landmark clusters layered over a [`Hierarchy`].
//!
//! A [`Cluster`] is a named set of landmark indices at one scale. Every
//! cluster below the top scale names a parent cluster one scale up; top
//! clusters have none. Clusters live in a flat arena addressed by
//! `(scale, id)`, and the parent relation is stored as a slot index.
//!
//! Whether a cluster's landmarks actually flow into the declared parent is
//! not enforced on insertion. [`ClusterTree::check_cluster_consistency`]
//! audits it on demand through the hierarchy's areas of influence.
//!
//! ```rust,ignore
//! use hsne::{Cluster, ClusterTree};
//!
//! let mut tree = ClusterTree::for_hierarchy(&hierarchy);
//! let top = hierarchy.num_scales() - 1;
//! tree.add_cluster(top, Cluster::new(0, None, [0, 1, 2]))?;
//! tree.add_cluster(top - 1, Cluster::new(0, Some(0), [4, 7]))?;
//! let report = tree.check_tree_consistency(&hierarchy)?;
//! ```

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::{Error, Result};
use crate::hierarchy::{Hierarchy, Severity, ValidationIssue, ValidationReport};
use crate::pool::par_map;
use crate::sparse::AffinityRow;

/// A set of landmarks at one scale.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cluster {
    /// Identifier, unique within its scale.
    pub id: u32,
    /// Cluster one scale up, `None` at the top scale.
    pub parent_id: Option<u32>,
    /// Landmark indices at the cluster's scale.
    pub landmarks: BTreeSet<u32>,
    /// Free-form annotation.
    pub notes: String,
}

impl Cluster {
    /// Cluster without notes.
    pub fn new(id: u32, parent_id: Option<u32>, landmarks: impl IntoIterator<Item = u32>) -> Self {
        Self {
            id,
            parent_id,
            landmarks: landmarks.into_iter().collect(),
            notes: String::new(),
        }
    }

    /// Attach an annotation.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

#[derive(Debug, Clone)]
struct Slot {
    cluster: Cluster,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Outcome of [`ClusterTree::check_cluster_consistency`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAudit {
    /// Scale of the audited cluster.
    pub scale: usize,
    /// Id of the audited cluster.
    pub id: u32,
    /// Declared parent.
    pub parent_id: Option<u32>,
    /// Mass reaching each cluster one scale up, in insertion order.
    pub influence: Vec<(u32, f32)>,
    /// Mass reaching landmarks outside every cluster.
    pub unclustered: f32,
    /// Cluster receiving strictly more mass than the unclustered share and
    /// every other cluster, if any.
    pub destination: Option<u32>,
    /// True when `destination` equals the declared parent.
    pub valid: bool,
}

/// Deepest cluster a data point falls in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Association {
    /// Scale of the cluster.
    pub scale: usize,
    /// Cluster id, `None` if no top-scale cluster wins the point.
    pub cluster: Option<u32>,
    /// Share of the point's influence held by the cluster.
    pub influence: f32,
}

/// Arena of clusters over the scales of a hierarchy.
#[derive(Debug, Clone, Default)]
pub struct ClusterTree {
    slots: Vec<Option<Slot>>,
    index: HashMap<(usize, u32), usize>,
    /// Live slots per scale, in insertion order.
    levels: Vec<Vec<usize>>,
}

impl ClusterTree {
    /// Empty tree with `num_scales` levels.
    pub fn new(num_scales: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            levels: vec![Vec::new(); num_scales],
        }
    }

    /// Empty tree with one level per scale of `hierarchy`.
    pub fn for_hierarchy<R: AffinityRow>(hierarchy: &Hierarchy<R>) -> Self {
        Self::new(hierarchy.num_scales())
    }

    /// Number of levels.
    pub fn num_scales(&self) -> usize {
        self.levels.len()
    }

    /// Number of clusters over all scales.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if no cluster is stored.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn check_scale(&self, scale: usize) -> Result<()> {
        if scale >= self.levels.len() {
            return Err(Error::IndexOutOfRange {
                what: "scale",
                index: scale,
                len: self.levels.len(),
            });
        }
        Ok(())
    }

    fn slot(&self, i: usize) -> Option<&Slot> {
        self.slots.get(i).and_then(Option::as_ref)
    }

    fn live(&self, scale: usize) -> impl Iterator<Item = &Slot> + '_ {
        self.levels[scale].iter().filter_map(|&i| self.slot(i))
    }

    fn is_top(&self, scale: usize) -> bool {
        scale + 1 == self.levels.len()
    }

    /// Insert `cluster` at `scale`.
    ///
    /// Fails on a duplicate id, on a parent at the top scale, on a missing
    /// parent below it, and on a parent id absent from `scale + 1`.
    pub fn add_cluster(&mut self, scale: usize, cluster: Cluster) -> Result<()> {
        self.check_scale(scale)?;
        if self.index.contains_key(&(scale, cluster.id)) {
            return Err(Error::precondition(format!(
                "cluster {} already exists at scale {scale}",
                cluster.id
            )));
        }
        let parent = match (self.is_top(scale), cluster.parent_id) {
            (true, None) => None,
            (true, Some(_)) => {
                return Err(Error::precondition("top-scale clusters cannot have a parent"));
            }
            (false, None) => {
                return Err(Error::precondition(format!(
                    "cluster {} at scale {scale} needs a parent",
                    cluster.id
                )));
            }
            (false, Some(p)) => match self.index.get(&(scale + 1, p)) {
                Some(&slot) => Some(slot),
                None => {
                    return Err(Error::precondition(format!(
                        "parent cluster {p} does not exist at scale {}",
                        scale + 1
                    )));
                }
            },
        };

        let slot = self.slots.len();
        self.index.insert((scale, cluster.id), slot);
        self.levels[scale].push(slot);
        if let Some(Some(p)) = parent.and_then(|p| self.slots.get_mut(p)) {
            p.children.push(slot);
        }
        self.slots.push(Some(Slot {
            cluster,
            parent,
            children: Vec::new(),
        }));
        Ok(())
    }

    /// Remove a cluster that has no children and return it.
    pub fn remove_cluster(&mut self, scale: usize, id: u32) -> Result<Cluster> {
        self.check_scale(scale)?;
        let slot = *self
            .index
            .get(&(scale, id))
            .ok_or_else(|| Error::precondition(format!("no cluster {id} at scale {scale}")))?;
        if self.slot(slot).is_some_and(|s| !s.children.is_empty()) {
            return Err(Error::precondition(format!(
                "cluster {id} at scale {scale} still has children"
            )));
        }
        let removed = self.slots[slot]
            .take()
            .ok_or_else(|| Error::Other(format!("stale slot for cluster {id}")))?;
        self.index.remove(&(scale, id));
        self.levels[scale].retain(|&i| i != slot);
        if let Some(Some(parent)) = removed.parent.and_then(|p| self.slots.get_mut(p)) {
            parent.children.retain(|&c| c != slot);
        }
        Ok(removed.cluster)
    }

    /// Smallest id not used at `scale`.
    pub fn free_cluster_id(&self, scale: usize) -> Result<u32> {
        self.check_scale(scale)?;
        let used: BTreeSet<u32> = self.live(scale).map(|s| s.cluster.id).collect();
        Ok((0..).find(|i| !used.contains(i)).unwrap_or(u32::MAX))
    }

    /// True if `id` exists at `scale`.
    pub fn has_cluster(&self, scale: usize, id: u32) -> bool {
        self.index.contains_key(&(scale, id))
    }

    /// Cluster `id` at `scale`.
    pub fn cluster(&self, scale: usize, id: u32) -> Result<&Cluster> {
        self.check_scale(scale)?;
        self.index
            .get(&(scale, id))
            .and_then(|&i| self.slot(i))
            .map(|s| &s.cluster)
            .ok_or_else(|| Error::precondition(format!("no cluster {id} at scale {scale}")))
    }

    /// Clusters at `scale`, in insertion order.
    pub fn clusters(&self, scale: usize) -> Result<Vec<&Cluster>> {
        self.check_scale(scale)?;
        Ok(self.live(scale).map(|s| &s.cluster).collect())
    }

    /// Children of cluster `id` at `scale`, in insertion order.
    pub fn children(&self, scale: usize, id: u32) -> Result<Vec<&Cluster>> {
        self.check_scale(scale)?;
        let slot = self
            .index
            .get(&(scale, id))
            .and_then(|&i| self.slot(i))
            .ok_or_else(|| Error::precondition(format!("no cluster {id} at scale {scale}")))?;
        Ok(slot
            .children
            .iter()
            .filter_map(|&c| self.slot(c))
            .map(|s| &s.cluster)
            .collect())
    }

    fn check_matches<R: AffinityRow>(&self, hierarchy: &Hierarchy<R>) -> Result<()> {
        if hierarchy.num_scales() != self.num_scales() {
            return Err(Error::DimensionMismatch {
                expected: hierarchy.num_scales(),
                found: self.num_scales(),
            });
        }
        Ok(())
    }

    /// Check where the mass of cluster `id` at `scale` goes one scale up.
    ///
    /// Each landmark's area of influence is split over the clusters of
    /// `scale + 1` (counted once per containing cluster) or the unclustered
    /// remainder. The cluster is valid when the destination receiving the
    /// most mass is its declared parent. Top-scale clusters are always
    /// valid.
    pub fn check_cluster_consistency<R: AffinityRow>(
        &self,
        hierarchy: &Hierarchy<R>,
        scale: usize,
        id: u32,
    ) -> Result<ClusterAudit> {
        self.check_matches(hierarchy)?;
        let cluster = self.cluster(scale, id)?;
        let mut audit = ClusterAudit {
            scale,
            id,
            parent_id: cluster.parent_id,
            influence: Vec::new(),
            unclustered: 0.0,
            destination: None,
            valid: true,
        };
        if self.is_top(scale) {
            return Ok(audit);
        }

        let aoi = hierarchy.scale(scale + 1)?.area_of_influence();
        let upper: Vec<&Cluster> = self.live(scale + 1).map(|s| &s.cluster).collect();
        let mut mass = vec![0.0f64; upper.len()];
        let mut unclustered = 0.0f64;
        for &e in &cluster.landmarks {
            let row = aoi.get(e as usize).ok_or(Error::IndexOutOfRange {
                what: "cluster landmark",
                index: e as usize,
                len: aoi.len(),
            })?;
            for &(l, p) in row.entries().iter() {
                let mut found = false;
                for (m, c) in mass.iter_mut().zip(&upper) {
                    if c.landmarks.contains(&l) {
                        *m += f64::from(p);
                        found = true;
                    }
                }
                if !found {
                    unclustered += f64::from(p);
                }
            }
        }

        let mut best = unclustered;
        for (&m, c) in mass.iter().zip(&upper) {
            if m > best {
                best = m;
                audit.destination = Some(c.id);
            }
        }
        audit.influence = upper.iter().zip(&mass).map(|(c, &m)| (c.id, m as f32)).collect();
        audit.unclustered = unclustered as f32;
        audit.valid = audit.destination == cluster.parent_id;

        hierarchy.logger().message(&format!(
            "cluster {id} at scale {scale} (parent {:?}, {}): destination {:?}, unclustered {:.4} => {}",
            cluster.parent_id,
            cluster.notes,
            audit.destination,
            audit.unclustered,
            if audit.valid { "valid" } else { "INVALID" }
        ));
        Ok(audit)
    }

    /// Audit every cluster, top scale first.
    ///
    /// Clusters whose mass does not reach their parent, and clusters naming
    /// landmarks outside their scale, are reported as errors.
    pub fn check_tree_consistency<R: AffinityRow>(
        &self,
        hierarchy: &Hierarchy<R>,
    ) -> Result<ValidationReport> {
        self.check_matches(hierarchy)?;
        let mut report = ValidationReport::new();
        for s in (0..self.num_scales()).rev() {
            for slot in self.live(s) {
                let id = slot.cluster.id;
                match self.check_cluster_consistency(hierarchy, s, id) {
                    Ok(a) if a.valid => {}
                    Ok(a) => report.add(
                        ValidationIssue::new(Severity::Error, "cluster mass does not reach its parent")
                            .with_scale(s)
                            .with_index(id as usize)
                            .with_context(format!(
                                "parent {:?}, destination {:?}",
                                a.parent_id, a.destination
                            )),
                    ),
                    Err(e) => report.add(
                        ValidationIssue::new(Severity::Error, e.to_string())
                            .with_scale(s)
                            .with_index(id as usize),
                    ),
                }
            }
        }
        debug!(issues = report.issues.len(), "cluster tree audited");
        Ok(report)
    }

    /// Deepest cluster data point `point` belongs to.
    ///
    /// Starting from the top-scale clusters, the point's normalized
    /// influence is split over the candidate clusters and the unclustered
    /// remainder. The descent follows the winning cluster into its children
    /// and stops when the remainder wins or a scale has no candidates.
    pub fn point_to_cluster_association<R: AffinityRow>(
        &self,
        hierarchy: &Hierarchy<R>,
        point: usize,
    ) -> Result<Association> {
        self.check_matches(hierarchy)?;
        let influence = hierarchy.influence_on_data_point(point, 0.0, true)?;
        let top = self.num_scales().saturating_sub(1);
        let mut result = Association {
            scale: top,
            cluster: None,
            influence: 1.0,
        };
        let mut candidates: Vec<usize> = self.levels.get(top).cloned().unwrap_or_default();

        for s in (0..self.num_scales()).rev() {
            if candidates.is_empty() {
                break;
            }
            let live: Vec<&Slot> = candidates.iter().filter_map(|&i| self.slot(i)).collect();
            let mut mass = vec![0.0f64; live.len()];
            let mut unclustered = 0.0f64;
            for (&l, &v) in &influence[s] {
                let mut found = false;
                for (m, slot) in mass.iter_mut().zip(&live) {
                    if slot.cluster.landmarks.contains(&l) {
                        *m += f64::from(v);
                        found = true;
                    }
                }
                if !found {
                    unclustered += f64::from(v);
                }
            }

            let mut best = unclustered;
            let mut winner: Option<&Slot> = None;
            for (&m, &slot) in mass.iter().zip(&live) {
                if m > best {
                    best = m;
                    winner = Some(slot);
                }
            }
            let Some(winner) = winner else {
                break;
            };
            result = Association {
                scale: s,
                cluster: Some(winner.cluster.id),
                influence: best as f32,
            };
            candidates = winner.children.clone();
        }
        Ok(result)
    }

    /// [`ClusterTree::point_to_cluster_association`] for every data point.
    pub fn points_to_cluster_association<R: AffinityRow>(
        &self,
        hierarchy: &Hierarchy<R>,
    ) -> Result<Vec<Association>> {
        self.check_matches(hierarchy)?;
        let n = hierarchy.num_data_points();
        hierarchy
            .pool()
            .install(|| par_map(n, |i| self.point_to_cluster_association(hierarchy, i)))
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hierarchy::Scale;
    use crate::sparse::SortedRow;
    use crate::HsneParams;

    fn row(e: &[(u32, f32)]) -> SortedRow {
        e.iter().copied().collect()
    }

    /// Four points; scale-1 landmarks are points 1 and 2; one scale-2
    /// landmark.
    fn hierarchy() -> Hierarchy {
        let s0 = Scale::first(vec![
            row(&[(1, 1.0)]),
            row(&[(0, 0.5), (2, 0.5)]),
            row(&[(1, 0.5), (3, 0.5)]),
            row(&[(2, 1.0)]),
        ]);
        let s1 = Scale {
            landmark_to_original_data_idx: vec![1, 2],
            landmark_to_previous_scale_idx: vec![1, 2],
            previous_scale_to_landmark_idx: vec![-1, 0, 1, -1],
            landmark_weight: vec![2.0, 2.0],
            transition_matrix: vec![row(&[(1, 1.0)]), row(&[(0, 1.0)])],
            area_of_influence: vec![
                row(&[(0, 1.0)]),
                row(&[(0, 0.5), (1, 0.5)]),
                row(&[(0, 0.25), (1, 0.75)]),
                row(&[(1, 1.0)]),
            ],
        };
        let s2 = Scale {
            landmark_to_original_data_idx: vec![2],
            landmark_to_previous_scale_idx: vec![1],
            previous_scale_to_landmark_idx: vec![-1, 0],
            landmark_weight: vec![4.0],
            transition_matrix: vec![SortedRow::new()],
            area_of_influence: vec![row(&[(0, 0.5)]), row(&[(0, 1.0)])],
        };
        Hierarchy::from_scales(HsneParams::new().with_seed(0), vec![s0, s1, s2]).unwrap()
    }

    /// Top cluster 0 {0}; scale 1: 0 {0}, 1 {1}; scale 0: 5 {0,1} under 0,
    /// 6 {3} under 0 (wrong, 3 flows to landmark 1), 7 {2} under 1.
    fn tree() -> ClusterTree {
        let mut t = ClusterTree::new(3);
        t.add_cluster(2, Cluster::new(0, None, [0]).with_notes("all")).unwrap();
        t.add_cluster(1, Cluster::new(0, Some(0), [0])).unwrap();
        t.add_cluster(1, Cluster::new(1, Some(0), [1])).unwrap();
        t.add_cluster(0, Cluster::new(5, Some(0), [0, 1])).unwrap();
        t.add_cluster(0, Cluster::new(6, Some(0), [3])).unwrap();
        t.add_cluster(0, Cluster::new(7, Some(1), [2])).unwrap();
        t
    }

    #[test]
    fn add_cluster_enforces_links() {
        let mut t = tree();
        assert!(t.add_cluster(1, Cluster::new(0, Some(0), [1])).unwrap_err().is_precondition());
        assert!(t.add_cluster(2, Cluster::new(3, Some(0), [0])).unwrap_err().is_precondition());
        assert!(t.add_cluster(1, Cluster::new(3, None, [0])).unwrap_err().is_precondition());
        assert!(t.add_cluster(1, Cluster::new(3, Some(9), [0])).unwrap_err().is_precondition());
        assert!(matches!(
            t.add_cluster(3, Cluster::new(0, None, [0])),
            Err(Error::IndexOutOfRange { what: "scale", .. })
        ));
        assert_eq!(t.len(), 6);
    }

    #[test]
    fn free_ids_fill_gaps() {
        let mut t = tree();
        assert_eq!(t.free_cluster_id(0).unwrap(), 0);
        assert_eq!(t.free_cluster_id(1).unwrap(), 2);
        t.remove_cluster(0, 6).unwrap();
        t.add_cluster(0, Cluster::new(0, Some(1), [3])).unwrap();
        assert_eq!(t.free_cluster_id(0).unwrap(), 1);
    }

    #[test]
    fn remove_rejects_clusters_with_children() {
        let mut t = tree();
        assert!(t.remove_cluster(1, 1).unwrap_err().is_precondition());
        let removed = t.remove_cluster(0, 7).unwrap();
        assert_eq!(removed.landmarks, BTreeSet::from([2]));
        assert!(!t.has_cluster(0, 7));
        assert!(t.children(1, 1).unwrap().is_empty());
        t.remove_cluster(1, 1).unwrap();
        assert_eq!(t.clusters(1).unwrap().len(), 1);
        assert!(t.cluster(1, 1).is_err());
    }

    #[test]
    fn audit_follows_area_of_influence() {
        let h = hierarchy();
        let t = tree();

        let top = t.check_cluster_consistency(&h, 2, 0).unwrap();
        assert!(top.valid);
        assert_eq!(top.destination, None);

        let c5 = t.check_cluster_consistency(&h, 0, 5).unwrap();
        assert_eq!(c5.influence, vec![(0, 1.5), (1, 0.5)]);
        assert_eq!(c5.destination, Some(0));
        assert!(c5.valid);

        let c6 = t.check_cluster_consistency(&h, 0, 6).unwrap();
        assert_eq!(c6.destination, Some(1));
        assert!(!c6.valid);

        let report = t.check_tree_consistency(&h).unwrap();
        assert!(!report.is_healthy());
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].index, Some(6));
    }

    #[test]
    fn unclustered_mass_blocks_destination() {
        let h = hierarchy();
        let mut t = ClusterTree::new(3);
        t.add_cluster(2, Cluster::new(0, None, [0u32; 0])).unwrap();
        t.add_cluster(1, Cluster::new(0, Some(0), [0, 1])).unwrap();
        let audit = t.check_cluster_consistency(&h, 1, 0).unwrap();
        assert_eq!(audit.destination, None);
        assert!((audit.unclustered - 1.5).abs() < 1e-6);
        assert!(!audit.valid);
    }

    #[test]
    fn points_descend_to_deepest_cluster() {
        let h = hierarchy();
        let t = tree();
        let all = t.points_to_cluster_association(&h).unwrap();
        assert_eq!(all.len(), 4);

        assert_eq!((all[0].scale, all[0].cluster), (0, Some(5)));
        // Point 3 flows to scale-1 cluster 1, whose only child excludes it.
        assert_eq!((all[3].scale, all[3].cluster), (1, Some(1)));
        assert_eq!((all[2].scale, all[2].cluster), (0, Some(7)));

        let p2 = t.point_to_cluster_association(&h, 2).unwrap();
        assert_eq!(p2, all[2]);
    }

    #[test]
    fn empty_tree_leaves_points_unassigned() {
        let h = hierarchy();
        let t = ClusterTree::for_hierarchy(&h);
        let a = t.point_to_cluster_association(&h, 1).unwrap();
        assert_eq!(a, Association { scale: 2, cluster: None, influence: 1.0 });
        assert!(matches!(
            ClusterTree::new(2).point_to_cluster_association(&h, 1),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
