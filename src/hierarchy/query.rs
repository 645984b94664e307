//! Cross-scale influence queries.
//!
//! Influence travels upward by chaining areas of influence: if data point
//! `i` belongs to landmark `a` of scale 1 with weight `p`, and `a` belongs to
//! landmark `b` of scale 2 with weight `q`, then `i` belongs to `b` with
//! weight `p·q` (summed over every path). Every query here is a variant of
//! that product, run in parallel over its outer index.

use std::collections::{BTreeMap, HashSet};

use super::Hierarchy;
use crate::error::{Error, Result};
use crate::pool::par_map;
use crate::sparse::AffinityRow;

type Influence = BTreeMap<u32, f64>;

impl<R: AffinityRow> Hierarchy<R> {
    fn check_scale(&self, s: usize) -> Result<()> {
        if s >= self.num_scales() {
            return Err(Error::IndexOutOfRange {
                what: "scale",
                index: s,
                len: self.num_scales(),
            });
        }
        Ok(())
    }

    fn check_indices(&self, s: usize, idx: &[u32]) -> Result<()> {
        let len = self.scales[s].len();
        match idx.iter().find(|&&i| i as usize >= len) {
            Some(&bad) => Err(Error::IndexOutOfRange {
                what: "landmark",
                index: bad as usize,
                len,
            }),
            None => Ok(()),
        }
    }

    fn aoi_row(&self, s: usize, vertex: u32) -> Influence {
        self.scales[s].area_of_influence[vertex as usize]
            .entries()
            .iter()
            .map(|&(k, v)| (k, f64::from(v)))
            .collect()
    }

    /// Carry `current` (influence over scale `from` landmarks) up to scale
    /// `to`. Entries below `threshold` do not propagate.
    fn lift(&self, mut current: Influence, from: usize, to: usize, threshold: f64) -> Influence {
        for s in from + 1..=to {
            let aoi = &self.scales[s].area_of_influence;
            let mut next = Influence::new();
            for (&l, &v) in &current {
                if v < threshold {
                    continue;
                }
                for &(l2, p) in aoi[l as usize].entries().iter() {
                    *next.entry(l2).or_insert(0.0) += v * f64::from(p);
                }
            }
            current = next;
        }
        current
    }

    fn to_row(influence: Influence) -> R {
        let mut row = R::default();
        // Ascending keys, so sorted backings only ever append.
        for (k, v) in influence {
            if v > 0.0 {
                *row.at(k) = v as f32;
            }
        }
        row
    }

    /// Influence of every scale's landmarks on data point `dp`.
    ///
    /// Entry `s` maps scale-`s` landmarks to their influence; entry 0 is
    /// `{dp: 1}`. Landmarks (scale 1 and up) below `threshold` do not
    /// propagate further.
    /// With `normalized`, each scale's map is scaled to sum to 1.
    pub fn influence_on_data_point(
        &self,
        dp: usize,
        threshold: f32,
        normalized: bool,
    ) -> Result<Vec<BTreeMap<u32, f32>>> {
        let n = self.num_data_points();
        if dp >= n {
            return Err(Error::IndexOutOfRange {
                what: "data point",
                index: dp,
                len: n,
            });
        }
        let mut per_scale: Vec<Influence> = Vec::with_capacity(self.num_scales());
        per_scale.push(Influence::from([(dp as u32, 1.0)]));
        for s in 1..self.num_scales() {
            // The data point itself always propagates.
            let cut = if s == 1 { 0.0 } else { f64::from(threshold) };
            let mut next = self.lift(per_scale[s - 1].clone(), s - 1, s, cut);
            if normalized {
                let sum: f64 = next.values().sum();
                if sum > 0.0 {
                    next.values_mut().for_each(|v| *v /= sum);
                }
            }
            per_scale.push(next);
        }
        Ok(per_scale
            .into_iter()
            .map(|m| m.into_iter().map(|(k, v)| (k, v as f32)).collect())
            .collect())
    }

    /// Influence of scale-`scale` landmarks on every data point.
    ///
    /// Scale 0 gives identity rows.
    pub fn interpolation_weights(&self, scale: usize) -> Result<Vec<R>> {
        let all: Vec<u32> = (0..self.num_data_points() as u32).collect();
        self.interpolation_weights_for(&all, scale)
    }

    /// [`Hierarchy::interpolation_weights`] restricted to `points`.
    pub fn interpolation_weights_for(&self, points: &[u32], scale: usize) -> Result<Vec<R>> {
        self.check_scale(scale)?;
        self.check_indices(0, points)?;
        Ok(self.pool().install(|| {
            par_map(points.len(), |i| {
                let p = points[i];
                Self::to_row(self.lift(Influence::from([(p, 1.0)]), 0, scale, 0.0))
            })
        }))
    }

    /// Where scale-`orig` landmarks in `subset` land at scale `dest`.
    ///
    /// Row `i` holds the influence of scale-`dest` landmarks over
    /// `subset[i]`.
    pub fn stochastic_location_at_higher_scale(
        &self,
        orig: usize,
        dest: usize,
        subset: &[u32],
    ) -> Result<Vec<R>> {
        if dest <= orig {
            return Err(Error::precondition(format!(
                "destination scale {dest} is not above origin scale {orig}"
            )));
        }
        self.check_scale(dest)?;
        self.check_indices(orig, subset)?;
        Ok(self.pool().install(|| {
            par_map(subset.len(), |i| {
                let first = self.aoi_row(orig + 1, subset[i]);
                Self::to_row(self.lift(first, orig + 1, dest, 0.0))
            })
        }))
    }

    /// Total influence of the scale-`scale` landmarks in `selection` over
    /// every data point (bottom-up).
    ///
    /// At scale 0 the result is 1 on the selected points and 0 elsewhere.
    pub fn area_of_influence(&self, scale: usize, selection: &[u32]) -> Result<Vec<f32>> {
        self.check_scale(scale)?;
        self.check_indices(scale, selection)?;
        let n = self.num_data_points();
        if scale == 0 {
            let mut aoi = vec![0.0; n];
            for &p in selection {
                aoi[p as usize] = 1.0;
            }
            return Ok(aoi);
        }
        let selected: HashSet<u32> = selection.iter().copied().collect();
        Ok(self.pool().install(|| {
            par_map(n, |i| {
                let reached = self.lift(self.aoi_row(1, i as u32), 1, scale, 0.0);
                reached
                    .iter()
                    .filter(|(l, _)| selected.contains(*l))
                    .map(|(_, &v)| v)
                    .sum::<f64>() as f32
            })
        }))
    }

    /// Previous-scale vertices influenced by `selection` (scale-`scale`
    /// landmarks), with the summed influence. Only positive sums are kept.
    pub fn influenced_landmarks_in_previous_scale(
        &self,
        scale: usize,
        selection: &[u32],
    ) -> Result<BTreeMap<u32, f32>> {
        self.check_scale(scale)?;
        if scale == 0 {
            return Err(Error::precondition("scale 0 has no previous scale"));
        }
        self.check_indices(scale, selection)?;
        let selected: HashSet<u32> = selection.iter().copied().collect();
        let aoi = &self.scales[scale].area_of_influence;
        let sums = self.pool().install(|| {
            par_map(aoi.len(), |d| {
                aoi[d]
                    .entries()
                    .iter()
                    .filter(|(l, _)| selected.contains(l))
                    .map(|&(_, v)| f64::from(v))
                    .sum::<f64>()
            })
        });
        Ok(sums
            .into_iter()
            .enumerate()
            .filter(|&(_, p)| p > 0.0)
            .map(|(d, p)| (d as u32, p as f32))
            .collect())
    }

    /// Drill-down area of influence: descend from `selection` at `scale`,
    /// keeping at each level the previous-scale vertices whose influence
    /// from the current set exceeds `threshold`.
    ///
    /// Returns 1 for data points reached at scale 0, 0 elsewhere.
    pub fn area_of_influence_top_down(
        &self,
        scale: usize,
        selection: &[u32],
        threshold: f32,
    ) -> Result<Vec<f32>> {
        self.check_scale(scale)?;
        self.check_indices(scale, selection)?;
        let mut current = selection.to_vec();
        for s in (1..=scale).rev() {
            current = self
                .influenced_landmarks_in_previous_scale(s, &current)?
                .into_iter()
                .filter(|&(_, p)| p > threshold)
                .map(|(d, _)| d)
                .collect();
        }
        let mut aoi = vec![0.0; self.num_data_points()];
        for p in current {
            aoi[p as usize] = 1.0;
        }
        Ok(aoi)
    }
}
