#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use ndarray::Array2;
    use petgraph::graph::UnGraph;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::sparse::row_sum;
    use crate::{
        Aggregation, AffinityRow, Cluster, ClusterTree, Error, ExactKnn, HealthCheck, Hierarchy,
        HsneParams, LandmarkPolicy, Result, SortedRow,
    };

    /// Three well separated squares of `per` points each.
    fn blobs(per: usize, seed: u64) -> Array2<f32> {
        let centers = [(0.0f32, 0.0f32), (50.0, 0.0), (0.0, 50.0)];
        let mut rng = StdRng::seed_from_u64(seed);
        let mut values = Vec::with_capacity(per * 3 * 2);
        for &(cx, cy) in &centers {
            for _ in 0..per {
                values.push(cx + rng.random_range(-1.0f32..1.0));
                values.push(cy + rng.random_range(-1.0f32..1.0));
            }
        }
        Array2::from_shape_vec((per * 3, 2), values).unwrap()
    }

    /// Uniform points in the unit cube.
    fn cloud(n: usize, seed: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let values = (0..n * 3).map(|_| rng.random_range(0.0f32..1.0)).collect();
        Array2::from_shape_vec((n, 3), values).unwrap()
    }

    fn ring<R: AffinityRow>(n: u32) -> Vec<R> {
        (0..n)
            .map(|i| {
                let mut r = R::default();
                *r.at((i + n - 1) % n) += 0.5;
                *r.at((i + 1) % n) += 0.5;
                r
            })
            .collect()
    }

    fn params(seed: u64) -> HsneParams {
        HsneParams::new()
            .with_seed(seed)
            .with_num_neighbors(10)
            .with_landmark_policy(LandmarkPolicy::fixed_ratio(0.2))
    }

    fn blob_hierarchy(seed: u64) -> Result<Hierarchy> {
        let data = blobs(60, seed);
        let mut h = Hierarchy::new(params(seed))?;
        h.initialize_from_vectors(data.view(), &ExactKnn)?;
        h.add_scale()?;
        Ok(h)
    }

    #[test]
    fn vectors_build_a_healthy_multiscale_hierarchy() -> Result<()> {
        let mut h = blob_hierarchy(5)?;
        assert_eq!(h.scale(1)?.len(), 36);

        let stats = h.statistics().clone();
        assert!(stats.aoi_walks.is_some());
        assert!(stats.total.is_some());

        h.add_scale()?;
        let sizes: Vec<usize> = h.scales().iter().map(|s| s.len()).collect();
        assert_eq!(sizes, vec![180, 36, 7]);

        let report = h.health_check();
        assert!(report.is_healthy(), "{}", report);
        Ok(())
    }

    #[test]
    fn scale_zero_rows_are_stochastic() -> Result<()> {
        let h = blob_hierarchy(2)?;
        for (i, row) in h.scale(0)?.transition_matrix().iter().enumerate() {
            assert!(row.len() <= 10);
            assert_eq!(row.find(i as u32), None);
            assert!((row_sum(row) - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn areas_of_influence_are_sub_stochastic() -> Result<()> {
        let h = blob_hierarchy(3)?;
        let exact = h.statistics().aoi_failed_walks == Some(0);
        for row in h.scale(1)?.area_of_influence() {
            let sum = row_sum(row);
            assert!(sum <= 1.0 + 1e-5);
            if exact {
                assert!((sum - 1.0).abs() < 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn coarse_transition_rows_sum_to_one() -> Result<()> {
        let h = blob_hierarchy(4)?;
        let t = h.scale(1)?.transition_matrix();
        let empty = t.iter().filter(|r| r.is_empty()).count();
        assert_eq!(Some(empty), h.statistics().empty_transition_rows);
        for row in t.iter().filter(|r| !r.is_empty()) {
            assert!((row_sum(row) - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn separated_blobs_stay_separated() -> Result<()> {
        let h = blob_hierarchy(6)?;
        let s1 = h.scale(1)?;
        let blob = |l: u32| s1.landmark_to_original_data_idx()[l as usize] / 60;
        for (l, row) in s1.transition_matrix().iter().enumerate() {
            for &(l2, _) in row.entries().iter() {
                assert_eq!(blob(l as u32), blob(l2));
            }
        }
        Ok(())
    }

    #[test]
    fn two_pairs_have_no_cross_cluster_mass() -> Result<()> {
        let pairs: Vec<SortedRow> = vec![
            [(1, 1.0)].into_iter().collect(),
            [(0, 1.0)].into_iter().collect(),
            [(3, 1.0)].into_iter().collect(),
            [(2, 1.0)].into_iter().collect(),
        ];
        let mut h: Hierarchy = Hierarchy::new(
            HsneParams::new()
                .with_seed(17)
                .with_landmark_policy(LandmarkPolicy::fixed_ratio(0.5)),
        )?;
        h.initialize_from_similarities(pairs)?;
        let s1 = h.add_scale()?;
        assert_eq!(s1.len(), 2);
        let first = s1.landmark_to_original_data_idx()[0] / 2;
        let second = s1.landmark_to_original_data_idx()[1] / 2;
        assert_ne!(first, second);
        for row in s1.transition_matrix() {
            assert!(row.is_empty());
        }
        Ok(())
    }

    #[test]
    fn fixed_seed_and_workers_are_reproducible() -> Result<()> {
        let build = |aggregation: Aggregation, threads: usize| -> Result<Hierarchy> {
            let mut h = Hierarchy::new(
                params(11)
                    .with_aggregation(aggregation)
                    .with_num_threads(threads),
            )?;
            h.initialize_from_vectors(blobs(40, 11).view(), &ExactKnn)?;
            h.add_scale()?;
            h.add_scale()?;
            Ok(h)
        };

        let a = build(Aggregation::out_of_core(), 4)?;
        let b = build(Aggregation::out_of_core(), 4)?;
        assert_eq!(a.scales(), b.scales());

        let a = build(Aggregation::in_core(), 1)?;
        let b = build(Aggregation::in_core(), 1)?;
        assert_eq!(a.scales(), b.scales());

        // Lock order changes between runs; the matrices must not.
        for _ in 0..3 {
            let c = build(Aggregation::in_core(), 4)?;
            assert_eq!(a.scales(), c.scales());
        }
        Ok(())
    }

    #[test]
    fn half_of_a_dense_cloud_becomes_landmarks() -> Result<()> {
        // Most shake-off paths cross a landmark long before half the cloud
        // is selected.
        let data = cloud(400, 21);
        let mut h: Hierarchy = Hierarchy::new(
            HsneParams::new()
                .with_seed(21)
                .with_num_neighbors(10)
                .with_landmark_policy(LandmarkPolicy::fixed_ratio(0.5)),
        )?;
        h.initialize_from_vectors(data.view(), &ExactKnn)?;
        let s1 = h.add_scale()?;
        assert_eq!(s1.len(), 200);
        let mut picked = s1.landmark_to_previous_scale_idx().to_vec();
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), 200);
        assert!(h.health_check().is_healthy());
        Ok(())
    }

    #[test]
    fn default_policy_builds_through_stationary_sampling() -> Result<()> {
        let data = blobs(150, 31);
        let n = data.nrows();
        let mut stacked = 0;
        for seed in 0..8 {
            let mut h: Hierarchy = Hierarchy::new(
                HsneParams::default()
                    .with_seed(seed)
                    .with_num_neighbors(10),
            )?;
            assert_eq!(h.params().landmark_policy, LandmarkPolicy::stationary());
            h.initialize_from_vectors(data.view(), &ExactKnn)?;

            let s1 = h.add_scale()?.len();
            assert!(s1 > 0 && s1 < n);
            let stats = h.statistics().clone();
            assert!(stats.mcmc_sampling.is_some());
            assert!(stats.landmark_selection.is_none());
            assert_eq!(stats.landmark_selection_walks, Some(n as u64 * 10));
            assert_eq!(stats.aoi_walks, Some(n as u64 * 100));
            let report = h.health_check();
            assert!(report.is_healthy(), "{report}");

            // Scale 1 is small, so the stationary threshold may keep nobody.
            match h.add_scale().map(|s| s.len()) {
                Ok(s2) => {
                    assert!(s2 <= s1);
                    assert_eq!(h.statistics().landmark_selection_walks, Some(s1 as u64 * 10));
                    let report = h.health_check();
                    assert!(report.is_healthy(), "{report}");
                    assert_eq!(report.scale_sizes.len(), 3);
                    stacked += 1;
                }
                Err(e) => {
                    assert!(matches!(e, Error::NoLandmarks { previous_scale_size } if previous_scale_size == s1));
                    assert_eq!(h.num_scales(), 2);
                }
            }
        }
        assert!(stacked > 0);
        Ok(())
    }

    #[test]
    fn strategies_pick_the_same_landmarks() -> Result<()> {
        let build = |aggregation: Aggregation| -> Result<Hierarchy> {
            let mut h = Hierarchy::new(params(8).with_aggregation(aggregation))?;
            h.initialize_from_vectors(blobs(40, 8).view(), &ExactKnn)?;
            h.add_scale()?;
            Ok(h)
        };
        let a = build(Aggregation::in_core())?;
        let b = build(Aggregation::out_of_core())?;
        assert_eq!(
            a.scale(1)?.landmark_to_previous_scale_idx(),
            b.scale(1)?.landmark_to_previous_scale_idx()
        );
        Ok(())
    }

    fn ring_hierarchy<R: AffinityRow>() -> Result<Hierarchy<R>> {
        let mut h = Hierarchy::new(
            HsneParams::new()
                .with_seed(29)
                .with_landmark_policy(LandmarkPolicy::fixed_ratio(0.05))
                .with_aggregation(Aggregation::out_of_core()),
        )?;
        h.initialize_from_similarities(ring(200))?;
        h.add_scale()?;
        Ok(h)
    }

    #[test]
    fn row_backings_agree() -> Result<()> {
        let sorted = ring_hierarchy::<SortedRow>()?;
        let btree = ring_hierarchy::<BTreeMap<u32, f32>>()?;
        let hash = ring_hierarchy::<HashMap<u32, f32>>()?;

        let (s, b, h) = (sorted.scale(1)?, btree.scale(1)?, hash.scale(1)?);
        assert_eq!(s.landmark_to_previous_scale_idx(), b.landmark_to_previous_scale_idx());
        assert_eq!(s.landmark_to_previous_scale_idx(), h.landmark_to_previous_scale_idx());
        assert_eq!(s.landmark_weight(), b.landmark_weight());
        assert_eq!(s.landmark_weight(), h.landmark_weight());
        for i in 0..s.len() {
            let want = s.transition_matrix()[i].entries();
            assert_eq!(want, b.transition_matrix()[i].entries());
            assert_eq!(want, h.transition_matrix()[i].entries());
        }
        Ok(())
    }

    #[test]
    fn graph_input_matches_similarities() -> Result<()> {
        let mut g = UnGraph::<(), f32>::new_undirected();
        let nodes: Vec<_> = (0..200).map(|_| g.add_node(())).collect();
        for i in 0..200 {
            g.add_edge(nodes[i], nodes[(i + 1) % 200], 1.0);
        }
        let mut from_graph: Hierarchy = Hierarchy::new(
            HsneParams::new()
                .with_seed(29)
                .with_landmark_policy(LandmarkPolicy::fixed_ratio(0.05))
                .with_aggregation(Aggregation::out_of_core()),
        )?;
        from_graph.initialize_from_graph(&g)?;
        from_graph.add_scale()?;

        let direct = ring_hierarchy::<SortedRow>()?;
        assert_eq!(from_graph.scales(), direct.scales());
        Ok(())
    }

    #[test]
    fn interpolation_weights_cover_every_point() -> Result<()> {
        let mut h = blob_hierarchy(9)?;
        h.add_scale()?;
        let w = h.interpolation_weights(2)?;
        assert_eq!(w.len(), 180);
        for row in &w {
            assert!(row_sum(row) <= 1.0 + 1e-4);
        }
        let subset = h.interpolation_weights_for(&[0, 179], 2)?;
        assert_eq!(subset[0].entries(), w[0].entries());
        assert_eq!(subset[1].entries(), w[179].entries());
        Ok(())
    }

    #[test]
    fn clusters_over_a_built_hierarchy() -> Result<()> {
        let h = blob_hierarchy(12)?;
        let s1 = h.scale(1)?;
        let mut tree = ClusterTree::for_hierarchy(&h);
        // One top cluster per blob.
        for b in 0..3u32 {
            let members = (0..s1.len() as u32)
                .filter(|&l| s1.landmark_to_original_data_idx()[l as usize] / 60 == b);
            tree.add_cluster(1, Cluster::new(b, None, members))?;
        }
        let report = tree.check_tree_consistency(&h)?;
        assert!(report.is_healthy());

        let assoc = tree.points_to_cluster_association(&h)?;
        for (i, a) in assoc.iter().enumerate() {
            if let Some(c) = a.cluster {
                assert_eq!(c, i as u32 / 60);
                assert_eq!(a.scale, 1);
            }
        }
        Ok(())
    }
}
