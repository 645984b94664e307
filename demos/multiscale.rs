use std::sync::Arc;

use hsne::{
    io, Cluster, ClusterTree, ExactKnn, HealthCheck, Hierarchy, HsneParams, LandmarkPolicy,
    TracingLog,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // End-to-end: points -> scale 0 -> two coarser scales -> clusters -> file.
    //
    // Run with `RUST_LOG=hsne=info` to see the progress log.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Four noisy blobs in 3D.
    let centers = [[0.0, 0.0, 0.0], [20.0, 0.0, 0.0], [0.0, 20.0, 0.0], [0.0, 0.0, 20.0]];
    let per = 250;
    let mut rng = StdRng::seed_from_u64(1);
    let mut values = Vec::with_capacity(centers.len() * per * 3);
    for c in &centers {
        for _ in 0..per {
            for &x in c {
                values.push(x + rng.random_range(-2.0f32..2.0));
            }
        }
    }
    let points = Array2::from_shape_vec((centers.len() * per, 3), values)?;

    let params = HsneParams::new()
        .with_seed(7)
        .with_num_neighbors(15)
        .with_landmark_policy(LandmarkPolicy::fixed_ratio(0.1));
    let mut h: Hierarchy = Hierarchy::new(params.clone())?.with_logger(Arc::new(TracingLog));
    h.initialize_from_vectors(points.view(), &ExactKnn)?;
    h.add_scale()?;
    h.add_scale()?;

    for (s, scale) in h.scales().iter().enumerate() {
        println!(
            "scale {}: {} landmarks, {:.3} MB",
            s,
            scale.len(),
            scale.min_memory_occupation()
        );
    }
    println!("{}", h.health_check());

    // One top-level cluster per blob, named after the blob of its landmarks.
    let top = h.num_scales() - 1;
    let top_scale = h.scale(top)?;
    let mut tree = ClusterTree::for_hierarchy(&h);
    for b in 0..centers.len() as u32 {
        let members = (0..top_scale.len() as u32)
            .filter(|&l| top_scale.landmark_to_original_data_idx()[l as usize] / per as u32 == b);
        tree.add_cluster(top, Cluster::new(b, None, members).with_notes(format!("blob {b}")))?;
    }

    let assoc = tree.points_to_cluster_association(&h)?;
    let mut hits = vec![0usize; centers.len()];
    let mut correct = 0usize;
    for (i, a) in assoc.iter().enumerate() {
        if let Some(c) = a.cluster {
            hits[c as usize] += 1;
            if c as usize == i / per {
                correct += 1;
            }
        }
    }
    println!("points per cluster: {:?} ({} of {} in their own blob)", hits, correct, assoc.len());

    let path = std::env::temp_dir().join("multiscale.hsne");
    io::save_to_path(&h, &path)?;
    let back: Hierarchy = io::load_from_path(&path, params)?;
    println!("reloaded {} scales from {}", back.num_scales(), path.display());

    Ok(())
}
