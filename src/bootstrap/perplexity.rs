//! Gaussian kernel calibrated to a target perplexity.

/// Outcome of [`gaussian_with_perplexity`].
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Normalized affinities, same length as the input distances.
    pub probabilities: Vec<f32>,
    /// Final precision of the kernel.
    pub beta: f64,
    /// False if the search ran out of iterations and fell back to uniform.
    pub converged: bool,
}

/// Turn squared distances into a distribution `p_j ∝ exp(-beta * d_j)` whose
/// perplexity is `perplexity`, by bisection on `beta` starting at 1.
///
/// Position `ignore` (the point itself) gets probability zero and is left
/// out of the entropy. If no `beta` within `tolerance` is found in
/// `max_iterations` steps the result is uniform over the other positions.
pub fn gaussian_with_perplexity(
    sq_distances: &[f32],
    perplexity: f64,
    max_iterations: usize,
    tolerance: f64,
    ignore: Option<usize>,
) -> Calibration {
    let n = sq_distances.len();
    let counted = n - usize::from(ignore.is_some_and(|i| i < n));
    if counted == 0 {
        return Calibration {
            probabilities: vec![0.0; n],
            beta: 1.0,
            converged: false,
        };
    }

    let target = perplexity.ln();
    let mut beta = 1.0f64;
    let mut min_beta: Option<f64> = None;
    let mut max_beta: Option<f64> = None;
    let mut kernel = vec![0.0f64; n];

    for _ in 0..max_iterations {
        let mut sum = f64::MIN_POSITIVE;
        for (j, (&d, k)) in sq_distances.iter().zip(kernel.iter_mut()).enumerate() {
            if Some(j) == ignore {
                *k = 0.0;
                continue;
            }
            *k = (-beta * f64::from(d)).exp();
            sum += *k;
        }

        let weighted: f64 = sq_distances
            .iter()
            .zip(&kernel)
            .map(|(&d, &k)| f64::from(d) * k)
            .sum();
        let entropy = beta * weighted / sum + sum.ln();
        let diff = entropy - target;

        if diff.abs() < tolerance {
            return Calibration {
                probabilities: kernel.iter().map(|&k| (k / sum) as f32).collect(),
                beta,
                converged: true,
            };
        }

        if diff > 0.0 {
            min_beta = Some(beta);
            beta = match max_beta {
                Some(hi) => (beta + hi) / 2.0,
                None => beta * 2.0,
            };
        } else {
            max_beta = Some(beta);
            beta = match min_beta {
                Some(lo) => (beta + lo) / 2.0,
                None => beta / 2.0,
            };
        }
    }

    let uniform = 1.0 / counted as f32;
    let probabilities = (0..n)
        .map(|j| if Some(j) == ignore { 0.0 } else { uniform })
        .collect();
    Calibration {
        probabilities,
        beta,
        converged: false,
    }
}
