use crate::error::RegistrationError;
use crate::types::PointCloud;
use ndarray::{Array2, Axis};
use rand::seq::index;
use rand::Rng;

/// Choose at most `k` distinct indices out of `n`, with probability
/// proportional to `weights`.
///
/// When `n <= k` every index is returned. Zero-weight points are only drawn
/// once the positive-weight points are exhausted, and if every weight is zero
/// the draw is uniform. The result is sorted ascending.
pub fn weighted_subsample<R: Rng + ?Sized>(
    n: usize,
    weights: &[f32],
    k: usize,
    rng: &mut R,
) -> Result<Vec<usize>, RegistrationError> {
    if k == 0 {
        return Err(RegistrationError::InvalidConfig(
            "target sample size must be positive".to_string(),
        ));
    }

    if weights.len() != n {
        return Err(RegistrationError::InvalidScore(format!(
            "{} weights supplied for {} points",
            weights.len(),
            n
        )));
    }

    if n <= k {
        return Ok((0..n).collect());
    }

    let (positive, zero): (Vec<usize>, Vec<usize>) =
        (0..n).partition(|&i| weights[i].is_finite() && weights[i] > 0.0);

    let mut selected = if positive.is_empty() {
        tracing::debug!(n, k, "All sampling weights are zero, drawing uniformly");
        index::sample(rng, n, k).into_vec()
    } else if positive.len() <= k {
        let missing = k - positive.len();
        tracing::debug!(
            positive = positive.len(),
            filled_uniformly = missing,
            "Too few positive weights, filling from zero-weight points"
        );
        let mut chosen = positive;
        chosen.extend(index::sample(rng, zero.len(), missing).into_iter().map(|i| zero[i]));
        chosen
    } else {
        index::sample_weighted(rng, positive.len(), |i| weights[positive[i]] as f64, k)
            .map_err(|e| RegistrationError::InvalidScore(format!("weighted draw failed: {}", e)))?
            .into_iter()
            .map(|i| positive[i])
            .collect()
    };

    selected.sort_unstable();
    Ok(selected)
}

/// Subsample a cloud and its features with the same index set
pub fn subsample_cloud<R: Rng + ?Sized>(
    cloud: &PointCloud,
    features: &Array2<f32>,
    weights: &[f32],
    k: usize,
    rng: &mut R,
) -> Result<(PointCloud, Array2<f32>, Vec<usize>), RegistrationError> {
    if features.nrows() != cloud.len() {
        return Err(RegistrationError::InvalidInput(format!(
            "{} feature rows for {} points",
            features.nrows(),
            cloud.len()
        )));
    }

    let indices = weighted_subsample(cloud.len(), weights, k, rng)?;
    if indices.len() == cloud.len() {
        return Ok((cloud.clone(), features.clone(), indices));
    }

    Ok((
        cloud.select(&indices),
        features.select(Axis(0), &indices),
        indices,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_identity_when_small() {
        let mut rng = StdRng::seed_from_u64(0);
        let indices = weighted_subsample(4, &[0.1, 0.2, 0.3, 0.4], 10, &mut rng).unwrap();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_zero_target_is_config_error() {
        let mut rng = StdRng::seed_from_u64(0);
        let result = weighted_subsample(3, &[1.0; 3], 0, &mut rng);
        assert!(matches!(result, Err(RegistrationError::InvalidConfig(_))));
    }

    #[test]
    fn test_weights_length_checked() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(weighted_subsample(3, &[1.0; 2], 2, &mut rng).is_err());
    }

    #[test]
    fn test_zero_weights_never_beat_positive_ones() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut weights = vec![0.0; 100];
        for w in weights.iter_mut().take(20) {
            *w = 0.5;
        }
        let indices = weighted_subsample(100, &weights, 10, &mut rng).unwrap();
        assert_eq!(indices.len(), 10);
        assert!(indices.iter().all(|&i| i < 20));
    }

    #[test]
    fn test_partial_positive_weights_are_all_kept() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut weights = vec![0.0; 50];
        weights[3] = 1.0;
        weights[40] = 0.2;
        let indices = weighted_subsample(50, &weights, 8, &mut rng).unwrap();
        let unique: HashSet<_> = indices.iter().collect();
        assert_eq!(unique.len(), 8);
        assert!(indices.contains(&3));
        assert!(indices.contains(&40));
    }

    #[test]
    fn test_pairing_between_points_and_features() {
        let mut rng = StdRng::seed_from_u64(3);
        let cloud = PointCloud::from_triples(
            &(0..30).map(|i| [i as f64, 0.0, 0.0]).collect::<Vec<_>>(),
        )
        .unwrap();
        let features = Array2::from_shape_fn((30, 2), |(r, _)| r as f32);
        let weights = vec![1.0; 30];

        let (sampled, sampled_features, indices) =
            subsample_cloud(&cloud, &features, &weights, 12, &mut rng).unwrap();

        assert_eq!(sampled.len(), 12);
        for (row, &index) in indices.iter().enumerate() {
            assert_eq!(sampled.points()[row].x, index as f64);
            assert_eq!(sampled_features[[row, 0]], index as f32);
        }
    }
}
