//! Synthetic registration problems with known ground truth.

use crate::features::{CloudFeatures, FeatureExtractor, FeatureOutput, StackedBatch};
use crate::types::{PointCloud, RigidTransform};
use nalgebra::{Point3, Unit, Vector3};
use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Overlap assigned to target points that were replaced by outliers
const OUTLIER_OVERLAP: f32 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub points: usize,
    /// Half-width of the cube the source points are drawn from
    pub extent: f64,
    pub axis: [f64; 3],
    pub angle_degrees: f64,
    pub translation: [f64; 3],
    /// Standard deviation of the Gaussian noise added to target points
    pub noise_sigma: f64,
    /// Share of target points replaced by uniform clutter
    pub outlier_fraction: f64,
    /// Share of points whose oracle features match their true partner
    pub correct_match_fraction: f64,
    pub feature_dim: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            points: 500,
            extent: 1.0,
            axis: [0.0, 0.0, 1.0],
            angle_degrees: 30.0,
            translation: [1.0, 0.0, 0.0],
            noise_sigma: 0.0,
            outlier_fraction: 0.0,
            correct_match_fraction: 0.8,
            feature_dim: 16,
        }
    }
}

/// A source cloud, its image under `transform`, and oracle features in
/// which exactly the `correct` points share a descriptor with their partner
#[derive(Debug, Clone)]
pub struct SyntheticPair {
    pub source: PointCloud,
    pub target: PointCloud,
    pub transform: RigidTransform,
    pub correct: Vec<bool>,
    pub source_features: CloudFeatures,
    pub target_features: CloudFeatures,
}

impl SyntheticPair {
    pub fn generate<R: Rng + ?Sized>(config: &SyntheticConfig, rng: &mut R) -> crate::Result<Self> {
        if config.points == 0 || config.feature_dim == 0 {
            anyhow::bail!("synthetic pair needs points and a feature dimension");
        }
        for (name, fraction) in [
            ("outlier_fraction", config.outlier_fraction),
            ("correct_match_fraction", config.correct_match_fraction),
        ] {
            if !(0.0..=1.0).contains(&fraction) {
                anyhow::bail!("{} must lie in [0, 1], got {}", name, fraction);
            }
        }

        let axis = Unit::try_new(Vector3::from(config.axis), f64::EPSILON)
            .ok_or_else(|| anyhow::anyhow!("rotation axis must be non-zero"))?;
        let transform = RigidTransform::from_axis_angle(
            &axis,
            config.angle_degrees.to_radians(),
            Vector3::from(config.translation),
        );

        let n = config.points;
        let extent = config.extent;
        let source: Vec<Point3<f64>> = (0..n)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-extent..=extent),
                    rng.gen_range(-extent..=extent),
                    rng.gen_range(-extent..=extent),
                )
            })
            .collect();

        let noise = Normal::new(0.0, config.noise_sigma)?;
        let outliers = pick(n, config.outlier_fraction, rng);
        let mut target = Vec::with_capacity(n);
        for (i, p) in source.iter().enumerate() {
            let q = if outliers[i] {
                transform.apply(&Point3::new(
                    rng.gen_range(-extent..=extent),
                    rng.gen_range(-extent..=extent),
                    rng.gen_range(-extent..=extent),
                ))
            } else {
                let jitter = Vector3::new(noise.sample(rng), noise.sample(rng), noise.sample(rng));
                transform.apply(p) + jitter
            };
            target.push(q);
        }

        let matched = pick(n, config.correct_match_fraction, rng);
        let correct: Vec<bool> = (0..n).map(|i| matched[i] && !outliers[i]).collect();

        let descriptor = Normal::new(0.0_f32, 1.0)?;
        let source_features =
            Array2::from_shape_fn((n, config.feature_dim), |_| descriptor.sample(rng));
        let mut target_features = source_features.clone();
        for (i, mut row) in target_features.rows_mut().into_iter().enumerate() {
            if !correct[i] {
                row.mapv_inplace(|_| descriptor.sample(rng));
            }
        }

        let overlap: Vec<f32> = outliers
            .iter()
            .map(|&o| if o { OUTLIER_OVERLAP } else { 1.0 })
            .collect();

        Ok(Self {
            source: PointCloud::new(source)?,
            target: PointCloud::new(target)?,
            transform,
            source_features: CloudFeatures {
                features: source_features,
                overlap: vec![1.0; n],
                saliency: vec![1.0; n],
            },
            target_features: CloudFeatures {
                features: target_features,
                overlap,
                saliency: vec![1.0; n],
            },
            correct,
        })
    }

    pub fn correct_fraction(&self) -> f64 {
        self.correct.iter().filter(|&&c| c).count() as f64 / self.correct.len().max(1) as f64
    }

    /// Extractor that replays this pair's oracle features
    pub fn oracle(&self) -> OracleExtractor {
        OracleExtractor {
            source: self.source_features.clone(),
            target: self.target_features.clone(),
        }
    }
}

/// Exactly `round(fraction * n)` flags set, at random positions
fn pick<R: Rng + ?Sized>(n: usize, fraction: f64, rng: &mut R) -> Vec<bool> {
    let amount = ((n as f64) * fraction).round() as usize;
    let mut flags = vec![false; n];
    for i in rand::seq::index::sample(rng, n, amount.min(n)) {
        flags[i] = true;
    }
    flags
}

/// Feature model stand-in that returns precomputed per-cloud features
pub struct OracleExtractor {
    source: CloudFeatures,
    target: CloudFeatures,
}

impl OracleExtractor {
    pub fn new(source: CloudFeatures, target: CloudFeatures) -> Self {
        Self { source, target }
    }
}

impl FeatureExtractor for OracleExtractor {
    fn name(&self) -> &str {
        "oracle"
    }

    fn extract(&self, batch: &StackedBatch) -> anyhow::Result<FeatureOutput> {
        let expected = [self.source.len(), self.target.len()];
        if batch.stack_lengths() != expected {
            anyhow::bail!(
                "oracle features cover clouds of {:?} points, batch has {:?}",
                expected,
                batch.stack_lengths()
            );
        }
        FeatureOutput::concat(&[self.source.clone(), self.target.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generated_pair_follows_transform() {
        let mut rng = StdRng::seed_from_u64(5);
        let pair = SyntheticPair::generate(&SyntheticConfig::default(), &mut rng).unwrap();

        assert_eq!(pair.source.len(), 500);
        assert_eq!(pair.target.len(), 500);
        assert!((pair.correct_fraction() - 0.8).abs() < 1e-9);
        assert!((pair.transform.rotation_angle_degrees() - 30.0).abs() < 1e-9);

        for (s, t) in pair.source.points().iter().zip(pair.target.points()) {
            assert!((pair.transform.apply(s) - t).norm() < 1e-12);
        }
    }

    #[test]
    fn test_correct_points_share_features() {
        let mut rng = StdRng::seed_from_u64(6);
        let config = SyntheticConfig {
            points: 50,
            correct_match_fraction: 0.5,
            ..Default::default()
        };
        let pair = SyntheticPair::generate(&config, &mut rng).unwrap();

        for (i, &correct) in pair.correct.iter().enumerate() {
            let same = pair.source_features.features.row(i) == pair.target_features.features.row(i);
            assert_eq!(same, correct, "point {}", i);
        }
    }

    #[test]
    fn test_outliers_are_never_correct() {
        let mut rng = StdRng::seed_from_u64(7);
        let config = SyntheticConfig {
            points: 100,
            outlier_fraction: 0.3,
            correct_match_fraction: 1.0,
            ..Default::default()
        };
        let pair = SyntheticPair::generate(&config, &mut rng).unwrap();
        assert!((pair.correct_fraction() - 0.7).abs() < 1e-9);
        assert_eq!(
            pair.target_features
                .overlap
                .iter()
                .filter(|&&o| o == OUTLIER_OVERLAP)
                .count(),
            30
        );
    }

    #[test]
    fn test_oracle_rejects_mismatched_batch() {
        let mut rng = StdRng::seed_from_u64(8);
        let config = SyntheticConfig {
            points: 10,
            ..Default::default()
        };
        let pair = SyntheticPair::generate(&config, &mut rng).unwrap();
        let oracle = pair.oracle();

        let batch = StackedBatch::from_clouds(&[&pair.source, &pair.target]);
        assert_eq!(oracle.extract(&batch).unwrap().features.nrows(), 20);

        let batch = StackedBatch::from_clouds(&[&pair.source]);
        assert!(oracle.extract(&batch).is_err());
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let mut rng = StdRng::seed_from_u64(9);
        let config = SyntheticConfig {
            outlier_fraction: 1.5,
            ..Default::default()
        };
        assert!(SyntheticPair::generate(&config, &mut rng).is_err());
    }
}
