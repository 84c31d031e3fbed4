use super::{CloudFeatures, FeatureExtractor, FeatureOutput, StackedBatch};
use anyhow::Context;
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Parameters of the built-in geometric descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Neighbourhood size used for the local covariance and distance profile
    pub k_neighbors: usize,
    /// Curvature scale of the saliency response
    pub saliency_sigma: f32,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 16,
            saliency_sigma: 0.05,
        }
    }
}

/// Rotation-invariant local descriptor computed from raw geometry.
///
/// Each point gets the normalized eigenvalues of its neighbourhood covariance
/// followed by the sorted distances to its `k` nearest neighbours, expressed in
/// units of the cloud's mean point spacing. Saliency grows with surface
/// variation; overlap is unknown without a learned model and is reported as 1.
#[derive(Debug, Clone, Default)]
pub struct LocalGeometryExtractor {
    config: DescriptorConfig,
}

impl LocalGeometryExtractor {
    pub fn new(config: DescriptorConfig) -> Self {
        Self { config }
    }

    pub fn feature_dim(&self) -> usize {
        3 + self.config.k_neighbors
    }

    fn describe_cloud(&self, points: ArrayView2<'_, f32>) -> anyhow::Result<CloudFeatures> {
        let coords: Vec<Vector3<f64>> = points
            .rows()
            .into_iter()
            .map(|r| Vector3::new(r[0] as f64, r[1] as f64, r[2] as f64))
            .collect();
        let n = coords.len();
        let k = self.config.k_neighbors.min(n.saturating_sub(1));

        let neighbourhoods: Vec<Vec<(usize, f64)>> = (0..n)
            .into_par_iter()
            .map(|i| nearest_neighbours(&coords, i, k))
            .collect();

        let spacing = {
            let firsts: Vec<f64> = neighbourhoods
                .iter()
                .filter_map(|nb| nb.first().map(|&(_, d)| d))
                .collect();
            let mean = firsts.iter().sum::<f64>() / firsts.len().max(1) as f64;
            if mean > f64::EPSILON {
                mean
            } else {
                1.0
            }
        };

        let dim = self.feature_dim();
        let sigma = self.config.saliency_sigma.max(f32::EPSILON);
        let rows: Vec<(Vec<f32>, f32)> = neighbourhoods
            .par_iter()
            .enumerate()
            .map(|(i, neighbours)| {
                let mut row = vec![0.0f32; dim];
                let eigen = covariance_eigenvalues(&coords, i, neighbours);
                let total = eigen.iter().sum::<f64>();
                let curvature = if total > f64::EPSILON {
                    for (slot, value) in row.iter_mut().zip(eigen.iter()) {
                        *slot = (value / total) as f32;
                    }
                    (eigen[2] / total) as f32
                } else {
                    0.0
                };

                for (slot, &(_, distance)) in row[3..].iter_mut().zip(neighbours.iter()) {
                    *slot = (distance / spacing) as f32;
                }

                let saliency = 1.0 - (-curvature / sigma).exp();
                (row, saliency)
            })
            .collect();

        let mut flat = Vec::with_capacity(n * dim);
        let mut saliency = Vec::with_capacity(n);
        for (row, s) in rows {
            flat.extend(row);
            saliency.push(s);
        }

        let features = Array2::from_shape_vec((n, dim), flat)
            .context("descriptor rows do not match the feature dimension")?;

        Ok(CloudFeatures {
            features,
            overlap: vec![1.0; n],
            saliency,
        })
    }
}

impl FeatureExtractor for LocalGeometryExtractor {
    fn name(&self) -> &str {
        "local-geometry"
    }

    fn extract(&self, batch: &StackedBatch) -> anyhow::Result<FeatureOutput> {
        let parts = (0..batch.num_clouds())
            .map(|cloud| self.describe_cloud(batch.cloud_points(cloud)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        tracing::debug!(
            clouds = parts.len(),
            feature_dim = self.feature_dim(),
            "Computed local geometry descriptors"
        );

        FeatureOutput::concat(&parts)
    }
}

/// `k` nearest neighbours of point `index`, sorted by distance
fn nearest_neighbours(points: &[Vector3<f64>], index: usize, k: usize) -> Vec<(usize, f64)> {
    if k == 0 {
        return Vec::new();
    }

    let query = points[index];
    let mut candidates: Vec<(usize, f64)> = points
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != index)
        .map(|(j, p)| (j, (p - query).norm()))
        .collect();

    if candidates.len() > k {
        candidates.select_nth_unstable_by(k - 1, |a, b| a.1.total_cmp(&b.1));
        candidates.truncate(k);
    }
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
    candidates
}

/// Covariance eigenvalues of the point and its neighbours, largest first
fn covariance_eigenvalues(
    points: &[Vector3<f64>],
    index: usize,
    neighbours: &[(usize, f64)],
) -> [f64; 3] {
    let members: Vec<Vector3<f64>> = std::iter::once(points[index])
        .chain(neighbours.iter().map(|&(j, _)| points[j]))
        .collect();
    let mean = members.iter().sum::<Vector3<f64>>() / members.len() as f64;

    let mut covariance = Matrix3::zeros();
    for m in &members {
        let d = m - mean;
        covariance += d * d.transpose();
    }
    covariance /= members.len() as f64;

    let mut eigen: Vec<f64> = covariance
        .symmetric_eigenvalues()
        .iter()
        .map(|v| v.max(0.0))
        .collect();
    eigen.sort_by(|a, b| b.total_cmp(a));
    [eigen[0], eigen[1], eigen[2]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PointCloud, RigidTransform};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_cloud(n: usize, seed: u64) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        PointCloud::from_triples(
            &(0..n)
                .map(|_| [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()])
                .collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn test_output_shape_matches_batch() {
        let a = random_cloud(40, 1);
        let b = random_cloud(25, 2);
        let batch = StackedBatch::from_clouds(&[&a, &b]);
        let extractor = LocalGeometryExtractor::default();

        let output = extractor.extract(&batch).unwrap();
        assert!(output.validate_against(&batch).is_ok());
        assert_eq!(output.features.ncols(), extractor.feature_dim());
        assert!(output.saliency.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(output.overlap.iter().all(|&o| o == 1.0));
    }

    #[test]
    fn test_descriptor_is_rotation_invariant() {
        let cloud = random_cloud(30, 7);
        let moved = cloud.transformed(&RigidTransform::from_axis_angle(
            &Vector3::y_axis(),
            1.1,
            Vector3::new(3.0, -2.0, 0.5),
        ));
        let extractor = LocalGeometryExtractor::default();

        let a = extractor
            .extract(&StackedBatch::from_clouds(&[&cloud]))
            .unwrap();
        let b = extractor
            .extract(&StackedBatch::from_clouds(&[&moved]))
            .unwrap();

        let max_diff = (&a.features - &b.features)
            .iter()
            .fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(max_diff < 1e-3, "descriptor drifted by {}", max_diff);
    }

    #[test]
    fn test_single_point_cloud() {
        let cloud = PointCloud::from_triples(&[[1.0, 2.0, 3.0]]).unwrap();
        let output = LocalGeometryExtractor::default()
            .extract(&StackedBatch::from_clouds(&[&cloud]))
            .unwrap();
        assert_eq!(output.features.nrows(), 1);
        assert_eq!(output.saliency, vec![0.0]);
    }
}
