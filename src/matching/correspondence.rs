use crate::error::RegistrationError;
use crate::types::Correspondence;
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Distance used to compare feature vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureMetric {
    #[default]
    Euclidean,
    /// One minus cosine similarity; zero vectors are at distance 1
    Cosine,
}

impl FeatureMetric {
    pub fn distance(self, a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
        match self {
            FeatureMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            FeatureMetric::Cosine => {
                let dot = a.dot(&b);
                let norms = a.dot(&a).sqrt() * b.dot(&b).sqrt();
                if norms <= f32::EPSILON {
                    1.0
                } else {
                    1.0 - dot / norms
                }
            }
        }
    }
}

/// Correspondence search settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub metric: FeatureMetric,
    /// Keep only pairs that are each other's nearest neighbour
    pub mutual: bool,
    /// Drop matches whose feature distance exceeds this value
    pub max_feature_distance: Option<f32>,
}

/// Nearest target feature for every source feature.
///
/// Returns an empty set when either side is empty; that is how "nothing to
/// match" reaches the solver.
pub fn find_correspondences(
    source: ArrayView2<'_, f32>,
    target: ArrayView2<'_, f32>,
    config: &MatchingConfig,
) -> Result<Vec<Correspondence>, RegistrationError> {
    if source.nrows() == 0 || target.nrows() == 0 {
        return Ok(Vec::new());
    }

    if source.ncols() != target.ncols() {
        return Err(RegistrationError::InvalidInput(format!(
            "feature dimensions differ: source {} vs target {}",
            source.ncols(),
            target.ncols()
        )));
    }

    let forward = nearest_rows(source, target, config.metric);
    let backward = config
        .mutual
        .then(|| nearest_rows(target, source, config.metric));

    let correspondences: Vec<Correspondence> = forward
        .into_iter()
        .enumerate()
        .filter(|&(s, (t, _))| backward.as_ref().map_or(true, |b| b[t].0 == s))
        .filter(|&(_, (_, d))| config.max_feature_distance.map_or(true, |max| d <= max))
        .map(|(s, (t, d))| Correspondence::new(s, t, d))
        .collect();

    tracing::debug!(
        source = source.nrows(),
        target = target.nrows(),
        mutual = config.mutual,
        kept = correspondences.len(),
        "Feature correspondences computed"
    );

    Ok(correspondences)
}

/// For each query row, the index and distance of its nearest pool row.
/// Ties resolve to the lowest pool index.
fn nearest_rows(
    queries: ArrayView2<'_, f32>,
    pool: ArrayView2<'_, f32>,
    metric: FeatureMetric,
) -> Vec<(usize, f32)> {
    (0..queries.nrows())
        .into_par_iter()
        .map(|q| {
            let query = queries.row(q);
            pool.rows()
                .into_iter()
                .enumerate()
                .fold((0usize, f32::INFINITY), |best, (p, row)| {
                    let d = metric.distance(query, row);
                    if d < best.1 {
                        (p, d)
                    } else {
                        best
                    }
                })
        })
        .collect()
}
