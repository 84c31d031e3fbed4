use crate::error::RegistrationError;
use crate::features::{FeatureExtractor, StackedBatch};
use crate::logging::{get_correlation_id, MetricsCollector, RegistrationSpan, Timer};
use crate::matching::{find_correspondences, MatchingConfig};
use crate::sampling::{combine_scores, subsample_cloud, ScorePolicy};
use crate::solver::{estimate_pose_ransac, RansacConfig, RansacResult};
use crate::types::{PointCloud, Registration, RegistrationResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Settings for one registration run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Keypoints kept per cloud after weighted subsampling
    pub n_points: usize,
    pub score_policy: ScorePolicy,
    pub matching: MatchingConfig,
    pub ransac: RansacConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            n_points: 1000,
            score_policy: ScorePolicy::default(),
            matching: MatchingConfig::default(),
            ransac: RansacConfig::default(),
        }
    }
}

impl RegistrationConfig {
    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.n_points == 0 {
            return Err(RegistrationError::InvalidConfig(
                "n_points must be positive".to_string(),
            ));
        }
        self.ransac.validate()
    }
}

/// Runs feature extraction, keypoint sampling, matching and RANSAC for a
/// source/target pair.
///
/// The registrar holds no per-request state, so one instance is shared by
/// every request the service handles.
pub struct Registrar {
    extractor: Arc<dyn FeatureExtractor>,
    config: RegistrationConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Registrar {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        config: RegistrationConfig,
    ) -> Result<Self, RegistrationError> {
        config.validate()?;
        Ok(Self {
            extractor,
            config,
            metrics: None,
        })
    }

    /// Report stage timings into `collector`
    pub fn with_metrics(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(collector);
        self
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.name()
    }

    /// Register raw `[x, y, z]` lists, as received over the wire
    pub fn register_triples<R: Rng + ?Sized>(
        &self,
        source: &[[f64; 3]],
        target: &[[f64; 3]],
        rng: &mut R,
    ) -> Result<RegistrationResult, RegistrationError> {
        let source = PointCloud::from_triples(source).map_err(|e| label_input("source", e))?;
        let target = PointCloud::from_triples(target).map_err(|e| label_input("target", e))?;
        self.register(&source, &target, rng)
    }

    /// Estimate the rigid transform taking `source` onto `target`.
    ///
    /// A pair that cannot be aligned yields [`RegistrationResult::NoSolution`];
    /// errors are reserved for invalid input, bad scores and extractor faults.
    pub fn register<R: Rng + ?Sized>(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        rng: &mut R,
    ) -> Result<RegistrationResult, RegistrationError> {
        let correlation_id = get_correlation_id();
        let span = RegistrationSpan::new(
            self.extractor.name(),
            source.len(),
            target.len(),
            correlation_id,
        );
        let _guard = span.enter();
        let total = self.timer("registration");

        let result = self.run(source, target, rng, &span);

        match &result {
            Ok(RegistrationResult::Solved(registration)) => {
                span.record_result(true, "transform found");
                total
                    .with_metadata("solved", serde_json::json!(true))
                    .with_metadata("inliers", serde_json::json!(registration.inlier_count))
                    .stop();
            }
            Ok(RegistrationResult::NoSolution { reason, .. }) => {
                span.record_result(false, &reason.to_string());
                total.with_metadata("solved", serde_json::json!(false)).stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Registration failed");
                span.record_result(false, "error");
                total
                    .with_metadata("solved", serde_json::json!(false))
                    .with_metadata("error", serde_json::json!(e.to_string()))
                    .stop();
            }
        }

        result
    }

    fn run<R: Rng + ?Sized>(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        rng: &mut R,
        span: &RegistrationSpan,
    ) -> Result<RegistrationResult, RegistrationError> {
        if source.is_empty() || target.is_empty() {
            return Err(RegistrationError::InvalidInput(
                "both clouds need at least one point".to_string(),
            ));
        }

        let timer = self.timer("extraction");
        let batch = StackedBatch::from_clouds(&[source, target]);
        let output = self
            .extractor
            .extract(&batch)
            .map_err(|e| RegistrationError::FeatureModel(format!("{:#}", e)))?;
        let mut clouds = output.split(&batch)?.into_iter();
        let (Some(source_features), Some(target_features)) = (clouds.next(), clouds.next()) else {
            return Err(RegistrationError::FeatureModel(
                "extractor output does not cover both clouds".to_string(),
            ));
        };
        timer.stop();
        span.record_extraction(source_features.feature_dim());

        let timer = self.timer("sampling");
        let source_weights = combine_scores(
            &source_features.overlap,
            &source_features.saliency,
            self.config.score_policy,
        )?;
        let target_weights = combine_scores(
            &target_features.overlap,
            &target_features.saliency,
            self.config.score_policy,
        )?;

        let (source_keys, source_descriptors, _) = subsample_cloud(
            source,
            &source_features.features,
            &source_weights,
            self.config.n_points,
            rng,
        )?;
        let (target_keys, target_descriptors, _) = subsample_cloud(
            target,
            &target_features.features,
            &target_weights,
            self.config.n_points,
            rng,
        )?;
        timer.stop();
        span.record_sampling(source_keys.len(), target_keys.len());

        let timer = self.timer("matching");
        let correspondences = find_correspondences(
            source_descriptors.view(),
            target_descriptors.view(),
            &self.config.matching,
        )?;
        timer.stop();
        span.record_matching(correspondences.len(), self.config.matching.mutual);

        let timer = self.timer("ransac");
        let outcome = estimate_pose_ransac(
            &source_keys,
            &target_keys,
            &correspondences,
            &self.config.ransac,
            rng,
        )?;
        timer.stop();

        let result = match outcome {
            RansacResult::Converged(estimate) => {
                span.record_ransac(&estimate.stats, estimate.inlier_count());
                RegistrationResult::Solved(Registration {
                    inlier_count: estimate.inlier_count(),
                    correspondence_count: estimate.correspondence_count,
                    fitness: estimate.fitness,
                    inlier_rmse: estimate.inlier_rmse,
                    source_keypoints: source_keys.len(),
                    target_keypoints: target_keys.len(),
                    transform: estimate.transform,
                    stats: estimate.stats,
                })
            }
            RansacResult::Exhausted { reason, stats } => {
                span.record_ransac(&stats, 0);
                tracing::info!(%reason, iterations = stats.iterations, "No transform found");
                RegistrationResult::NoSolution { reason, stats }
            }
        };

        Ok(result)
    }

    fn timer(&self, stage: &str) -> Timer {
        match &self.metrics {
            Some(collector) => {
                Timer::start_with_collector(stage, get_correlation_id(), collector.clone())
            }
            None => Timer::start(stage, get_correlation_id()),
        }
    }
}

fn label_input(side: &str, error: RegistrationError) -> RegistrationError {
    match error {
        RegistrationError::InvalidInput(message) => {
            RegistrationError::InvalidInput(format!("{} cloud: {}", side, message))
        }
        other => other,
    }
}
