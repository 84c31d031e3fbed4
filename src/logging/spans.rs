//! Structured span for one registration request
//!
//! Fields are declared up front so each pipeline stage can record into the
//! same span as it completes.

use crate::solver::SolverStats;
use std::time::Instant;
use tracing::field::Empty;
use tracing::{span, Level, Span};
use uuid::Uuid;

pub struct RegistrationSpan {
    span: Span,
    start_time: Instant,
}

impl RegistrationSpan {
    pub fn new(
        extractor: &str,
        source_points: usize,
        target_points: usize,
        correlation_id: Option<Uuid>,
    ) -> Self {
        let span = span!(
            Level::INFO,
            "registration",
            extractor = extractor,
            source_points = source_points,
            target_points = target_points,
            correlation_id = correlation_id.map(|id| id.to_string()),
            feature_dim = Empty,
            source_keypoints = Empty,
            target_keypoints = Empty,
            correspondences = Empty,
            ransac_iterations = Empty,
            ransac_inliers = Empty,
            success = Empty,
            execution_time_ms = Empty,
        );

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn record_extraction(&self, feature_dim: usize) {
        self.span.record("feature_dim", feature_dim);
        tracing::debug!(parent: &self.span, feature_dim, "Feature extraction completed");
    }

    pub fn record_sampling(&self, source_keypoints: usize, target_keypoints: usize) {
        self.span.record("source_keypoints", source_keypoints);
        self.span.record("target_keypoints", target_keypoints);
        tracing::debug!(
            parent: &self.span,
            source_keypoints,
            target_keypoints,
            "Keypoint sampling completed"
        );
    }

    pub fn record_matching(&self, correspondences: usize, mutual: bool) {
        self.span.record("correspondences", correspondences);
        tracing::debug!(
            parent: &self.span,
            correspondences,
            mutual,
            "Correspondence search completed"
        );
    }

    pub fn record_ransac(&self, stats: &SolverStats, inliers: usize) {
        self.span.record("ransac_iterations", stats.iterations);
        self.span.record("ransac_inliers", inliers);
        tracing::debug!(
            parent: &self.span,
            iterations = stats.iterations,
            inliers,
            degenerate_draws = stats.degenerate_draws,
            rejected_subsets = stats.rejected_subsets,
            state = ?stats.state,
            "RANSAC estimation completed"
        );
    }

    /// Record the final outcome with success/failure status
    pub fn record_result(&self, success: bool, description: &str) {
        let duration = self.start_time.elapsed();
        self.span.record("success", success);
        self.span.record("execution_time_ms", duration.as_secs_f64() * 1000.0);

        tracing::info!(
            parent: &self.span,
            success,
            execution_time_ms = duration.as_millis() as u64,
            description,
            "Registration completed"
        );
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}
