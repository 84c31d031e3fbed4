//! RANSAC rigid pose estimation over feature correspondences.
//!
//! The solver walks `Init -> Iterating -> {Converged, Exhausted}`. Iterations
//! run in fixed-size chunks; inside a chunk they are evaluated in parallel,
//! each with its own generator seeded from the caller's RNG, so the outcome
//! for a given seed does not depend on thread scheduling.

use super::kabsch::{fit_rigid, is_degenerate_triangle};
use crate::error::RegistrationError;
use crate::types::{Correspondence, PointCloud, RigidTransform};
use nalgebra::Point3;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

/// Correspondences needed to fit a 3-D rigid transform
pub const MIN_SAMPLE_SIZE: usize = 3;

/// Configuration for RANSAC pose estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Maximum point-to-point residual for an inlier, in cloud units
    pub inlier_threshold: f64,
    pub max_iterations: usize,
    /// Target probability of having drawn one all-inlier sample
    pub confidence: f64,
    /// Consensus size a candidate needs to be accepted, capped at the number
    /// of correspondences
    pub min_inliers: usize,
    /// Iterations evaluated in parallel between termination checks
    pub chunk_size: usize,
    /// Redraws allowed per iteration when a sample is degenerate
    pub max_sample_retries: usize,
    /// Reject samples whose corresponding edge lengths differ by more than this ratio
    pub edge_length_ratio: Option<f64>,
    /// Relative triangle area under which a sample counts as collinear
    pub degeneracy_epsilon: f64,
    /// Wall-clock budget; exceeding it ends the search without a solution
    pub timeout_ms: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            inlier_threshold: 0.05,
            max_iterations: 50_000,
            confidence: 0.999,
            min_inliers: 10,
            chunk_size: 256,
            max_sample_retries: 16,
            edge_length_ratio: Some(0.9),
            degeneracy_epsilon: 1e-6,
            timeout_ms: None,
        }
    }
}

impl RansacConfig {
    pub fn validate(&self) -> Result<(), RegistrationError> {
        let problem = if !(self.inlier_threshold > 0.0 && self.inlier_threshold.is_finite()) {
            Some("inlier_threshold must be positive")
        } else if self.max_iterations == 0 {
            Some("max_iterations must be positive")
        } else if !(self.confidence > 0.0 && self.confidence < 1.0) {
            Some("confidence must lie in (0, 1)")
        } else if self.min_inliers < MIN_SAMPLE_SIZE {
            Some("min_inliers must be at least 3")
        } else if self.chunk_size == 0 {
            Some("chunk_size must be positive")
        } else if self
            .edge_length_ratio
            .is_some_and(|r| !(r > 0.0 && r <= 1.0))
        {
            Some("edge_length_ratio must lie in (0, 1]")
        } else if self.degeneracy_epsilon < 0.0 {
            Some("degeneracy_epsilon must be non-negative")
        } else if self.timeout_ms == Some(0) {
            Some("timeout_ms must be positive when set")
        } else {
            None
        };

        match problem {
            Some(message) => Err(RegistrationError::InvalidConfig(message.to_string())),
            None => Ok(()),
        }
    }

    /// Inliers required from `correspondences` pairs. A set smaller than
    /// `min_inliers` has to agree in full instead.
    pub fn consensus_floor(&self, correspondences: usize) -> usize {
        self.min_inliers.min(correspondences)
    }
}

/// Solver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverState {
    #[default]
    Init,
    Iterating,
    Converged,
    Exhausted,
}

/// Why the solver ended without a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoSolutionReason {
    TooFewCorrespondences,
    NoConsensus,
    DegenerateInput,
    TimedOut,
}

impl fmt::Display for NoSolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::TooFewCorrespondences => "fewer than 3 correspondences",
            Self::NoConsensus => "no candidate reached the minimum inlier count",
            Self::DegenerateInput => "every sampled subset was degenerate",
            Self::TimedOut => "time budget exhausted",
        };
        f.write_str(text)
    }
}

/// Counters describing one solver run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverStats {
    pub state: SolverState,
    pub iterations: usize,
    pub degenerate_draws: usize,
    pub rejected_subsets: usize,
    pub candidates: usize,
    pub elapsed_ms: f64,
}

/// Accepted pose with its consensus set
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    pub transform: RigidTransform,
    /// Indices into the correspondence slice
    pub inliers: Vec<usize>,
    pub correspondence_count: usize,
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub stats: SolverStats,
}

impl PoseEstimate {
    pub fn inlier_count(&self) -> usize {
        self.inliers.len()
    }
}

#[derive(Debug, Clone)]
pub enum RansacResult {
    Converged(PoseEstimate),
    Exhausted {
        reason: NoSolutionReason,
        stats: SolverStats,
    },
}

impl RansacResult {
    pub fn state(&self) -> SolverState {
        self.stats().state
    }

    pub fn stats(&self) -> &SolverStats {
        match self {
            Self::Converged(estimate) => &estimate.stats,
            Self::Exhausted { stats, .. } => stats,
        }
    }

    pub fn estimate(&self) -> Option<&PoseEstimate> {
        match self {
            Self::Converged(estimate) => Some(estimate),
            Self::Exhausted { .. } => None,
        }
    }
}

type PointPair = (Point3<f64>, Point3<f64>);

#[derive(Debug, Clone)]
struct Candidate {
    iteration: usize,
    transform: RigidTransform,
    inlier_count: usize,
    mean_residual: f64,
}

impl Candidate {
    /// More inliers wins, then lower mean residual, then the earlier iteration
    fn beats(&self, other: &Candidate) -> bool {
        if self.inlier_count != other.inlier_count {
            return self.inlier_count > other.inlier_count;
        }
        match self.mean_residual.total_cmp(&other.mean_residual) {
            Ordering::Equal => self.iteration < other.iteration,
            ordering => ordering.is_lt(),
        }
    }
}

enum Draw {
    Usable(Candidate),
    Rejected,
    Degenerate,
}

struct IterationReport {
    degenerate_draws: usize,
    draw: Draw,
}

/// Estimate the transform taking `source` onto `target` from putative
/// correspondences. Failing to find a pose is reported as
/// [`RansacResult::Exhausted`], never as an error; errors are reserved for
/// bad configuration and out-of-range correspondence indices.
pub fn estimate_pose_ransac<R: Rng + ?Sized>(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
    config: &RansacConfig,
    rng: &mut R,
) -> Result<RansacResult, RegistrationError> {
    config.validate()?;
    let started = Instant::now();
    let mut stats = SolverStats::default();

    if correspondences.len() < MIN_SAMPLE_SIZE {
        tracing::debug!(
            correspondences = correspondences.len(),
            "Too few correspondences for RANSAC"
        );
        return Ok(exhausted(
            NoSolutionReason::TooFewCorrespondences,
            stats,
            started,
        ));
    }

    let pairs = gather_pairs(source, target, correspondences)?;
    let min_inliers = config.consensus_floor(pairs.len());
    stats.state = SolverState::Iterating;

    let timeout = config.timeout_ms.map(Duration::from_millis);
    let mut best: Option<Candidate> = None;
    let mut usable_draws = 0usize;
    let mut required = config.max_iterations;

    while stats.iterations < required {
        if timeout.is_some_and(|limit| started.elapsed() >= limit) {
            tracing::warn!(
                iterations = stats.iterations,
                "RANSAC time budget exhausted"
            );
            return Ok(exhausted(NoSolutionReason::TimedOut, stats, started));
        }

        let chunk = config.chunk_size.min(config.max_iterations - stats.iterations);
        let seeds: Vec<u64> = (0..chunk).map(|_| rng.gen()).collect();
        let base = stats.iterations;

        let reports: Vec<IterationReport> = seeds
            .par_iter()
            .enumerate()
            .map(|(offset, &seed)| run_iteration(&pairs, config, seed, base + offset))
            .collect();

        for report in reports {
            stats.degenerate_draws += report.degenerate_draws;
            match report.draw {
                Draw::Usable(candidate) => {
                    usable_draws += 1;
                    stats.candidates += 1;
                    if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                        best = Some(candidate);
                    }
                }
                Draw::Rejected => {
                    usable_draws += 1;
                    stats.rejected_subsets += 1;
                }
                Draw::Degenerate => {}
            }
        }
        stats.iterations += chunk;

        if usable_draws == 0 {
            tracing::debug!(
                degenerate_draws = stats.degenerate_draws,
                "No usable minimal sample found"
            );
            return Ok(exhausted(NoSolutionReason::DegenerateInput, stats, started));
        }

        if let Some(b) = best.as_ref().filter(|b| b.inlier_count >= min_inliers) {
            let ratio = b.inlier_count as f64 / pairs.len() as f64;
            required = required_iterations(ratio, config.confidence, config.max_iterations);
        }

        tracing::trace!(
            iterations = stats.iterations,
            required,
            best_inliers = best.as_ref().map_or(0, |b| b.inlier_count),
            "RANSAC chunk completed"
        );
    }

    let best = match best {
        Some(b) if b.inlier_count >= min_inliers => b,
        _ => return Ok(exhausted(NoSolutionReason::NoConsensus, stats, started)),
    };

    let (transform, inliers, squared_sum) =
        refine(&pairs, &best, config.inlier_threshold, min_inliers);
    stats.state = SolverState::Converged;
    stats.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let inlier_rmse = (squared_sum / inliers.len().max(1) as f64).sqrt();
    let fitness = inliers.len() as f64 / pairs.len() as f64;

    tracing::debug!(
        iterations = stats.iterations,
        inliers = inliers.len(),
        fitness,
        inlier_rmse,
        "RANSAC converged"
    );

    Ok(RansacResult::Converged(PoseEstimate {
        transform,
        inliers,
        correspondence_count: pairs.len(),
        fitness,
        inlier_rmse,
        stats,
    }))
}

fn exhausted(reason: NoSolutionReason, mut stats: SolverStats, started: Instant) -> RansacResult {
    stats.state = SolverState::Exhausted;
    stats.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    RansacResult::Exhausted { reason, stats }
}

fn gather_pairs(
    source: &PointCloud,
    target: &PointCloud,
    correspondences: &[Correspondence],
) -> Result<Vec<PointPair>, RegistrationError> {
    let (src, tgt) = (source.points(), target.points());
    correspondences
        .iter()
        .map(|c| match (src.get(c.source), tgt.get(c.target)) {
            (Some(s), Some(t)) => Ok((*s, *t)),
            _ => Err(RegistrationError::InvalidInput(format!(
                "correspondence ({}, {}) is out of range for clouds of {} and {} points",
                c.source,
                c.target,
                src.len(),
                tgt.len()
            ))),
        })
        .collect()
}

fn run_iteration(
    pairs: &[PointPair],
    config: &RansacConfig,
    seed: u64,
    iteration: usize,
) -> IterationReport {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut degenerate_draws = 0;

    for _ in 0..=config.max_sample_retries {
        let picks = index::sample(&mut rng, pairs.len(), MIN_SAMPLE_SIZE);
        let src = [pairs[picks.index(0)].0, pairs[picks.index(1)].0, pairs[picks.index(2)].0];
        let tgt = [pairs[picks.index(0)].1, pairs[picks.index(1)].1, pairs[picks.index(2)].1];

        if is_degenerate_triangle(&src[0], &src[1], &src[2], config.degeneracy_epsilon)
            || is_degenerate_triangle(&tgt[0], &tgt[1], &tgt[2], config.degeneracy_epsilon)
        {
            degenerate_draws += 1;
            continue;
        }

        if let Some(ratio) = config.edge_length_ratio {
            if !edge_lengths_agree(&src, &tgt, ratio) {
                return IterationReport {
                    degenerate_draws,
                    draw: Draw::Rejected,
                };
            }
        }

        match fit_rigid(&src, &tgt) {
            Ok(transform) => {
                let (inlier_count, residual_sum) =
                    score_transform(pairs, &transform, config.inlier_threshold);
                let mean_residual = if inlier_count > 0 {
                    residual_sum / inlier_count as f64
                } else {
                    f64::INFINITY
                };
                return IterationReport {
                    degenerate_draws,
                    draw: Draw::Usable(Candidate {
                        iteration,
                        transform,
                        inlier_count,
                        mean_residual,
                    }),
                };
            }
            Err(_) => degenerate_draws += 1,
        }
    }

    IterationReport {
        degenerate_draws,
        draw: Draw::Degenerate,
    }
}

/// Pairwise distances must be preserved by a rigid motion
fn edge_lengths_agree(src: &[Point3<f64>; 3], tgt: &[Point3<f64>; 3], ratio: f64) -> bool {
    [(0, 1), (0, 2), (1, 2)].iter().all(|&(i, j)| {
        let ds = (src[i] - src[j]).norm();
        let dt = (tgt[i] - tgt[j]).norm();
        ds >= ratio * dt && dt >= ratio * ds
    })
}

/// Inlier count and the sum of inlier residuals
fn score_transform(pairs: &[PointPair], transform: &RigidTransform, threshold: f64) -> (usize, f64) {
    pairs.iter().fold((0, 0.0), |(count, sum), (s, t)| {
        let residual = (transform.apply(s) - t).norm();
        if residual < threshold {
            (count + 1, sum + residual)
        } else {
            (count, sum)
        }
    })
}

/// Inlier indices and the sum of squared inlier residuals
fn inlier_set(pairs: &[PointPair], transform: &RigidTransform, threshold: f64) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut squared_sum = 0.0;
    for (i, (s, t)) in pairs.iter().enumerate() {
        let residual = (transform.apply(s) - t).norm();
        if residual < threshold {
            inliers.push(i);
            squared_sum += residual * residual;
        }
    }
    (inliers, squared_sum)
}

/// Refit over the winner's full consensus set. Falls back to the minimal-sample
/// transform when the refit is degenerate or loses the consensus.
fn refine(
    pairs: &[PointPair],
    best: &Candidate,
    threshold: f64,
    min_inliers: usize,
) -> (RigidTransform, Vec<usize>, f64) {
    let (initial, initial_sum) = inlier_set(pairs, &best.transform, threshold);
    let src: Vec<_> = initial.iter().map(|&i| pairs[i].0).collect();
    let tgt: Vec<_> = initial.iter().map(|&i| pairs[i].1).collect();

    match fit_rigid(&src, &tgt) {
        Ok(refined) => {
            let (inliers, squared_sum) = inlier_set(pairs, &refined, threshold);
            if inliers.len() >= min_inliers {
                return (refined, inliers, squared_sum);
            }
            tracing::debug!(
                before = initial.len(),
                after = inliers.len(),
                "Refined transform lost consensus, keeping sample fit"
            );
        }
        Err(e) => {
            tracing::debug!(error = %e, "Inlier refit failed, keeping sample fit");
        }
    }

    (best.transform, initial, initial_sum)
}

/// Iterations needed to draw one all-inlier sample with the given confidence
fn required_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    let p = inlier_ratio.clamp(0.0, 1.0).powi(MIN_SAMPLE_SIZE as i32);
    if p >= 1.0 - f64::EPSILON {
        return 1;
    }
    if p <= f64::EPSILON {
        return max_iterations;
    }

    let k = (1.0 - confidence).ln() / (1.0 - p).ln();
    if k.is_finite() {
        (k.ceil() as usize).clamp(1, max_iterations)
    } else {
        max_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn candidate(iteration: usize, inlier_count: usize, mean_residual: f64) -> Candidate {
        Candidate {
            iteration,
            transform: RigidTransform::identity(),
            inlier_count,
            mean_residual,
        }
    }

    #[test]
    fn test_candidate_ordering() {
        assert!(candidate(5, 10, 0.02).beats(&candidate(1, 9, 0.001)));
        assert!(candidate(5, 10, 0.01).beats(&candidate(1, 10, 0.02)));
        assert!(candidate(1, 10, 0.01).beats(&candidate(5, 10, 0.01)));
        assert!(!candidate(5, 10, 0.01).beats(&candidate(1, 10, 0.01)));
        assert!(candidate(5, 1, 0.01).beats(&candidate(1, 0, f64::INFINITY)));
    }

    #[test]
    fn test_required_iterations() {
        assert_eq!(required_iterations(1.0, 0.999, 1000), 1);
        assert_eq!(required_iterations(0.0, 0.999, 1000), 1000);
        let k = required_iterations(0.5, 0.99, 100_000);
        // log(0.01) / log(1 - 0.125) = 34.5
        assert_eq!(k, 35);
    }

    #[test]
    fn test_edge_length_check() {
        let a = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let stretched = [a[0], Point3::new(2.0, 0.0, 0.0), a[2]];
        assert!(edge_lengths_agree(&a, &a, 0.9));
        assert!(!edge_lengths_agree(&a, &stretched, 0.9));
    }

    #[test]
    fn test_config_validation() {
        assert!(RansacConfig::default().validate().is_ok());

        let bad = RansacConfig {
            min_inliers: 2,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(RegistrationError::InvalidConfig(_))));

        let bad = RansacConfig {
            confidence: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = RansacConfig {
            edge_length_ratio: Some(1.5),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_consensus_floor_caps_at_correspondence_count() {
        let config = RansacConfig::default();
        assert_eq!(config.consensus_floor(500), 10);
        assert_eq!(config.consensus_floor(10), 10);
        assert_eq!(config.consensus_floor(6), 6);
        assert_eq!(config.consensus_floor(3), 3);
    }

    #[test]
    fn test_score_transform_uses_strict_threshold() {
        let pairs = vec![
            (Point3::origin(), Point3::new(0.04, 0.0, 0.0)),
            (Point3::origin(), Point3::new(0.05, 0.0, 0.0)),
            (Point3::origin(), Point3::new(0.0, 0.0, 0.0)),
        ];
        let (count, sum) = score_transform(&pairs, &RigidTransform::identity(), 0.05);
        assert_eq!(count, 2);
        assert!((sum - 0.04).abs() < 1e-12);

        let shifted = RigidTransform::from_axis_angle(&Vector3::z_axis(), 0.0, Vector3::new(0.04, 0.0, 0.0));
        let (inliers, _) = inlier_set(&pairs, &shifted, 0.05);
        assert_eq!(inliers, vec![0, 1, 2]);
    }
}
