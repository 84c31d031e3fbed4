use crate::error::RegistrationError;
use serde::{Deserialize, Serialize};

/// How out-of-range overlap/saliency scores are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorePolicy {
    /// Clamp into [0, 1]; NaN becomes 0
    #[default]
    Clamp,
    /// Reject any score outside [0, 1]
    Strict,
}

impl ScorePolicy {
    fn admit(self, kind: &str, index: usize, score: f32) -> Result<f32, RegistrationError> {
        if (0.0..=1.0).contains(&score) {
            return Ok(score);
        }

        match self {
            ScorePolicy::Clamp if score.is_nan() => Ok(0.0),
            ScorePolicy::Clamp => Ok(score.clamp(0.0, 1.0)),
            ScorePolicy::Strict => Err(RegistrationError::InvalidScore(format!(
                "{} score {} at point {} is outside [0, 1]",
                kind, score, index
            ))),
        }
    }
}

/// Per-point sampling weight: overlap x saliency, never negative
pub fn combine_scores(
    overlap: &[f32],
    saliency: &[f32],
    policy: ScorePolicy,
) -> Result<Vec<f32>, RegistrationError> {
    if overlap.len() != saliency.len() {
        return Err(RegistrationError::InvalidScore(format!(
            "overlap has {} scores but saliency has {}",
            overlap.len(),
            saliency.len()
        )));
    }

    overlap
        .iter()
        .zip(saliency)
        .enumerate()
        .map(|(i, (&o, &s))| {
            let o = policy.admit("overlap", i, o)?;
            let s = policy.admit("saliency", i, s)?;
            Ok((o * s).max(0.0))
        })
        .collect()
}
