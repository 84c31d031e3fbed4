//! Error taxonomy for the registration core.
//!
//! Only caller-visible failures live here. "No solution" is an ordinary
//! outcome and is carried by [`crate::RegistrationResult`], while degenerate
//! RANSAC samples are recovered inside the solver.

use thiserror::Error;

/// Errors surfaced by the registration pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid score: {0}")]
    InvalidScore(String),

    #[error("Feature model failure: {0}")]
    FeatureModel(String),
}

impl RegistrationError {
    /// True for errors caused by the request itself rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::InvalidScore(_))
    }
}
