//! Rigid pose estimation from noisy correspondences.

pub mod kabsch;
pub mod ransac;

pub use kabsch::*;
pub use ransac::*;
