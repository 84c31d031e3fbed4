//! Keypoint selection: score combination and weighted subsampling.

pub mod scoring;
pub mod subsample;

pub use scoring::*;
pub use subsample::*;
