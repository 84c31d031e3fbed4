//! Boundary to the per-point feature model.
//!
//! The learned network is an external collaborator; the pipeline only sees it
//! through [`FeatureExtractor`]. A geometric extractor ships with the crate so
//! the service runs without the network.

pub mod batch;
pub mod descriptor;

pub use batch::*;
pub use descriptor::*;

/// Per-point features, overlap scores and saliency scores for a stacked batch
///
/// Implementations are shared across in-flight requests, so they must be
/// safe for concurrent read-only use. A model that is not reentrant should
/// serialize calls internally.
pub trait FeatureExtractor: Send + Sync {
    /// Name used in logs and the health endpoint
    fn name(&self) -> &str;

    /// Run the model over every cloud in the batch. The returned arrays are
    /// parallel to `batch.points()`.
    fn extract(&self, batch: &StackedBatch) -> anyhow::Result<FeatureOutput>;
}
