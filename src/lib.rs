pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod logging;
pub mod matching;
pub mod pipeline;
pub mod sampling;
pub mod server;
pub mod solver;
pub mod types;

pub use error::RegistrationError;
pub use features::{FeatureExtractor, FeatureOutput, StackedBatch};
pub use pipeline::{RegistrationConfig, Registrar};
pub use types::{
    Correspondence, PointCloud, RegisterRequest, RegistrationResult, RigidTransform,
    TransformResponse,
};

pub type Result<T> = anyhow::Result<T>;
