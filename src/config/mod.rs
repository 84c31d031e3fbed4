use crate::features::DescriptorConfig;
use crate::logging::LoggingConfig;
use crate::matching::MatchingConfig;
use crate::pipeline::RegistrationConfig;
use crate::sampling::ScorePolicy;
use crate::solver::RansacConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampling: SamplingConfig,
    pub matching: MatchingConfig,
    pub ransac: RansacConfig,
    pub descriptor: DescriptorConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Keypoints kept per cloud
    pub n_points: usize,
    pub score_policy: ScorePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_ms: u64,
    pub max_concurrent_requests: usize,
    pub max_body_mb: usize,
    pub enable_cors: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_points: 1000,
            score_policy: ScorePolicy::Clamp,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_ms: 30_000,
            max_concurrent_requests: 4,
            max_body_mb: 64,
            enable_cors: true,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        if content.trim_start().starts_with('{') {
            serde_json::from_str(&content).context("Invalid JSON configuration")
        } else {
            toml::from_str(&content).context("Invalid TOML configuration")
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> crate::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.sampling.n_points == 0 {
            errors.push("sampling.n_points must be positive".to_string());
        }

        if let Err(e) = self.ransac.validate() {
            errors.push(format!("ransac: {}", e));
        }

        if self.matching.max_feature_distance.is_some_and(|d| !(d > 0.0)) {
            errors.push("matching.max_feature_distance must be positive when set".to_string());
        }

        if self.descriptor.k_neighbors < 3 {
            errors.push("descriptor.k_neighbors must be at least 3".to_string());
        }

        if !(self.descriptor.saliency_sigma > 0.0) {
            errors.push("descriptor.saliency_sigma must be positive".to_string());
        }

        if self.server.port == 0 {
            errors.push("server.port must be valid".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            errors.push("server.max_concurrent_requests must be positive".to_string());
        }

        if self.server.request_timeout_ms == 0 {
            errors.push("server.request_timeout_ms must be positive".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(format!("logging: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Settings for the registration pipeline
    pub fn registration(&self) -> RegistrationConfig {
        RegistrationConfig {
            n_points: self.sampling.n_points,
            score_policy: self.sampling.score_policy,
            matching: self.matching.clone(),
            ransac: self.ransac.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Load and validate a configuration file, failing with every problem found
pub fn load_config<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
    let path = path.as_ref();
    let config = Config::load_from_file(path)?;
    if let Err(errors) = config.validate() {
        anyhow::bail!(
            "Invalid configuration in {}:\n  {}",
            path.display(),
            errors.join("\n  ")
        );
    }
    Ok(config)
}

pub fn load_config_or_default(config_path: Option<&str>) -> Config {
    let Some(path) = config_path else {
        return Config::default();
    };

    match Config::load_from_file(path) {
        Ok(config) => match config.validate() {
            Ok(()) => config,
            Err(errors) => {
                for error in &errors {
                    tracing::warn!(path, error = %error, "Configuration validation error");
                }
                tracing::warn!(path, "Using default configuration instead");
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(path, error = %format!("{:#}", e), "Failed to load config, using defaults");
            Config::default()
        }
    }
}
