//! Logging configuration system
//!
//! Per-component log levels, output destinations and presets for the
//! registration service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in logs
    pub include_file_location: bool,

    /// Score combination and subsampling
    pub sampling_level: String,

    /// Correspondence search
    pub matching_level: String,

    /// RANSAC pose solver
    pub solver_level: String,

    /// HTTP service
    pub server_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            sampling_level: "info".to_string(),
            matching_level: "info".to_string(),
            solver_level: "info".to_string(),
            server_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose logging with file output for local work
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            sampling_level: "debug".to_string(),
            matching_level: "debug".to_string(),
            solver_level: "trace".to_string(),
            server_level: "debug".to_string(),
        }
    }

    /// Quiet console, JSON files for collection
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("/var/log/point-registration")),
            include_file_location: false,
            sampling_level: "warn".to_string(),
            matching_level: "warn".to_string(),
            solver_level: "info".to_string(),
            server_level: "info".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let levels = [
            ("global_level", &self.global_level),
            ("sampling_level", &self.sampling_level),
            ("matching_level", &self.matching_level),
            ("solver_level", &self.solver_level),
            ("server_level", &self.server_level),
        ];

        for (name, level) in levels {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// Get the effective log level for a specific component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "sampling" => &self.sampling_level,
            "matching" => &self.matching_level,
            "solver" | "ransac" => &self.solver_level,
            "server" => &self.server_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives for the crate and each component module
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        let mut directives = vec![format!("{}={}", krate, self.global_level)];
        for component in ["sampling", "matching", "solver", "server"] {
            directives.push(format!(
                "{}::{}={}",
                krate,
                component,
                self.get_component_level(component)
            ));
        }
        directives.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.global_level, "info");
        assert!(config.console_output);
        assert!(config.log_directory.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let dev = LoggingConfig::development();
        assert_eq!(dev.solver_level, "trace");
        assert!(dev.include_file_location);

        let prod = LoggingConfig::production();
        assert_eq!(prod.global_level, "warn");
        assert!(!prod.console_output);
    }

    #[test]
    fn test_config_validation() {
        let mut config = LoggingConfig::default();
        config.global_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.global_level = "debug".to_string();
        config.solver_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_level_selection() {
        let config = LoggingConfig::development();
        assert_eq!(config.get_component_level("ransac"), "trace");
        assert_eq!(config.get_component_level("sampling"), "debug");
        assert_eq!(config.get_component_level("unknown"), "debug");
    }

    #[test]
    fn test_filter_directives() {
        let directives = LoggingConfig::default().filter_directives();
        assert!(directives.starts_with("point_registration=info"));
        assert!(directives.contains("point_registration::solver=info"));
    }
}
