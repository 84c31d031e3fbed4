use point_registration::config::{load_config, load_config_or_default, Config, ConfigFormat};
use point_registration::logging::LoggingConfig;
use point_registration::matching::FeatureMetric;
use point_registration::sampling::ScorePolicy;
use std::fs;

#[test]
fn test_toml_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registration.toml");

    let mut config = Config::default();
    config.sampling.n_points = 512;
    config.sampling.score_policy = ScorePolicy::Strict;
    config.matching.metric = FeatureMetric::Cosine;
    config.ransac.timeout_ms = Some(2_000);
    config.server.port = 9100;

    config.save_to_file(&path, ConfigFormat::Toml).unwrap();
    let loaded = Config::load_from_file(&path).unwrap();

    assert_eq!(loaded.sampling.n_points, 512);
    assert_eq!(loaded.sampling.score_policy, ScorePolicy::Strict);
    assert_eq!(loaded.matching.metric, FeatureMetric::Cosine);
    assert_eq!(loaded.ransac.timeout_ms, Some(2_000));
    assert_eq!(loaded.server.port, 9100);
}

#[test]
fn test_json_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registration.json");

    let mut config = Config::default();
    config.matching.mutual = true;
    config.ransac.edge_length_ratio = None;
    config.logging = LoggingConfig::development();

    config.save_to_file(&path, ConfigFormat::Json).unwrap();
    let loaded = Config::load_from_file(&path).unwrap();

    assert!(loaded.matching.mutual);
    assert_eq!(loaded.ransac.edge_length_ratio, None);
    assert_eq!(loaded.logging.solver_level, "trace");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let config = load_config_or_default(Some("/nonexistent/registration.toml"));
    assert_eq!(config.sampling.n_points, 1000);
    assert_eq!(config.server.port, 8000);
}

#[test]
fn test_invalid_values_fall_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[sampling]\nn_points = 0\n").unwrap();

    assert!(Config::load_from_file(&path).unwrap().validate().is_err());

    let config = load_config_or_default(path.to_str());
    assert_eq!(config.sampling.n_points, 1000);
}

#[test]
fn test_unknown_policy_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.toml");
    fs::write(&path, "[sampling]\nscore_policy = \"lenient\"\n").unwrap();

    assert!(Config::load_from_file(&path).is_err());
}

#[test]
fn test_registration_settings_follow_config() {
    let mut config = Config::default();
    config.sampling.n_points = 128;
    config.ransac.inlier_threshold = 0.02;
    config.matching.max_feature_distance = Some(0.5);

    let registration = config.registration();
    assert_eq!(registration.n_points, 128);
    assert_eq!(registration.ransac.inlier_threshold, 0.02);
    assert_eq!(registration.matching.max_feature_distance, Some(0.5));
    assert!(registration.validate().is_ok());
}

#[test]
fn test_strict_load_reports_every_problem() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[sampling]\nn_points = 0\n\n[server]\nport = 0\n").unwrap();

    let message = format!("{:#}", load_config(&path).unwrap_err());
    assert!(message.contains("sampling.n_points"));
    assert!(message.contains("server.port"));
}

#[test]
fn test_strict_load_accepts_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("good.toml");
    fs::write(&path, "[sampling]\nn_points = 64\n").unwrap();

    assert_eq!(load_config(&path).unwrap().sampling.n_points, 64);
    assert!(load_config(dir.path().join("missing.toml")).is_err());
}
