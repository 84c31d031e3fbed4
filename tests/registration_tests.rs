use nalgebra::{Point3, Vector3};
use point_registration::analysis::{rotation_error_degrees, translation_error};
use point_registration::data::{SyntheticConfig, SyntheticPair};
use point_registration::features::{DescriptorConfig, LocalGeometryExtractor};
use point_registration::matching::MatchingConfig;
use point_registration::solver::NoSolutionReason;
use point_registration::{
    PointCloud, RegistrationConfig, RegistrationResult, Registrar, RigidTransform,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn solve(registrar: &Registrar, pair: &SyntheticPair, seed: u64) -> RegistrationResult {
    let mut rng = StdRng::seed_from_u64(seed);
    registrar.register(&pair.source, &pair.target, &mut rng).unwrap()
}

fn assert_close(result: &RegistrationResult, truth: &RigidTransform, max_degrees: f64, max_offset: f64) {
    let estimate = result.transform().expect("registration should succeed");
    let rotation_error = rotation_error_degrees(estimate, truth);
    let offset = translation_error(estimate, truth);
    assert!(rotation_error < max_degrees, "rotation error {}°", rotation_error);
    assert!(offset < max_offset, "translation error {}", offset);
}

#[test]
fn test_end_to_end_thirty_degrees_about_z() {
    let mut rng = StdRng::seed_from_u64(2024);
    let pair = SyntheticPair::generate(&SyntheticConfig::default(), &mut rng).unwrap();
    assert_eq!(pair.source.len(), 500);
    assert!(pair.correct_fraction() >= 0.8);

    let registrar = Registrar::new(Arc::new(pair.oracle()), RegistrationConfig::default()).unwrap();
    let result = solve(&registrar, &pair, 1);

    assert_close(&result, &pair.transform, 1.0, 0.05);

    let expected = RigidTransform::from_axis_angle(
        &Vector3::z_axis(),
        30f64.to_radians(),
        Vector3::new(1.0, 0.0, 0.0),
    );
    assert_close(&result, &expected, 1.0, 0.05);

    let response = result.to_response();
    let rows = response.transform.unwrap();
    assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
    assert!((rows[0][3] - 1.0).abs() < 0.05);
}

#[test]
fn test_noise_outliers_and_subsampling() {
    let mut rng = StdRng::seed_from_u64(31);
    let config = SyntheticConfig {
        points: 800,
        noise_sigma: 0.005,
        outlier_fraction: 0.2,
        ..Default::default()
    };
    let pair = SyntheticPair::generate(&config, &mut rng).unwrap();

    let registrar = Registrar::new(
        Arc::new(pair.oracle()),
        RegistrationConfig {
            n_points: 400,
            ..Default::default()
        },
    )
    .unwrap();
    let result = solve(&registrar, &pair, 2);

    assert_close(&result, &pair.transform, 1.0, 0.05);
    if let RegistrationResult::Solved(registration) = &result {
        assert_eq!(registration.source_keypoints, 400);
        assert_eq!(registration.target_keypoints, 400);
        assert!(registration.inlier_count >= 10);
        assert!(registration.fitness > 0.0 && registration.fitness <= 1.0);
    }
}

#[test]
fn test_mutual_matching_end_to_end() {
    let mut rng = StdRng::seed_from_u64(5);
    let pair = SyntheticPair::generate(&SyntheticConfig::default(), &mut rng).unwrap();

    let registrar = Registrar::new(
        Arc::new(pair.oracle()),
        RegistrationConfig {
            matching: MatchingConfig {
                mutual: true,
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();
    let result = solve(&registrar, &pair, 3);

    assert_close(&result, &pair.transform, 1.0, 0.05);
}

#[test]
fn test_geometric_descriptor_registers_rigid_copy() {
    let mut rng = StdRng::seed_from_u64(8);
    let points: Vec<_> = (0..300)
        .map(|_| {
            Point3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-0.5..0.5),
            )
        })
        .collect();
    let source = PointCloud::new(points).unwrap();
    let truth = RigidTransform::from_axis_angle(
        &Vector3::x_axis(),
        20f64.to_radians(),
        Vector3::new(0.2, 0.3, -0.1),
    );
    let target = source.transformed(&truth);

    let extractor = LocalGeometryExtractor::new(DescriptorConfig::default());
    let registrar = Registrar::new(Arc::new(extractor), RegistrationConfig::default()).unwrap();
    let result = registrar.register(&source, &target, &mut rng).unwrap();

    assert_close(&result, &truth, 1.0, 0.05);
}

#[test]
fn test_same_seed_same_result() {
    let mut rng = StdRng::seed_from_u64(9);
    let config = SyntheticConfig {
        points: 600,
        ..Default::default()
    };
    let pair = SyntheticPair::generate(&config, &mut rng).unwrap();
    let registrar = Registrar::new(
        Arc::new(pair.oracle()),
        RegistrationConfig {
            n_points: 300,
            ..Default::default()
        },
    )
    .unwrap();

    let first = solve(&registrar, &pair, 10).to_response();
    let second = solve(&registrar, &pair, 10).to_response();
    assert_eq!(first, second);
}

#[test]
fn test_unrelated_features_give_null_transform() {
    let mut rng = StdRng::seed_from_u64(12);
    let config = SyntheticConfig {
        points: 300,
        correct_match_fraction: 0.0,
        ..Default::default()
    };
    let pair = SyntheticPair::generate(&config, &mut rng).unwrap();

    let registrar = Registrar::new(
        Arc::new(pair.oracle()),
        RegistrationConfig {
            ransac: point_registration::solver::RansacConfig {
                inlier_threshold: 0.01,
                max_iterations: 5_000,
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();
    let result = solve(&registrar, &pair, 4);

    match &result {
        RegistrationResult::NoSolution { reason, .. } => {
            assert_eq!(*reason, NoSolutionReason::NoConsensus)
        }
        RegistrationResult::Solved(r) => panic!("unexpected solution with {} inliers", r.inlier_count),
    }
    assert_eq!(
        serde_json::to_string(&result.to_response()).unwrap(),
        r#"{"transform":null}"#
    );
}
