use crate::types::RigidTransform;

/// Geodesic angle between two rotations, in degrees
pub fn rotation_error_degrees(estimate: &RigidTransform, ground_truth: &RigidTransform) -> f64 {
    let relative = RigidTransform::from_parts(
        estimate.rotation().transpose() * ground_truth.rotation(),
        nalgebra::Vector3::zeros(),
    );
    relative.rotation_angle_degrees()
}

pub fn translation_error(estimate: &RigidTransform, ground_truth: &RigidTransform) -> f64 {
    (estimate.translation() - ground_truth.translation()).norm()
}
