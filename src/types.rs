use crate::error::RegistrationError;
use crate::solver::{NoSolutionReason, SolverStats};
use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

/// Tolerance used when checking that a matrix is a proper rotation
const ROTATION_TOLERANCE: f64 = 1e-6;

/// Ordered, non-empty set of finite 3-D points
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    points: Vec<Point3<f64>>,
}

impl PointCloud {
    /// Build a cloud, rejecting empty input and non-finite coordinates
    pub fn new(points: Vec<Point3<f64>>) -> Result<Self, RegistrationError> {
        if points.is_empty() {
            return Err(RegistrationError::InvalidInput(
                "point cloud must contain at least one point".to_string(),
            ));
        }

        if let Some(index) = points
            .iter()
            .position(|p| !p.coords.iter().all(|c| c.is_finite()))
        {
            return Err(RegistrationError::InvalidInput(format!(
                "point {} has a non-finite coordinate",
                index
            )));
        }

        Ok(Self { points })
    }

    pub fn from_triples(triples: &[[f64; 3]]) -> Result<Self, RegistrationError> {
        Self::new(
            triples
                .iter()
                .map(|&[x, y, z]| Point3::new(x, y, z))
                .collect(),
        )
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false for a constructed cloud; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_triples(&self) -> Vec<[f64; 3]> {
        self.points.iter().map(|p| [p.x, p.y, p.z]).collect()
    }

    pub fn centroid(&self) -> Point3<f64> {
        let sum = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords);
        Point3::from(sum / self.points.len() as f64)
    }

    /// Apply a rigid transform to every point
    pub fn transformed(&self, transform: &RigidTransform) -> PointCloud {
        PointCloud {
            points: self.points.iter().map(|p| transform.apply(p)).collect(),
        }
    }

    /// Sub-cloud made of the given indices. Callers guarantee that `indices`
    /// is non-empty and in range.
    pub(crate) fn select(&self, indices: &[usize]) -> PointCloud {
        PointCloud {
            points: indices.iter().map(|&i| self.points[i]).collect(),
        }
    }
}

/// Candidate point-to-point match, indices into the sampled clouds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub source: usize,
    pub target: usize,
    /// Distance between the two feature vectors
    pub feature_distance: f32,
}

impl Correspondence {
    pub fn new(source: usize, target: usize, feature_distance: f32) -> Self {
        Self {
            source,
            target,
            feature_distance,
        }
    }
}

/// Proper rotation plus translation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build a transform, rejecting rotations that are not orthonormal or
    /// that contain a reflection
    pub fn new(
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
    ) -> Result<Self, RegistrationError> {
        if !rotation.iter().chain(translation.iter()).all(|v| v.is_finite()) {
            return Err(RegistrationError::InvalidInput(
                "transform contains non-finite values".to_string(),
            ));
        }

        let orthogonality_error = (rotation.transpose() * rotation - Matrix3::identity()).amax();
        if orthogonality_error > ROTATION_TOLERANCE {
            return Err(RegistrationError::InvalidInput(format!(
                "rotation is not orthonormal (error {:.2e})",
                orthogonality_error
            )));
        }

        let det = rotation.determinant();
        if (det - 1.0).abs() > ROTATION_TOLERANCE {
            return Err(RegistrationError::InvalidInput(format!(
                "rotation determinant is {:.6}, expected +1",
                det
            )));
        }

        Ok(Self {
            rotation,
            translation,
        })
    }

    /// Caller guarantees `rotation` is a proper rotation
    pub(crate) fn from_parts(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_axis_angle(
        axis: &Unit<Vector3<f64>>,
        angle_radians: f64,
        translation: Vector3<f64>,
    ) -> Self {
        Self {
            rotation: Rotation3::from_axis_angle(axis, angle_radians).into_inner(),
            translation,
        }
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn apply(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * point.coords + self.translation)
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// `self` applied after `other`
    pub fn compose(&self, other: &RigidTransform) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Rotation magnitude in degrees
    pub fn rotation_angle_degrees(&self) -> f64 {
        let cos_angle = ((self.rotation.trace() - 1.0) / 2.0).clamp(-1.0, 1.0);
        cos_angle.acos().to_degrees()
    }

    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        matrix
    }

    /// Row-major 4x4 matrix, the wire representation
    pub fn to_row_major(&self) -> [[f64; 4]; 4] {
        let matrix = self.to_homogeneous();
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = matrix[(r, c)];
            }
        }
        rows
    }

    pub fn from_row_major(rows: &[[f64; 4]; 4]) -> Result<Self, RegistrationError> {
        if rows[3] != [0.0, 0.0, 0.0, 1.0] {
            return Err(RegistrationError::InvalidInput(
                "last row of a rigid transform must be [0, 0, 0, 1]".to_string(),
            ));
        }
        let rotation = Matrix3::from_fn(|r, c| rows[r][c]);
        let translation = Vector3::new(rows[0][3], rows[1][3], rows[2][3]);
        Self::new(rotation, translation)
    }
}

/// Successful registration with its quality statistics
#[derive(Debug, Clone)]
pub struct Registration {
    pub transform: RigidTransform,
    pub inlier_count: usize,
    pub correspondence_count: usize,
    /// Inlier count over correspondence count
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub source_keypoints: usize,
    pub target_keypoints: usize,
    pub stats: SolverStats,
}

/// Terminal outcome of one registration request
#[derive(Debug, Clone)]
pub enum RegistrationResult {
    Solved(Registration),
    NoSolution {
        reason: NoSolutionReason,
        stats: SolverStats,
    },
}

impl RegistrationResult {
    pub fn transform(&self) -> Option<&RigidTransform> {
        match self {
            Self::Solved(registration) => Some(&registration.transform),
            Self::NoSolution { .. } => None,
        }
    }

    pub fn stats(&self) -> &SolverStats {
        match self {
            Self::Solved(registration) => &registration.stats,
            Self::NoSolution { stats, .. } => stats,
        }
    }

    pub fn to_response(&self) -> TransformResponse {
        TransformResponse {
            transform: self.transform().map(RigidTransform::to_row_major),
        }
    }
}

/// Request body: two clouds as lists of `[x, y, z]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub src: Vec<[f64; 3]>,
    pub tgt: Vec<[f64; 3]>,
}

/// Response body: a full 4x4 matrix or `null`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResponse {
    pub transform: Option<[[f64; 4]; 4]>,
}
