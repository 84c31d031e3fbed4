//! Closed-form least-squares rigid alignment (Kabsch / Umeyama without scale).

use crate::types::RigidTransform;
use nalgebra::{Matrix3, Point3, Vector3};
use thiserror::Error;

/// Relative size below which a singular value counts as zero
const RANK_EPSILON: f64 = 1e-9;

/// Reasons a closed-form fit can fail. All of them are recoverable by the
/// caller drawing a different sample.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitError {
    #[error("Need at least 3 point pairs, got {0}")]
    TooFewPoints(usize),

    #[error("Point configuration is degenerate (collinear or coincident)")]
    Degenerate,

    #[error("SVD decomposition failed to produce U or V^T matrices")]
    SvdFailed,
}

/// Least-squares rigid transform mapping `source[i]` onto `target[i]`.
///
/// The rotation is always proper: when the SVD solution is a reflection, the
/// column of V belonging to the smallest singular value is negated.
pub fn fit_rigid(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
) -> Result<RigidTransform, FitError> {
    let n = source.len().min(target.len());
    if n < 3 {
        return Err(FitError::TooFewPoints(n));
    }

    let source_centroid = centroid(&source[..n]);
    let target_centroid = centroid(&target[..n]);

    let mut h = Matrix3::zeros();
    for (s, t) in source[..n].iter().zip(&target[..n]) {
        h += (s.coords - source_centroid) * (t.coords - target_centroid).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or(FitError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(FitError::SvdFailed)?;

    let singular = svd.singular_values;
    let mut sorted = [singular[0], singular[1], singular[2]];
    sorted.sort_by(|a, b| b.total_cmp(a));
    if !sorted[0].is_finite() || sorted[0] <= f64::EPSILON || sorted[1] <= RANK_EPSILON * sorted[0]
    {
        return Err(FitError::Degenerate);
    }

    let mut v = v_t.transpose();
    let mut rotation = v * u.transpose();

    // Handle reflection case
    if rotation.determinant() < 0.0 {
        let weakest = singular.imin();
        v.column_mut(weakest).neg_mut();
        rotation = v * u.transpose();
    }

    if rotation.determinant() <= 0.0 || !rotation.iter().all(|x| x.is_finite()) {
        return Err(FitError::Degenerate);
    }

    let translation = target_centroid - rotation * source_centroid;
    Ok(RigidTransform::from_parts(rotation, translation))
}

/// True when the triangle spanned by three points has (near) zero area
/// relative to its longest edge.
pub fn is_degenerate_triangle(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    epsilon: f64,
) -> bool {
    let ab = b - a;
    let ac = c - a;
    let bc = c - b;
    let longest_sq = ab.norm_squared().max(ac.norm_squared()).max(bc.norm_squared());
    if longest_sq <= f64::EPSILON {
        return true;
    }
    ab.cross(&ac).norm() <= epsilon * longest_sq
}

fn centroid(points: &[Point3<f64>]) -> Vector3<f64> {
    points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / points.len() as f64
}
