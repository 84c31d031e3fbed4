use crate::types::PointCloud;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// On-disk cloud: a bare list of triples or an object with a `points` field
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CloudFile {
    Triples(Vec<[f64; 3]>),
    Object { points: Vec<[f64; 3]> },
}

#[derive(Serialize)]
struct CloudFileOut<'a> {
    points: &'a [[f64; 3]],
}

pub fn load_point_cloud<P: AsRef<Path>>(path: P) -> crate::Result<PointCloud> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read point cloud {}", path.display()))?;
    let triples = match serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON point list", path.display()))?
    {
        CloudFile::Triples(points) | CloudFile::Object { points } => points,
    };

    let cloud = PointCloud::from_triples(&triples)
        .with_context(|| format!("Invalid point cloud in {}", path.display()))?;
    tracing::debug!(path = %path.display(), points = cloud.len(), "Loaded point cloud");
    Ok(cloud)
}

pub fn save_point_cloud<P: AsRef<Path>>(path: P, cloud: &PointCloud) -> crate::Result<()> {
    let path = path.as_ref();
    let triples = cloud.to_triples();
    let content = serde_json::to_string(&CloudFileOut { points: &triples })?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write point cloud {}", path.display()))?;
    Ok(())
}

/// Sanity checks beyond construction: enough points and a non-degenerate extent
pub fn validate_point_cloud(cloud: &PointCloud, min_points: usize) -> crate::Result<()> {
    if cloud.len() < min_points {
        return Err(anyhow::anyhow!(
            "Point cloud too small: {} points, minimum: {}",
            cloud.len(),
            min_points
        ));
    }

    let centroid = cloud.centroid();
    let spread = cloud
        .points()
        .iter()
        .map(|p| (p - centroid).norm())
        .fold(0.0_f64, f64::max);
    if cloud.len() > 1 && spread <= f64::EPSILON {
        return Err(anyhow::anyhow!("All {} points coincide", cloud.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_both_file_layouts_load() {
        let dir = tempfile::tempdir().unwrap();

        let bare = dir.path().join("bare.json");
        fs::write(&bare, "[[0,0,0],[1,2,3]]").unwrap();
        assert_eq!(load_point_cloud(&bare).unwrap().len(), 2);

        let object = dir.path().join("object.json");
        fs::write(&object, r#"{"points": [[0,0,0],[1,2,3],[4,5,6]]}"#).unwrap();
        assert_eq!(load_point_cloud(&object).unwrap().len(), 3);
    }

    #[test]
    fn test_save_then_load() {
        let cloud = PointCloud::from_triples(&[[0.5, -1.0, 2.0], [3.0, 0.0, 1.0]]).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.flush().unwrap();

        save_point_cloud(file.path(), &cloud).unwrap();
        let loaded = load_point_cloud(file.path()).unwrap();
        assert_eq!(loaded.to_triples(), cloud.to_triples());
    }

    #[test]
    fn test_empty_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        fs::write(&path, "[]").unwrap();
        assert!(load_point_cloud(&path).is_err());
    }

    #[test]
    fn test_validate_point_cloud() {
        let cloud = PointCloud::from_triples(&[[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]).unwrap();
        assert!(validate_point_cloud(&cloud, 3).is_err());
        assert!(validate_point_cloud(&cloud, 1).is_err());

        let cloud = PointCloud::from_triples(&[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]).unwrap();
        assert!(validate_point_cloud(&cloud, 2).is_ok());
    }
}
