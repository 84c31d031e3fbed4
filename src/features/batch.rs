use crate::error::RegistrationError;
use crate::types::PointCloud;
use ndarray::{s, Array2, Array3, ArrayView2};
use std::ops::Range;

/// Clouds concatenated along the point axis, with per-cloud lengths
#[derive(Debug, Clone)]
pub struct StackedBatch {
    points: Array2<f32>,
    stack_lengths: Vec<usize>,
}

/// Dense (clouds x max_len x 3) layout with a validity mask
#[derive(Debug, Clone)]
pub struct PaddedBatch {
    pub points: Array3<f32>,
    pub mask: Array2<bool>,
}

impl StackedBatch {
    pub fn from_clouds(clouds: &[&PointCloud]) -> Self {
        let total: usize = clouds.iter().map(|c| c.len()).sum();
        let mut points = Array2::<f32>::zeros((total, 3));
        let mut row = 0;

        for cloud in clouds {
            for p in cloud.points() {
                points[[row, 0]] = p.x as f32;
                points[[row, 1]] = p.y as f32;
                points[[row, 2]] = p.z as f32;
                row += 1;
            }
        }

        Self {
            points,
            stack_lengths: clouds.iter().map(|c| c.len()).collect(),
        }
    }

    pub fn points(&self) -> &Array2<f32> {
        &self.points
    }

    pub fn stack_lengths(&self) -> &[usize] {
        &self.stack_lengths
    }

    pub fn num_clouds(&self) -> usize {
        self.stack_lengths.len()
    }

    pub fn total_len(&self) -> usize {
        self.points.nrows()
    }

    /// Row range of cloud `index` inside the stacked arrays
    pub fn cloud_range(&self, index: usize) -> Range<usize> {
        let start: usize = self.stack_lengths[..index].iter().sum();
        start..start + self.stack_lengths[index]
    }

    pub fn cloud_points(&self, index: usize) -> ArrayView2<'_, f32> {
        self.points.slice(s![self.cloud_range(index), ..])
    }

    pub fn padded(&self) -> PaddedBatch {
        let max_len = self.stack_lengths.iter().copied().max().unwrap_or(0);
        let mut points = Array3::<f32>::zeros((self.num_clouds(), max_len, 3));
        let mut mask = Array2::<bool>::from_elem((self.num_clouds(), max_len), false);

        for cloud in 0..self.num_clouds() {
            let view = self.cloud_points(cloud);
            let len = view.nrows();
            points.slice_mut(s![cloud, ..len, ..]).assign(&view);
            mask.slice_mut(s![cloud, ..len]).fill(true);
        }

        PaddedBatch { points, mask }
    }
}

/// Raw model output, parallel to the stacked batch
#[derive(Debug, Clone)]
pub struct FeatureOutput {
    pub features: Array2<f32>,
    pub overlap: Vec<f32>,
    pub saliency: Vec<f32>,
}

/// Model output for a single cloud
#[derive(Debug, Clone)]
pub struct CloudFeatures {
    pub features: Array2<f32>,
    pub overlap: Vec<f32>,
    pub saliency: Vec<f32>,
}

impl CloudFeatures {
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.nrows() == 0
    }

    pub fn feature_dim(&self) -> usize {
        self.features.ncols()
    }
}

impl FeatureOutput {
    /// Stack per-cloud outputs back into one batch-shaped output
    pub fn concat(parts: &[CloudFeatures]) -> anyhow::Result<Self> {
        let views: Vec<_> = parts.iter().map(|p| p.features.view()).collect();
        let features = ndarray::concatenate(ndarray::Axis(0), &views)?;

        Ok(Self {
            features,
            overlap: parts.iter().flat_map(|p| p.overlap.iter().copied()).collect(),
            saliency: parts.iter().flat_map(|p| p.saliency.iter().copied()).collect(),
        })
    }

    /// Check that all three outputs cover every stacked point
    pub fn validate_against(&self, batch: &StackedBatch) -> Result<(), RegistrationError> {
        let total = batch.total_len();
        let lengths = [
            ("features", self.features.nrows()),
            ("overlap", self.overlap.len()),
            ("saliency", self.saliency.len()),
        ];

        for (name, len) in lengths {
            if len != total {
                return Err(RegistrationError::FeatureModel(format!(
                    "{} has {} rows, batch has {} points",
                    name, len, total
                )));
            }
        }

        if self.features.ncols() == 0 {
            return Err(RegistrationError::FeatureModel(
                "feature vectors are empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Split into per-cloud outputs following the batch's stack lengths
    pub fn split(&self, batch: &StackedBatch) -> Result<Vec<CloudFeatures>, RegistrationError> {
        self.validate_against(batch)?;

        Ok((0..batch.num_clouds())
            .map(|cloud| {
                let range = batch.cloud_range(cloud);
                CloudFeatures {
                    features: self.features.slice(s![range.clone(), ..]).to_owned(),
                    overlap: self.overlap[range.clone()].to_vec(),
                    saliency: self.saliency[range].to_vec(),
                }
            })
            .collect())
    }
}
