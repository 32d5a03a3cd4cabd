// locus_core/src/preprocessing/filters.rs

use nalgebra::Vector3;
use std::collections::BTreeMap;

use crate::config::FilterConfig;
use crate::messages::{Point, PointCloud};

/// Keeps points whose horizontal range lies in `[min_range, max_range]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeFilter {
    pub min_range: f64,
    pub max_range: f64,
}

impl RangeFilter {
    pub fn new(min_range: f64, max_range: f64) -> Self {
        Self { min_range, max_range }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(config.scan_min_range, config.scan_max_range)
    }

    pub fn apply(&self, cloud: &PointCloud) -> PointCloud {
        let points = cloud
            .points
            .iter()
            .filter(|p| {
                let r = p.horizontal_range();
                r >= self.min_range && r <= self.max_range
            })
            .copied()
            .collect();
        cloud.with_same_header(points)
    }
}

/// Replaces all points falling in the same cubic voxel by their centroid.
///
/// Output order follows voxel index order, so identical input always yields
/// identical output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    pub leaf_size: f64,
}

#[derive(Default)]
struct VoxelAccumulator {
    sum: Vector3<f64>,
    count: usize,
    intensity_sum: f64,
    intensity_count: usize,
}

impl VoxelGrid {
    pub fn new(leaf_size: f64) -> Self {
        Self { leaf_size }
    }

    pub fn is_enabled(&self) -> bool {
        self.leaf_size > 0.0
    }

    pub fn filter(&self, cloud: &PointCloud) -> PointCloud {
        if !self.is_enabled() {
            return cloud.clone();
        }

        let inv_leaf = 1.0 / self.leaf_size;
        let mut voxels: BTreeMap<(i64, i64, i64), VoxelAccumulator> = BTreeMap::new();
        for point in &cloud.points {
            let p = &point.position;
            let key = (
                (p.x * inv_leaf).floor() as i64,
                (p.y * inv_leaf).floor() as i64,
                (p.z * inv_leaf).floor() as i64,
            );
            let acc = voxels.entry(key).or_default();
            acc.sum += p.coords;
            acc.count += 1;
            if let Some(intensity) = point.intensity {
                acc.intensity_sum += f64::from(intensity);
                acc.intensity_count += 1;
            }
        }

        let points = voxels
            .into_values()
            .map(|acc| {
                let centroid = acc.sum / acc.count as f64;
                let mut point = Point::new(centroid.x, centroid.y, centroid.z);
                if acc.intensity_count > 0 {
                    point.intensity = Some((acc.intensity_sum / acc.intensity_count as f64) as f32);
                }
                point
            })
            .collect();
        cloud.with_same_header(points)
    }
}
