// locus_core/src/pipeline/publisher.rs

use crate::messages::{Path, PointCloud, PoseWithCovarianceStamped, TransformStamped};

/// The sink for everything the tracker emits.
///
/// The node implements this over its topic bus; tests implement it with a
/// recorder. Publishing never fails from the tracker's point of view.
pub trait Publisher {
    fn publish_pose(&mut self, pose: &PoseWithCovarianceStamped);
    fn publish_path(&mut self, path: &Path);
    fn publish_transform(&mut self, transform: &TransformStamped);
    fn publish_map(&mut self, map: &PointCloud);
}
