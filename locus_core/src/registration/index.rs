// locus_core/src/registration/index.rs

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use nalgebra::{Isometry3, Point3};

use super::Parallelism;
use crate::messages::PointCloud;

/// Nearest-neighbour index over the target cloud.
///
/// Built once per map with a balanced immutable tree, which accepts any
/// number of points sharing a coordinate (flat floors, axis-aligned walls).
pub struct TargetIndex {
    tree: Option<ImmutableKdTree<f64, 3>>,
    points: Vec<Point3<f64>>,
}

impl TargetIndex {
    pub fn build(cloud: &PointCloud) -> Self {
        let points: Vec<Point3<f64>> = cloud.positions().copied().collect();
        let entries: Vec<[f64; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
        let tree = (!entries.is_empty()).then(|| ImmutableKdTree::new_from_slice(&entries));
        Self { tree, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> &Point3<f64> {
        &self.points[index]
    }

    /// Index and squared distance of the closest target point.
    pub fn nearest(&self, query: &Point3<f64>) -> Option<(usize, f64)> {
        let hit = self
            .tree
            .as_ref()?
            .nearest_one::<SquaredEuclidean>(&[query.x, query.y, query.z]);
        Some((hit.item as usize, hit.distance))
    }

    /// PCL-style fitness: mean squared nearest-neighbour distance of the
    /// transformed source points. Returns `f64::MAX` when nothing matched.
    pub fn fitness_score(
        &self,
        source: &[Point3<f64>],
        transform: &Isometry3<f64>,
        parallelism: &Parallelism,
    ) -> f64 {
        let distances = parallelism.map(source.len(), |i| {
            self.nearest(&(transform * source[i])).map(|(_, d2)| d2)
        });
        let (sum, count) = distances
            .into_iter()
            .flatten()
            .fold((0.0, 0usize), |(sum, n), d2| (sum + d2, n + 1));
        if count == 0 {
            f64::MAX
        } else {
            sum / count as f64
        }
    }
}
