// locus_core/src/registration/icp.rs

//! Point-to-point ICP serving the GICP registration family.
//!
//! Correspondences come from a k-d tree over the target; each iteration solves
//! the closed-form rigid alignment (Kabsch / SVD) of the matched pairs.

use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use tracing::trace;

use super::index::TargetIndex;
use super::{AlignmentOracle, AlignmentResult, Parallelism, RegistrationMethod, RegistrationParams};
use crate::messages::PointCloud;

/// Fewer matched pairs than this cannot constrain a 3-D rigid motion.
const MIN_CORRESPONDENCES: usize = 3;

pub struct IcpOracle {
    method: RegistrationMethod,
    max_iterations: u32,
    transform_epsilon: f64,
    max_correspondence_distance: f64,
    parallelism: Parallelism,
    target: Option<TargetIndex>,
}

impl IcpOracle {
    pub fn new(method: RegistrationMethod, params: &RegistrationParams, parallelism: Parallelism) -> Self {
        Self {
            method,
            max_iterations: params.ndt_max_iterations,
            transform_epsilon: params.transform_epsilon,
            max_correspondence_distance: params.max_correspondence_distance,
            parallelism,
            target: None,
        }
    }

    /// Matched `(source_point_transformed, target_point)` pairs within range.
    fn correspondences(
        &self,
        target: &TargetIndex,
        source: &[Point3<f64>],
        transform: &Isometry3<f64>,
    ) -> Vec<(Point3<f64>, Point3<f64>)> {
        let max_sq = self.max_correspondence_distance * self.max_correspondence_distance;
        self.parallelism
            .map(source.len(), |i| {
                let moved = transform * source[i];
                target
                    .nearest(&moved)
                    .filter(|&(_, d2)| d2 <= max_sq)
                    .map(|(j, _)| (moved, *target.point(j)))
            })
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Rigid motion minimizing the squared distance between paired points.
fn solve_rigid(pairs: &[(Point3<f64>, Point3<f64>)]) -> Option<Isometry3<f64>> {
    let n = pairs.len() as f64;
    let (sum_p, sum_q) = pairs
        .iter()
        .fold((Vector3::zeros(), Vector3::zeros()), |(sp, sq), (p, q)| {
            (sp + p.coords, sq + q.coords)
        });
    let centroid_p = sum_p / n;
    let centroid_q = sum_q / n;

    let h: Matrix3<f64> = pairs.iter().fold(Matrix3::zeros(), |acc, (p, q)| {
        acc + (p.coords - centroid_p) * (q.coords - centroid_q).transpose()
    });

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v = svd.v_t?.transpose();
    let mut r = v * u.transpose();
    if r.determinant() < 0.0 {
        // Reflection: flip the axis of least variance.
        let mut v_fixed = v;
        v_fixed.column_mut(2).neg_mut();
        r = v_fixed * u.transpose();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = centroid_q - rotation * centroid_p;
    Some(Isometry3::from_parts(Translation3::from(translation), rotation))
}

impl AlignmentOracle for IcpOracle {
    fn method(&self) -> RegistrationMethod {
        self.method
    }

    fn set_target(&mut self, target: &PointCloud) {
        self.target = Some(TargetIndex::build(target));
    }

    fn has_target(&self) -> bool {
        self.target.as_ref().is_some_and(|t| !t.is_empty())
    }

    fn align(&mut self, source: &PointCloud, initial_guess: &Isometry3<f64>) -> AlignmentResult {
        let Some(target) = self.target.as_ref().filter(|t| !t.is_empty()) else {
            return AlignmentResult::failed(initial_guess);
        };
        if source.len() < MIN_CORRESPONDENCES {
            return AlignmentResult::failed(initial_guess);
        }
        let points: Vec<Point3<f64>> = source.positions().copied().collect();

        let mut transform = *initial_guess;
        let mut iterations = 0;
        for iter in 0..self.max_iterations {
            iterations = iter + 1;
            let pairs = self.correspondences(target, &points, &transform);
            if pairs.len() < MIN_CORRESPONDENCES {
                trace!(iteration = iterations, pairs = pairs.len(), "Too few correspondences.");
                return AlignmentResult {
                    iterations,
                    ..AlignmentResult::failed(initial_guess)
                };
            }
            let Some(delta) = solve_rigid(&pairs) else {
                return AlignmentResult {
                    iterations,
                    ..AlignmentResult::failed(initial_guess)
                };
            };
            transform = delta * transform;

            if delta.translation.vector.norm() < self.transform_epsilon
                && delta.rotation.angle() < self.transform_epsilon
            {
                break;
            }
        }

        transform.rotation.renormalize();
        AlignmentResult {
            final_transform: transform,
            converged: true,
            fitness_score: target.fitness_score(&points, &transform, &self.parallelism),
            iterations,
        }
    }
}
