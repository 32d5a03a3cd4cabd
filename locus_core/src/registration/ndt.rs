// locus_core/src/registration/ndt.rs

//! Normal Distributions Transform serving the NDT registration family.
//!
//! The target is summarized as one Gaussian per occupied voxel. Each iteration
//! linearizes the point-to-distribution residuals of the transformed source
//! around the current pose and takes a Gauss-Newton step, clamped to the
//! configured step length.

use nalgebra::{Isometry3, Matrix3, Matrix3x6, Matrix6, Point3, Vector3, Vector6};
use std::collections::HashMap;
use tracing::trace;

use super::index::TargetIndex;
use super::{AlignmentOracle, AlignmentResult, Parallelism, RegistrationMethod, RegistrationParams};
use crate::messages::PointCloud;

/// Cells with fewer points have no meaningful covariance.
const MIN_POINTS_PER_CELL: usize = 6;
/// Eigenvalues are floored at this fraction of the largest one.
const EIGEN_RATIO_FLOOR: f64 = 0.01;
/// A step must be backed by at least this many point residuals.
const MIN_CONTRIBUTING_POINTS: usize = 6;

type CellKey = (i64, i64, i64);

#[derive(Debug, Clone)]
struct Cell {
    mean: Vector3<f64>,
    information: Matrix3<f64>,
}

#[derive(Debug, Clone)]
struct NdtGrid {
    inv_resolution: f64,
    cells: HashMap<CellKey, Cell>,
}

impl NdtGrid {
    fn build(cloud: &PointCloud, resolution: f64) -> Self {
        let inv_resolution = 1.0 / resolution;
        let mut sums: HashMap<CellKey, (Vector3<f64>, Matrix3<f64>, usize)> = HashMap::new();
        for p in cloud.positions() {
            let entry = sums
                .entry(Self::key(inv_resolution, p))
                .or_insert((Vector3::zeros(), Matrix3::zeros(), 0));
            entry.0 += p.coords;
            entry.1 += p.coords * p.coords.transpose();
            entry.2 += 1;
        }

        let cells = sums
            .into_iter()
            .filter(|(_, (_, _, n))| *n >= MIN_POINTS_PER_CELL)
            .filter_map(|(key, (sum, outer, n))| {
                let n = n as f64;
                let mean = sum / n;
                let covariance = (outer - mean * mean.transpose() * n) / (n - 1.0);
                Self::regularized_information(covariance).map(|information| (key, Cell { mean, information }))
            })
            .collect();

        Self {
            inv_resolution,
            cells,
        }
    }

    fn key(inv_resolution: f64, p: &Point3<f64>) -> CellKey {
        (
            (p.x * inv_resolution).floor() as i64,
            (p.y * inv_resolution).floor() as i64,
            (p.z * inv_resolution).floor() as i64,
        )
    }

    fn cell_at(&self, p: &Point3<f64>) -> Option<&Cell> {
        self.cells.get(&Self::key(self.inv_resolution, p))
    }

    /// Inverse covariance with near-singular directions inflated, so planar
    /// patches do not produce infinite stiffness.
    fn regularized_information(covariance: Matrix3<f64>) -> Option<Matrix3<f64>> {
        let eigen = covariance.symmetric_eigen();
        let max = eigen.eigenvalues.max();
        if !(max > 0.0) {
            return None;
        }
        let floor = max * EIGEN_RATIO_FLOOR;
        let inv_diag = Matrix3::from_diagonal(&eigen.eigenvalues.map(|l| 1.0 / l.max(floor)));
        Some(eigen.eigenvectors * inv_diag * eigen.eigenvectors.transpose())
    }
}

pub struct NdtOracle {
    method: RegistrationMethod,
    resolution: f64,
    step_size: f64,
    max_iterations: u32,
    transform_epsilon: f64,
    parallelism: Parallelism,
    grid: Option<NdtGrid>,
    target_index: Option<TargetIndex>,
}

impl NdtOracle {
    pub fn new(method: RegistrationMethod, params: &RegistrationParams, parallelism: Parallelism) -> Self {
        Self {
            method,
            resolution: params.ndt_resolution,
            step_size: params.ndt_step_size,
            max_iterations: params.ndt_max_iterations,
            transform_epsilon: params.transform_epsilon,
            parallelism,
            grid: None,
            target_index: None,
        }
    }

    /// Accumulates the normal equations `H dx = -g` over all source points.
    /// Parameters are ordered (tx, ty, tz, rx, ry, rz) for a left perturbation.
    fn normal_equations(
        &self,
        grid: &NdtGrid,
        source: &[Point3<f64>],
        transform: &Isometry3<f64>,
    ) -> (Matrix6<f64>, Vector6<f64>, usize) {
        let terms = self.parallelism.map(source.len(), |i| {
            let moved = transform * source[i];
            grid.cell_at(&moved).map(|cell| {
                let residual = moved.coords - cell.mean;
                let mut jacobian = Matrix3x6::zeros();
                jacobian.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
                jacobian
                    .fixed_view_mut::<3, 3>(0, 3)
                    .copy_from(&(-moved.coords.cross_matrix()));
                let jt_info = jacobian.transpose() * cell.information;
                (jt_info * jacobian, jt_info * residual)
            })
        });

        terms.into_iter().flatten().fold(
            (Matrix6::zeros(), Vector6::zeros(), 0),
            |(h, g, n), (hi, gi)| (h + hi, g + gi, n + 1),
        )
    }
}

impl AlignmentOracle for NdtOracle {
    fn method(&self) -> RegistrationMethod {
        self.method
    }

    fn set_target(&mut self, target: &PointCloud) {
        self.grid = Some(NdtGrid::build(target, self.resolution));
        self.target_index = Some(TargetIndex::build(target));
    }

    fn has_target(&self) -> bool {
        self.grid.as_ref().is_some_and(|g| !g.cells.is_empty())
    }

    fn align(&mut self, source: &PointCloud, initial_guess: &Isometry3<f64>) -> AlignmentResult {
        let (Some(grid), Some(index)) = (self.grid.as_ref(), self.target_index.as_ref()) else {
            return AlignmentResult::failed(initial_guess);
        };
        if grid.cells.is_empty() || source.is_empty() {
            return AlignmentResult::failed(initial_guess);
        }
        let points: Vec<Point3<f64>> = source.positions().copied().collect();

        let mut transform = *initial_guess;
        let mut iterations = 0;
        for iter in 0..self.max_iterations {
            iterations = iter + 1;
            let (hessian, gradient, contributing) = self.normal_equations(grid, &points, &transform);
            if contributing < MIN_CONTRIBUTING_POINTS {
                trace!(iteration = iterations, contributing, "Too few points fall in target cells.");
                return AlignmentResult {
                    iterations,
                    ..AlignmentResult::failed(initial_guess)
                };
            }
            let Some(step) = hessian.cholesky().map(|c| c.solve(&(-gradient))) else {
                return AlignmentResult {
                    iterations,
                    ..AlignmentResult::failed(initial_guess)
                };
            };

            let length = step.norm();
            let step = if length > self.step_size {
                step * (self.step_size / length)
            } else {
                step
            };
            let delta = Isometry3::new(step.fixed_rows::<3>(0).into_owned(), step.fixed_rows::<3>(3).into_owned());
            transform = delta * transform;

            if step.norm() < self.transform_epsilon {
                break;
            }
        }

        transform.rotation.renormalize();
        AlignmentResult {
            final_transform: transform,
            converged: true,
            fitness_score: index.fitness_score(&points, &transform, &self.parallelism),
            iterations,
        }
    }
}
