// locus_core/src/preprocessing/deskew.rs

use nalgebra::{Point3, UnitQuaternion, Vector3};
use std::collections::VecDeque;
use std::f64::consts::TAU;
use tracing::debug;

use crate::messages::PointCloud;
use crate::types::Timestamp;

/// An inertial sample already rotated into the base frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InertialSample {
    pub timestamp: Timestamp,
    pub angular_velocity: Vector3<f64>,
    pub linear_acceleration: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

/// Removes sensor-motion distortion from a sweeping scan.
///
/// Every point is re-expressed in the base frame *at the scan stamp*. The
/// rotation between the scan stamp and a point's acquisition time comes from
/// integrating buffered gyro rates; the translation comes from the most recent
/// linear velocity hint (usually wheel odometry).
#[derive(Debug, Clone)]
pub struct ScanDeskewer {
    samples: VecDeque<InertialSample>,
    capacity: usize,
    scan_period: f64,
    velocity_hint: Vector3<f64>,
}

impl ScanDeskewer {
    pub fn new(capacity: usize, scan_period: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            scan_period,
            velocity_hint: Vector3::zeros(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn set_velocity_hint(&mut self, velocity: Vector3<f64>) {
        self.velocity_hint = velocity;
    }

    /// Buffers one base-frame inertial sample, keeping the buffer ordered by
    /// stamp and bounded by count (oldest dropped first).
    pub fn ingest_inertial(
        &mut self,
        angular_velocity: Vector3<f64>,
        linear_acceleration: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
        timestamp: Timestamp,
    ) {
        let sample = InertialSample {
            timestamp,
            angular_velocity,
            linear_acceleration,
            orientation,
        };
        let index = self.samples.partition_point(|s| s.timestamp <= timestamp);
        self.samples.insert(index, sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Returns a motion-corrected copy of `scan`, or an unchanged copy when the
    /// buffer does not cover the sweep.
    pub fn deskew(&self, scan: &PointCloud, scan_timestamp: Timestamp) -> PointCloud {
        if scan.is_empty() {
            return scan.clone();
        }
        if !self.covers(scan_timestamp) {
            debug!(
                stamp = scan_timestamp,
                buffered = self.samples.len(),
                "No inertial data covers the scan, skipping deskew."
            );
            return scan.clone();
        }

        let offsets = self.point_time_offsets(scan);
        let horizon = offsets.iter().copied().fold(0.0_f64, f64::max);
        let profile = RotationProfile::integrate(&self.samples, scan_timestamp, horizon);

        let mut corrected = scan.clone();
        for (point, tau) in corrected.points.iter_mut().zip(offsets) {
            let rotation = profile.at(tau);
            let p: Point3<f64> = point.position;
            point.position = rotation * p + self.velocity_hint * tau;
        }
        corrected
    }

    fn covers(&self, scan_timestamp: Timestamp) -> bool {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => {
                first.timestamp <= scan_timestamp + self.scan_period
                    && last.timestamp >= scan_timestamp - self.scan_period
            }
            _ => false,
        }
    }

    /// Per-point time since the scan stamp. Explicit offsets win; otherwise
    /// the offset is the counter-clockwise azimuth swept since the first point.
    fn point_time_offsets(&self, scan: &PointCloud) -> Vec<f64> {
        let first = &scan.points[0].position;
        let start_azimuth = first.y.atan2(first.x);
        scan.points
            .iter()
            .map(|point| match point.time_offset {
                Some(offset) => offset.max(0.0),
                None => {
                    let azimuth = point.position.y.atan2(point.position.x);
                    let swept = (azimuth - start_azimuth).rem_euclid(TAU);
                    self.scan_period * swept / TAU
                }
            })
            .collect()
    }

    /// Gyro rate at `t`, linearly interpolated and held constant past either end.
    fn angular_velocity_at(samples: &VecDeque<InertialSample>, t: Timestamp) -> Vector3<f64> {
        let upper = samples.partition_point(|s| s.timestamp <= t);
        if upper == 0 {
            return samples[0].angular_velocity;
        }
        if upper == samples.len() {
            return samples[samples.len() - 1].angular_velocity;
        }
        let a = &samples[upper - 1];
        let b = &samples[upper];
        let span = b.timestamp - a.timestamp;
        if span <= f64::EPSILON {
            return b.angular_velocity;
        }
        let alpha = (t - a.timestamp) / span;
        a.angular_velocity.lerp(&b.angular_velocity, alpha)
    }
}

/// Cumulative rotation from the scan stamp, tabulated at every gyro sample
/// inside the sweep so per-point lookups stay cheap.
struct RotationProfile<'a> {
    samples: &'a VecDeque<InertialSample>,
    origin: Timestamp,
    /// (offset from origin, rotation at that offset, rate at that offset)
    knots: Vec<(f64, UnitQuaternion<f64>, Vector3<f64>)>,
}

impl<'a> RotationProfile<'a> {
    fn integrate(samples: &'a VecDeque<InertialSample>, origin: Timestamp, horizon: f64) -> Self {
        let w0 = ScanDeskewer::angular_velocity_at(samples, origin);
        let mut knots = vec![(0.0, UnitQuaternion::identity(), w0)];

        for sample in samples {
            let tau = sample.timestamp - origin;
            if tau <= 0.0 || tau >= horizon {
                continue;
            }
            let (prev_tau, prev_rot, prev_w) = knots[knots.len() - 1];
            let step = trapezoid(&prev_w, &sample.angular_velocity, tau - prev_tau);
            knots.push((tau, prev_rot * step, sample.angular_velocity));
        }

        Self {
            samples,
            origin,
            knots,
        }
    }

    fn at(&self, tau: f64) -> UnitQuaternion<f64> {
        if tau <= 0.0 {
            return UnitQuaternion::identity();
        }
        let index = self.knots.partition_point(|(k, _, _)| *k <= tau) - 1;
        let (k_tau, k_rot, k_w) = self.knots[index];
        let w = ScanDeskewer::angular_velocity_at(self.samples, self.origin + tau);
        k_rot * trapezoid(&k_w, &w, tau - k_tau)
    }
}

/// Body-frame rotation over `dt` with the mean of two rates.
fn trapezoid(w_start: &Vector3<f64>, w_end: &Vector3<f64>, dt: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis((w_start + w_end) * 0.5 * dt)
}
