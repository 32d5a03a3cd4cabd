// locus_core/src/estimation/motion.rs

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use thiserror::Error;
use tracing::{debug, warn};

use crate::messages::Odometry;
use crate::types::Timestamp;

/// Reasons an odometry sample was not integrated.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PredictionError {
    #[error("odometry time went backwards (dt = {0:.6} s)")]
    NegativeDt(f64),

    #[error("odometry gap of {dt:.6} s exceeds the {max_dt:.3} s limit")]
    ExcessiveDt { dt: f64, max_dt: f64 },

    /// The first sample only establishes the clock.
    #[error("no previous odometry sample to measure dt against")]
    NoPreviousSample,
}

/// Integrates a body-frame twist over `dt` and returns the advanced pose.
///
/// The orientation is decomposed into roll/pitch/yaw, each angle is advanced by
/// first-order Euler integration of the matching angular rate, and the
/// quaternion is rebuilt as `q_yaw * q_pitch * q_roll`. Position then moves by
/// the body-frame linear velocity rotated by the *updated* orientation.
///
/// Near +/-90 degrees pitch the roll/yaw decomposition degenerates (gimbal lock);
/// this is acceptable for ground vehicles.
pub fn integrate_twist(
    pose: &Isometry3<f64>,
    linear_velocity: &Vector3<f64>,
    angular_velocity: &Vector3<f64>,
    dt: f64,
) -> Isometry3<f64> {
    let (roll, pitch, yaw) = pose.rotation.euler_angles();
    let roll = roll + angular_velocity.x * dt;
    let pitch = pitch + angular_velocity.y * dt;
    let yaw = yaw + angular_velocity.z * dt;

    let q_roll = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), roll);
    let q_pitch = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), pitch);
    let q_yaw = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), yaw);
    let rotation = UnitQuaternion::new_normalize((q_yaw * q_pitch * q_roll).into_inner());

    let displacement = rotation * (linear_velocity * dt);
    Isometry3::from_parts(
        Translation3::from(pose.translation.vector + displacement),
        rotation,
    )
}

/// Dead-reckons the current estimate between registration fixes.
#[derive(Debug, Clone)]
pub struct MotionPredictor {
    max_dt: f64,
    last_stamp: Option<Timestamp>,
}

impl MotionPredictor {
    pub fn new(max_dt: f64) -> Self {
        Self {
            max_dt,
            last_stamp: None,
        }
    }

    /// Stamp of the most recent odometry sample seen, accepted or not.
    pub fn last_stamp(&self) -> Option<Timestamp> {
        self.last_stamp
    }

    /// Checks `dt` against the accepted window and integrates when valid.
    ///
    /// On rejection the input pose is returned untouched in the error path, so
    /// callers can leave their estimate bit-identical.
    pub fn predict(
        &self,
        pose: &Isometry3<f64>,
        odom: &Odometry,
        dt: f64,
    ) -> Result<Isometry3<f64>, PredictionError> {
        if dt < 0.0 {
            return Err(PredictionError::NegativeDt(dt));
        }
        if dt > self.max_dt {
            return Err(PredictionError::ExcessiveDt {
                dt,
                max_dt: self.max_dt,
            });
        }
        Ok(integrate_twist(
            pose,
            &odom.linear_velocity,
            &odom.angular_velocity,
            dt,
        ))
    }

    /// Advances the odometry clock and returns the elapsed time since the
    /// previous sample. The clock moves even when the caller later rejects `dt`,
    /// so a single stall cannot lock out every subsequent sample.
    pub fn advance_clock(&mut self, stamp: Timestamp) -> Result<f64, PredictionError> {
        let previous = self.last_stamp.replace(stamp);
        match previous {
            Some(previous) => Ok(stamp - previous),
            None => Err(PredictionError::NoPreviousSample),
        }
    }

    /// Full odometry handling: advance the clock, then integrate into `pose`
    /// when an estimate exists. `pose` is only written on success.
    pub fn on_odometry(
        &mut self,
        pose: Option<&mut Isometry3<f64>>,
        odom: &Odometry,
    ) -> Result<Option<f64>, PredictionError> {
        let dt = match self.advance_clock(odom.timestamp) {
            Ok(dt) => dt,
            Err(PredictionError::NoPreviousSample) => {
                debug!(stamp = odom.timestamp, "First odometry sample, starting the clock.");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(pose) = pose else {
            return Ok(None);
        };

        match self.predict(pose, odom, dt) {
            Ok(updated) => {
                *pose = updated;
                Ok(Some(dt))
            }
            Err(e) => {
                warn!("Skipping odometry prediction: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    const EPSILON: f64 = 1e-9;

    fn odom(stamp: f64, v: Vector3<f64>, w: Vector3<f64>) -> Odometry {
        Odometry::new(stamp, v, w)
    }

    fn assert_isometry_near(a: &Isometry3<f64>, b: &Isometry3<f64>, epsilon: f64) {
        assert_abs_diff_eq!(a.translation.vector, b.translation.vector, epsilon = epsilon);
        assert!(
            a.rotation.angle_to(&b.rotation) < epsilon,
            "rotations differ by {} rad",
            a.rotation.angle_to(&b.rotation)
        );
    }

    #[test]
    fn test_zero_dt_is_idempotent() {
        let pose = Isometry3::new(Vector3::new(1.0, -2.0, 0.3), Vector3::new(0.1, -0.2, 2.5));
        let twist = odom(0.0, Vector3::new(3.0, 1.0, 0.0), Vector3::new(0.5, 0.5, 0.5));
        let predictor = MotionPredictor::new(1.0);

        let out = predictor.predict(&pose, &twist, 0.0).unwrap();
        assert_isometry_near(&out, &pose, EPSILON);
    }

    #[test]
    fn test_forward_motion_uses_updated_heading() {
        let pose = Isometry3::identity();
        let twist = odom(0.0, Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.0, FRAC_PI_2));

        let out = integrate_twist(&pose, &twist.linear_velocity, &twist.angular_velocity, 1.0);

        // Heading turns to +Y first, then the body-forward velocity follows it.
        assert_abs_diff_eq!(out.translation.vector, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        let (_, _, yaw) = out.rotation.euler_angles();
        assert_abs_diff_eq!(yaw, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_window_dt_leaves_pose_bit_identical() {
        let original = Isometry3::new(Vector3::new(4.0, 5.0, 6.0), Vector3::new(0.0, 0.0, 0.7));
        let twist = odom(0.0, Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0));

        for dt in [-0.5, 5.0] {
            let mut predictor = MotionPredictor::new(1.0);
            let mut pose = original;
            predictor.advance_clock(10.0).unwrap_err();
            let sample = Odometry { timestamp: 10.0 + dt, ..twist.clone() };
            assert!(predictor.on_odometry(Some(&mut pose), &sample).is_err());
            assert_eq!(pose, original, "dt = {dt} must not touch the pose");
        }
    }

    #[test]
    fn test_clock_advances_on_rejection() {
        let mut predictor = MotionPredictor::new(1.0);
        let mut pose = Isometry3::identity();
        let twist = Vector3::new(1.0, 0.0, 0.0);

        assert_eq!(predictor.on_odometry(Some(&mut pose), &odom(0.0, twist, Vector3::zeros())), Ok(None));
        assert!(predictor.on_odometry(Some(&mut pose), &odom(3.0, twist, Vector3::zeros())).is_err());
        assert_eq!(predictor.last_stamp(), Some(3.0));

        // The stall is forgotten; the next sample integrates normally.
        let dt = predictor
            .on_odometry(Some(&mut pose), &odom(3.5, twist, Vector3::zeros()))
            .unwrap();
        assert_eq!(dt, Some(0.5));
        assert_abs_diff_eq!(pose.translation.vector.x, 0.5, epsilon = EPSILON);
    }

    #[test]
    fn test_no_estimate_only_advances_clock() {
        let mut predictor = MotionPredictor::new(1.0);
        predictor.advance_clock(1.0).unwrap_err();
        let result = predictor.on_odometry(None, &odom(1.1, Vector3::x(), Vector3::zeros()));
        assert_eq!(result, Ok(None));
        assert_eq!(predictor.last_stamp(), Some(1.1));
    }

    #[test]
    fn test_quaternion_stays_unit_over_long_sequences() {
        let mut pose = Isometry3::identity();
        let v = Vector3::new(0.8, 0.1, 0.0);
        let w = Vector3::new(0.3, -0.2, 0.9);
        for _ in 0..10_000 {
            pose = integrate_twist(&pose, &v, &w, 0.01);
            assert_abs_diff_eq!(pose.rotation.quaternion().norm(), 1.0, epsilon = 1e-6);
        }
    }
}
