// locus_core/src/types.rs

use nalgebra::{Isometry3, Matrix6, UnitQuaternion};

// --- Core Type Aliases ---
/// Seconds since an arbitrary epoch shared by every input stream.
pub type Timestamp = f64;
/// Row-major 6x6 covariance over (x, y, z, roll, pitch, yaw).
pub type Covariance6 = Matrix6<f64>;

/// Renormalizes the rotation of an isometry in place and returns it.
///
/// Every pose that leaves the tracker goes through this so accumulated
/// floating-point error never produces a non-unit quaternion downstream.
pub fn normalized(mut pose: Isometry3<f64>) -> Isometry3<f64> {
    pose.rotation = UnitQuaternion::new_normalize(pose.rotation.into_inner());
    pose
}

/// The rotation angle (radians) of the relative rotation between two poses.
pub fn rotation_delta(a: &Isometry3<f64>, b: &Isometry3<f64>) -> f64 {
    a.rotation.angle_to(&b.rotation)
}
