// locus_core/src/messages.rs

use nalgebra::{Isometry3, Point3, UnitQuaternion, Vector3};

use crate::types::{Covariance6, Timestamp};

// =========================================================================
// == Sensor Inputs ==
// =========================================================================

/// A single point of a range-sensor cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub position: Point3<f64>,
    pub intensity: Option<f32>,
    /// Acquisition time relative to the cloud stamp, in seconds.
    pub time_offset: Option<f64>,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Point3::new(x, y, z),
            intensity: None,
            time_offset: None,
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = Some(intensity);
        self
    }

    pub fn with_time_offset(mut self, offset: f64) -> Self {
        self.time_offset = Some(offset);
        self
    }

    /// Distance from the sensor origin projected onto the XY plane.
    pub fn horizontal_range(&self) -> f64 {
        self.position.x.hypot(self.position.y)
    }
}

/// A stamped cloud of points expressed in `frame_id`.
///
/// Used for both incoming scans and the reference map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub frame_id: String,
    pub timestamp: Timestamp,
    pub points: Vec<Point>,
}

impl PointCloud {
    pub fn new(frame_id: impl Into<String>, timestamp: Timestamp, points: Vec<Point>) -> Self {
        Self {
            frame_id: frame_id.into(),
            timestamp,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterates over point positions only.
    pub fn positions(&self) -> impl Iterator<Item = &Point3<f64>> + '_ {
        self.points.iter().map(|p| &p.position)
    }

    /// Applies `transform` to every point and relabels the cloud as `frame_id`.
    pub fn transform_in_place(&mut self, transform: &Isometry3<f64>, frame_id: &str) {
        for point in &mut self.points {
            point.position = transform * point.position;
        }
        self.frame_id = frame_id.to_owned();
    }

    /// A new cloud holding `points` under this cloud's header.
    pub fn with_same_header(&self, points: Vec<Point>) -> Self {
        Self {
            frame_id: self.frame_id.clone(),
            timestamp: self.timestamp,
            points,
        }
    }
}

/// Wheel odometry twist, expressed in the body frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Odometry {
    pub timestamp: Timestamp,
    pub frame_id: String,
    pub child_frame_id: String,
    pub linear_velocity: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
}

impl Odometry {
    pub fn new(timestamp: Timestamp, linear_velocity: Vector3<f64>, angular_velocity: Vector3<f64>) -> Self {
        Self {
            timestamp,
            frame_id: String::new(),
            child_frame_id: String::new(),
            linear_velocity,
            angular_velocity,
        }
    }
}

/// Raw inertial measurement expressed in the IMU's own frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ImuSample {
    pub timestamp: Timestamp,
    pub frame_id: String,
    pub angular_velocity: Vector3<f64>,
    pub linear_acceleration: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

// =========================================================================
// == Estimates and Outputs ==
// =========================================================================

/// A pose with a covariance placeholder, as published by the tracker and as
/// accepted for (re)initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseWithCovarianceStamped {
    pub frame_id: String,
    pub timestamp: Timestamp,
    pub pose: Isometry3<f64>,
    pub covariance: Covariance6,
}

impl PoseWithCovarianceStamped {
    pub fn new(frame_id: impl Into<String>, timestamp: Timestamp, pose: Isometry3<f64>) -> Self {
        Self {
            frame_id: frame_id.into(),
            timestamp,
            pose,
            covariance: Covariance6::zeros(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoseStamped {
    pub frame_id: String,
    pub timestamp: Timestamp,
    pub pose: Isometry3<f64>,
}

impl From<&PoseWithCovarianceStamped> for PoseStamped {
    fn from(value: &PoseWithCovarianceStamped) -> Self {
        Self {
            frame_id: value.frame_id.clone(),
            timestamp: value.timestamp,
            pose: value.pose,
        }
    }
}

/// Append-only trajectory of accepted poses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    pub frame_id: String,
    pub timestamp: Timestamp,
    pub poses: Vec<PoseStamped>,
}

impl Path {
    pub fn new(frame_id: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
            timestamp: 0.0,
            poses: Vec::new(),
        }
    }

    pub fn push(&mut self, pose: PoseStamped) {
        self.timestamp = pose.timestamp;
        self.poses.push(pose);
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// A directed rigid transform: `transform` maps `child_frame_id` points into
/// `parent_frame_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformStamped {
    pub parent_frame_id: String,
    pub child_frame_id: String,
    pub timestamp: Timestamp,
    pub transform: Isometry3<f64>,
}

// =========================================================================
// == Tracker Input ==
// =========================================================================

/// A generic container for any data that can be fed into the pose tracker.
#[derive(Debug, Clone, Copy)]
pub enum TrackerInput<'a> {
    Odometry(&'a Odometry),
    Imu(&'a ImuSample),
    Scan(&'a PointCloud),
    InitialPose(&'a PoseWithCovarianceStamped),
    Map(&'a PointCloud),
}
