// locus_node/src/config/structs.rs

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use locus_core::config::{DebugConfig, FilterConfig, FrameConfig, FusionConfig, ScanConfig, TrackerConfig};
use locus_core::registration::RegistrationParams;

use super::serde_helpers;

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

/// # LocalizationConfig
/// Everything the node reads at configure time. This struct is the root of
/// the data parsed from a `locus.toml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)] // Fail if the TOML has fields not in our struct
pub struct LocalizationConfig {
    pub frames: FrameConfig,
    pub registration: RegistrationParams,
    pub filter: FilterConfig,
    pub scan: ScanConfig,
    pub map: MapConfig,
    pub initial_pose: InitialPoseConfig,
    pub fusion: FusionConfig,
    pub debug: DebugConfig,

    // The TOML has `[[static_transforms]]`, which becomes a Vec.
    pub static_transforms: Vec<StaticTransformConfig>,
}

impl LocalizationConfig {
    /// The subset handed to the pose tracker.
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            frames: self.frames.clone(),
            registration: self.registration.clone(),
            filter: self.filter.clone(),
            scan: self.scan.clone(),
            fusion: self.fusion.clone(),
            debug: self.debug.clone(),
        }
    }
}

// =========================================================================
// == Configuration Sub-Structs ==
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    /// Load the reference map from `map_path` on activation.
    pub use_pcd_map: bool,
    /// `.pcd` or `.ply` file.
    pub map_path: PathBuf,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            use_pcd_map: false,
            map_path: "/map/map.pcd".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitialPoseConfig {
    pub set_initial_pose: bool,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
}

impl Default for InitialPoseConfig {
    fn default() -> Self {
        Self {
            set_initial_pose: false,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            qx: 0.0,
            qy: 0.0,
            qz: 0.0,
            qw: 1.0,
        }
    }
}

impl InitialPoseConfig {
    pub fn to_isometry(&self) -> Isometry3<f64> {
        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(self.qw, self.qx, self.qy, self.qz));
        Isometry3::from_parts(Translation3::new(self.x, self.y, self.z), rotation)
    }

    /// Overwrites position and heading (yaw only), as the CLI override does.
    pub fn set_planar(&mut self, x: f64, y: f64, z: f64, yaw_deg: f64) {
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, yaw_deg.to_radians());
        self.set_initial_pose = true;
        self.x = x;
        self.y = y;
        self.z = z;
        self.qx = q.i;
        self.qy = q.j;
        self.qz = q.k;
        self.qw = q.w;
    }
}

/// A fixed sensor mount installed into the transform buffer at configure time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticTransformConfig {
    pub parent: String,
    pub child: String,

    #[serde(with = "serde_helpers::vec3_from_array", default = "Vector3::zeros")]
    pub translation: Vector3<f64>,

    #[serde(with = "serde_helpers::quat_from_euler_deg", default = "UnitQuaternion::identity")]
    pub rotation: UnitQuaternion<f64>,
}

impl StaticTransformConfig {
    /// `T_parent_child`.
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation)
    }
}
