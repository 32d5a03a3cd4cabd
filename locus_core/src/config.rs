// locus_core/src/config.rs

//! Configuration sections consumed by the tracking components.
//!
//! Every section deserializes with defaults for missing keys and rejects
//! unknown keys. The node assembles them into a [`TrackerConfig`], validates it
//! once, and hands it by reference to each component constructor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::registration::{RegistrationMethod, RegistrationParams};

// =========================================================================
// == Configuration Sections ==
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameConfig {
    pub global_frame_id: String,
    pub odom_frame_id: String,
    pub base_frame_id: String,
    /// Publish `global -> odom` instead of `global -> base`.
    pub enable_map_odom_tf: bool,
    /// Upper bound, in seconds, on any blocking transform lookup.
    pub transform_timeout: f64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            global_frame_id: "map".to_string(),
            odom_frame_id: "odom".to_string(),
            base_frame_id: "base_link".to_string(),
            enable_map_odom_tf: false,
            transform_timeout: 0.1,
        }
    }
}

impl FrameConfig {
    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.transform_timeout.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Voxel edge length in meters. Zero or negative disables downsampling.
    pub voxel_leaf_size: f64,
    pub scan_min_range: f64,
    pub scan_max_range: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            voxel_leaf_size: 0.2,
            scan_min_range: 1.0,
            scan_max_range: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Duration of one full sensor sweep, in seconds.
    pub scan_period: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { scan_period: 0.1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FusionConfig {
    pub use_odom: bool,
    pub use_imu: bool,
    /// Odometry gaps longer than this (seconds) are not integrated.
    pub max_odom_dt: f64,
    pub imu_buffer_size: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            use_odom: false,
            use_imu: false,
            max_odom_dt: 1.0,
            imu_buffer_size: 400,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebugConfig {
    pub enable_debug: bool,
}

// =========================================================================
// == Aggregate ==
// =========================================================================

/// Everything the pose tracker needs, frozen at configure time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerConfig {
    pub frames: FrameConfig,
    pub registration: RegistrationParams,
    pub filter: FilterConfig,
    pub scan: ScanConfig,
    pub fusion: FusionConfig,
    pub debug: DebugConfig,
}

impl TrackerConfig {
    /// Checks numeric bounds and resolves the registration family.
    pub fn validate(&self) -> Result<RegistrationMethod, ConfigError> {
        let frames = &self.frames;
        for (name, value) in [
            ("frames.global_frame_id", &frames.global_frame_id),
            ("frames.odom_frame_id", &frames.odom_frame_id),
            ("frames.base_frame_id", &frames.base_frame_id),
        ] {
            if value.is_empty() {
                return Err(ConfigError::invalid(name, "frame id must not be empty"));
            }
        }
        if frames.global_frame_id == frames.base_frame_id {
            return Err(ConfigError::invalid(
                "frames.base_frame_id",
                "base frame must differ from the global frame",
            ));
        }
        if !(frames.transform_timeout >= 0.0) {
            return Err(ConfigError::invalid("frames.transform_timeout", "must be >= 0"));
        }

        let filter = &self.filter;
        if !(filter.scan_min_range >= 0.0) {
            return Err(ConfigError::invalid("filter.scan_min_range", "must be >= 0"));
        }
        if filter.scan_min_range > filter.scan_max_range {
            return Err(ConfigError::invalid(
                "filter.scan_max_range",
                format!(
                    "max range {} is below min range {}",
                    filter.scan_max_range, filter.scan_min_range
                ),
            ));
        }
        if !(self.scan.scan_period > 0.0) {
            return Err(ConfigError::invalid("scan.scan_period", "must be > 0"));
        }
        if !(self.fusion.max_odom_dt > 0.0) {
            return Err(ConfigError::invalid("fusion.max_odom_dt", "must be > 0"));
        }
        if self.fusion.imu_buffer_size == 0 {
            return Err(ConfigError::invalid("fusion.imu_buffer_size", "must be > 0"));
        }

        self.registration.validate()
    }
}
