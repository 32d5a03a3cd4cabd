// locus_core/src/pipeline/composer.rs

use nalgebra::Isometry3;
use std::time::Duration;

use crate::config::FrameConfig;
use crate::frames::{LookupTime, TfError, TfProvider};
use crate::messages::TransformStamped;
use crate::types::{normalized, Timestamp};

/// Turns a registered `T_global_base` into the transform the tracker owns in
/// the frame tree.
///
/// With odom decoupling the tracker publishes `global -> odom` so that
/// `T_global_odom * T_odom_base == T_global_base` holds with whatever odometry
/// is publishing `odom -> base` at the scan stamp.
#[derive(Debug, Clone)]
pub struct TransformComposer {
    global_frame: String,
    odom_frame: String,
    base_frame: String,
    decouple_odom: bool,
    timeout: Duration,
}

impl TransformComposer {
    pub fn new(frames: &FrameConfig) -> Self {
        Self {
            global_frame: frames.global_frame_id.clone(),
            odom_frame: frames.odom_frame_id.clone(),
            base_frame: frames.base_frame_id.clone(),
            decouple_odom: frames.enable_map_odom_tf,
            timeout: frames.transform_timeout(),
        }
    }

    pub fn compose(
        &self,
        global_base: &Isometry3<f64>,
        stamp: Timestamp,
        tf: &dyn TfProvider,
    ) -> Result<TransformStamped, TfError> {
        if !self.decouple_odom {
            return Ok(TransformStamped {
                parent_frame_id: self.global_frame.clone(),
                child_frame_id: self.base_frame.clone(),
                timestamp: stamp,
                transform: normalized(*global_base),
            });
        }

        let odom_base = tf.lookup_transform(&self.odom_frame, &self.base_frame, LookupTime::At(stamp), self.timeout)?;
        Ok(TransformStamped {
            parent_frame_id: self.global_frame.clone(),
            child_frame_id: self.odom_frame.clone(),
            timestamp: stamp,
            transform: normalized(global_base * odom_base.inverse()),
        })
    }
}
