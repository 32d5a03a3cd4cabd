// locus_core/src/pipeline/mod.rs

//! The pose tracker: owns the current estimate and turns sensor input into
//! published poses, trajectory, and the global-frame transform.

use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::estimation::MotionPredictor;
use crate::frames::{LookupTime, TfProvider, LATEST};
use crate::messages::{
    ImuSample, Odometry, Path, PointCloud, PoseStamped, PoseWithCovarianceStamped, TrackerInput,
};
use crate::preprocessing::{RangeFilter, ScanDeskewer, VoxelGrid};
use crate::registration::AlignmentOracle;
use crate::types::{normalized, rotation_delta, Covariance6};

pub mod composer;
pub mod publisher;
pub mod report;
pub mod state;

pub use composer::TransformComposer;
pub use publisher::Publisher;
pub use report::{CycleError, CycleReport, TrackerEvent};
pub use state::{TrackingGate, TrackingState};

/// World access handed to the tracker for the duration of one input.
pub struct TrackerContext<'a> {
    pub tf: &'a dyn TfProvider,
    pub publisher: &'a mut dyn Publisher,
}

pub struct PoseTracker {
    config: TrackerConfig,
    oracle: Box<dyn AlignmentOracle>,
    predictor: MotionPredictor,
    deskewer: ScanDeskewer,
    range_filter: RangeFilter,
    voxel_grid: VoxelGrid,
    composer: TransformComposer,
    gate: TrackingGate,
    state: TrackingState,
    suspended: bool,
    /// Set by the first accepted scan; a fresh tracker starts cleared.
    tracked: bool,
    estimate: Option<PoseWithCovarianceStamped>,
    trajectory: Path,
    last_scan: Option<PointCloud>,
}

impl PoseTracker {
    /// Builds a tracker around an already-constructed oracle. The config is
    /// expected to have passed [`TrackerConfig::validate`].
    pub fn new(config: &TrackerConfig, oracle: Box<dyn AlignmentOracle>) -> Self {
        Self {
            predictor: MotionPredictor::new(config.fusion.max_odom_dt),
            deskewer: ScanDeskewer::new(config.fusion.imu_buffer_size, config.scan.scan_period),
            range_filter: RangeFilter::from_config(&config.filter),
            voxel_grid: VoxelGrid::new(config.filter.voxel_leaf_size),
            composer: TransformComposer::new(&config.frames),
            gate: TrackingGate::default(),
            state: TrackingState::Idle,
            suspended: false,
            tracked: false,
            estimate: None,
            trajectory: Path::new(config.frames.global_frame_id.clone()),
            last_scan: None,
            oracle,
            config: config.clone(),
        }
    }

    // --- Accessors ---

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn gate(&self) -> TrackingGate {
        self.gate
    }

    pub fn estimate(&self) -> Option<&PoseWithCovarianceStamped> {
        self.estimate.as_ref()
    }

    pub fn trajectory(&self) -> &Path {
        &self.trajectory
    }

    pub fn last_scan(&self) -> Option<&PointCloud> {
        self.last_scan.as_ref()
    }

    pub fn oracle(&self) -> &dyn AlignmentOracle {
        self.oracle.as_ref()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Stops scan processing without dropping any data.
    pub fn suspend(&mut self) {
        self.suspended = true;
        self.refresh_state();
    }

    pub fn resume(&mut self) {
        self.suspended = false;
        self.refresh_state();
    }

    fn refresh_state(&mut self) {
        self.state = state::next_state(self.gate, self.suspended, self.tracked);
    }

    // --- Dispatch ---

    /// The single entry point for all input. Every rejection is logged by the
    /// handler that produced it.
    pub fn process(
        &mut self,
        input: TrackerInput<'_>,
        ctx: &mut TrackerContext<'_>,
    ) -> Result<TrackerEvent, CycleError> {
        match input {
            TrackerInput::Odometry(odom) => self
                .handle_odometry(odom)
                .map(|dt| TrackerEvent::Predicted { dt }),
            TrackerInput::Imu(imu) => self.handle_imu(imu, ctx).map(|()| TrackerEvent::ImuBuffered),
            TrackerInput::Scan(scan) => self.handle_scan(scan, ctx).map(TrackerEvent::ScanAccepted),
            TrackerInput::InitialPose(pose) => self
                .handle_initial_pose(pose, ctx)
                .map(|replay| TrackerEvent::InitialPoseApplied { replay }),
            TrackerInput::Map(map) => self
                .handle_map(map)
                .map(|points| TrackerEvent::MapInstalled { points }),
        }
    }

    // =========================================================================
    // == Motion Inputs ==
    // =========================================================================

    /// Integrates odometry into the current estimate. Returns the integrated
    /// `dt`, or `None` when only the odometry clock advanced.
    pub fn handle_odometry(&mut self, odom: &Odometry) -> Result<Option<f64>, CycleError> {
        if !self.config.fusion.use_odom {
            return Err(CycleError::FusionDisabled("odometry"));
        }
        if self.config.fusion.use_imu {
            self.deskewer.set_velocity_hint(odom.linear_velocity);
        }
        let pose = self.estimate.as_mut().map(|e| &mut e.pose);
        Ok(self.predictor.on_odometry(pose, odom)?)
    }

    /// Rotates an IMU sample into the base frame and buffers it for deskewing.
    pub fn handle_imu(&mut self, imu: &ImuSample, ctx: &mut TrackerContext<'_>) -> Result<(), CycleError> {
        if !self.config.fusion.use_imu {
            return Err(CycleError::FusionDisabled("imu"));
        }
        let base = &self.config.frames.base_frame_id;
        let rotation = if imu.frame_id.is_empty() || &imu.frame_id == base {
            nalgebra::UnitQuaternion::identity()
        } else {
            ctx.tf
                .lookup_transform(base, &imu.frame_id, LATEST, Duration::ZERO)
                .map_err(|e| {
                    warn!("Dropping IMU sample: {e}");
                    CycleError::TransformUnavailable(e)
                })?
                .rotation
        };

        self.deskewer.ingest_inertial(
            rotation * imu.angular_velocity,
            rotation * imu.linear_acceleration,
            imu.orientation * rotation.inverse(),
            imu.timestamp,
        );
        Ok(())
    }

    // =========================================================================
    // == Initialization Inputs ==
    // =========================================================================

    /// Overwrites the estimate, publishes it, and replays the last accepted
    /// scan against it so a re-localization takes effect immediately.
    pub fn handle_initial_pose(
        &mut self,
        msg: &PoseWithCovarianceStamped,
        ctx: &mut TrackerContext<'_>,
    ) -> Result<Option<Result<CycleReport, CycleError>>, CycleError> {
        self.check_frame("initial pose", &msg.frame_id)?;
        info!(
            x = msg.pose.translation.x,
            y = msg.pose.translation.y,
            z = msg.pose.translation.z,
            "Received initial pose."
        );

        let mut estimate = msg.clone();
        estimate.pose = normalized(estimate.pose);
        ctx.publisher.publish_pose(&estimate);
        self.trajectory.push(PoseStamped::from(&estimate));
        self.estimate = Some(estimate);
        self.gate.initial_pose_received = true;
        self.refresh_state();

        let Some(scan) = self.last_scan.clone() else {
            return Ok(None);
        };
        debug!("Replaying the last accepted scan against the new pose.");
        Ok(Some(self.handle_scan(&scan, ctx)))
    }

    /// Installs the reference map as the oracle target.
    pub fn handle_map(&mut self, map: &PointCloud) -> Result<usize, CycleError> {
        self.check_frame("map", &map.frame_id)?;
        if map.is_empty() {
            warn!("Ignoring empty map.");
            return Err(CycleError::EmptyMap);
        }

        let method = self.oracle.method();
        let target = if method.requires_downsampled_target() {
            self.voxel_grid.filter(map)
        } else {
            map.clone()
        };
        self.oracle.set_target(&target);
        info!(%method, raw = map.len(), installed = target.len(), "Installed reference map.");

        self.gate.map_received = true;
        self.refresh_state();
        Ok(target.len())
    }

    fn check_frame(&self, kind: &'static str, actual: &str) -> Result<(), CycleError> {
        let expected = &self.config.frames.global_frame_id;
        if actual == expected {
            return Ok(());
        }
        warn!("{kind} frame_id '{actual}' must be '{expected}'; ignoring it.");
        Err(CycleError::FrameMismatch {
            kind,
            expected: expected.clone(),
            actual: actual.to_owned(),
        })
    }

    // =========================================================================
    // == Scan Cycle ==
    // =========================================================================

    /// Runs one full registration cycle on `scan`.
    ///
    /// Nothing is published unless the oracle converges. Once the pose has been
    /// published, a failure to compose the transform ends the cycle without
    /// extending the trajectory.
    pub fn handle_scan(&mut self, scan: &PointCloud, ctx: &mut TrackerContext<'_>) -> Result<CycleReport, CycleError> {
        if !matches!(self.state, TrackingState::Ready | TrackingState::Tracking) {
            debug!(state = %self.state, "Dropping scan.");
            return Err(CycleError::NotReady(self.state));
        }
        let guess = self.estimate.as_ref().ok_or(CycleError::NoEstimate)?.pose;
        let frames = &self.config.frames;

        // 1. Bring the scan into the base frame.
        let mut cloud = scan.clone();
        if cloud.frame_id != frames.base_frame_id {
            let base_sensor = ctx
                .tf
                .lookup_transform(
                    &frames.base_frame_id,
                    &cloud.frame_id,
                    LookupTime::At(cloud.timestamp),
                    frames.transform_timeout(),
                )
                .map_err(|e| {
                    error!("Cannot bring scan into '{}': {e}", frames.base_frame_id);
                    CycleError::TransformUnavailable(e)
                })?;
            cloud.transform_in_place(&base_sensor, &frames.base_frame_id);
        }

        // 2-4. Deskew, range-filter, downsample.
        if self.config.fusion.use_imu {
            cloud = self.deskewer.deskew(&cloud, scan.timestamp);
        }
        let filtered = self.voxel_grid.filter(&self.range_filter.apply(&cloud));
        if filtered.is_empty() {
            warn!(raw = scan.len(), "Scan is empty after filtering.");
            return Err(CycleError::EmptyScan);
        }

        // 5-6. Align.
        let started = Instant::now();
        let result = self.oracle.align(&filtered, &guess);
        let align_time = started.elapsed();

        // 7-8. Validate.
        if !result.converged {
            warn!("The registration didn't converge.");
            return Err(CycleError::NotConverged {
                fitness_score: result.fitness_score,
            });
        }
        let threshold = self.config.registration.score_threshold;
        let poor_fitness = result.fitness_score > threshold;
        if poor_fitness {
            warn!(
                fitness = result.fitness_score,
                threshold, "The fitness score is over the threshold."
            );
            if self.config.registration.fitness_hard_gate {
                return Err(CycleError::FitnessRejected {
                    fitness_score: result.fitness_score,
                    threshold,
                });
            }
        }

        // 9. Commit and publish the pose.
        let pose = normalized(result.final_transform);
        let estimate = PoseWithCovarianceStamped {
            frame_id: frames.global_frame_id.clone(),
            timestamp: scan.timestamp,
            pose,
            covariance: self
                .estimate
                .as_ref()
                .map_or_else(Covariance6::zeros, |e| e.covariance),
        };
        ctx.publisher.publish_pose(&estimate);
        self.estimate = Some(estimate);
        self.tracked = true;
        self.refresh_state();

        // 10. Publish the transform this tracker owns.
        match self.composer.compose(&pose, scan.timestamp, ctx.tf) {
            Ok(transform) => ctx.publisher.publish_transform(&transform),
            Err(e) => {
                error!("Cannot publish global transform: {e}");
                return Err(CycleError::TransformUnavailable(e));
            }
        }

        // 11-12. Extend the trajectory and remember the raw scan.
        let report = CycleReport {
            stamp: scan.timestamp,
            pose,
            fitness_score: result.fitness_score,
            iterations: result.iterations,
            raw_points: scan.len(),
            filtered_points: filtered.len(),
            align_time,
            delta_angle_deg: rotation_delta(&guess, &pose).to_degrees(),
            poor_fitness,
        };
        self.trajectory.push(PoseStamped {
            frame_id: self.config.frames.global_frame_id.clone(),
            timestamp: scan.timestamp,
            pose,
        });
        ctx.publisher.publish_path(&self.trajectory);
        self.last_scan = Some(scan.clone());

        self.log_report(&report);
        Ok(report)
    }

    fn log_report(&self, report: &CycleReport) {
        let t = &report.pose.translation;
        if self.config.debug.enable_debug {
            info!(
                raw = report.raw_points,
                filtered = report.filtered_points,
                align_ms = report.align_time.as_secs_f64() * 1e3,
                fitness = report.fitness_score,
                iterations = report.iterations,
                delta_deg = report.delta_angle_deg,
                x = t.x,
                y = t.y,
                z = t.z,
                "Scan aligned."
            );
        } else {
            debug!(
                fitness = report.fitness_score,
                align_ms = report.align_time.as_secs_f64() * 1e3,
                "Scan aligned."
            );
        }
    }
}
