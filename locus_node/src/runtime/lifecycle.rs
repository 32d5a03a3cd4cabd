// locus_node/src/runtime/lifecycle.rs

use locus_core::error::ConfigError;
use locus_core::messages::{PoseWithCovarianceStamped, TrackerInput, TransformStamped};
use locus_core::pipeline::{CycleError, PoseTracker, TrackerContext, TrackerEvent, TrackingState};
use locus_core::registration::{build_oracle, AlignmentOracle, RegistrationParams};
use locus_core::types::Timestamp;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{error, info};

use super::topics::{BusPublisher, TopicBus};
use super::transforms::TfBuffer;
use crate::config::LocalizationConfig;
use crate::io::{load_point_cloud, MapLoadError};

/// The managed-node states a localization node moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    #[default]
    Unconfigured,
    Inactive,
    Active,
    Finalized,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unconfigured => "unconfigured",
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Finalized => "finalized",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Configure,
    Activate,
    Deactivate,
    Cleanup,
    Shutdown,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot {transition} while {from}")]
    InvalidTransition {
        from: LifecycleState,
        transition: Transition,
    },

    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to load map: {0}")]
    MapLoad(#[from] MapLoadError),

    #[error("could not install map: {0}")]
    MapRejected(#[source] CycleError),

    #[error("could not apply initial pose: {0}")]
    InitialPose(#[source] CycleError),
}

/// Builds the oracle at configure time. Swappable so tests can inject a stub.
pub type OracleFactory =
    Box<dyn Fn(&RegistrationParams) -> Result<Box<dyn AlignmentOracle>, ConfigError> + Send>;

/// Wall-clock seconds, used to stamp the configured initial pose.
fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Owns the tracker and drives it through configure / activate / deactivate /
/// cleanup / shutdown, mirroring a managed node.
pub struct LifecycleNode {
    state: LifecycleState,
    config: LocalizationConfig,
    oracle_factory: OracleFactory,
    tracker: Option<PoseTracker>,
    bus: TopicBus,
    tf: Arc<TfBuffer>,
}

impl LifecycleNode {
    pub fn new(config: LocalizationConfig, tf: Arc<TfBuffer>) -> Self {
        Self {
            state: LifecycleState::Unconfigured,
            config,
            oracle_factory: Box::new(build_oracle),
            tracker: None,
            bus: TopicBus::default(),
            tf,
        }
    }

    /// Replaces the oracle factory used by the next `configure`.
    pub fn with_oracle_factory(mut self, factory: OracleFactory) -> Self {
        self.oracle_factory = factory;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &LocalizationConfig {
        &self.config
    }

    pub fn tracker(&self) -> Option<&PoseTracker> {
        self.tracker.as_ref()
    }

    pub fn bus(&self) -> &TopicBus {
        &self.bus
    }

    pub fn tf(&self) -> &Arc<TfBuffer> {
        &self.tf
    }

    // =========================================================================
    // == Transitions ==
    // =========================================================================

    pub fn trigger(&mut self, transition: Transition) -> Result<LifecycleState, LifecycleError> {
        match transition {
            Transition::Configure => self.configure(),
            Transition::Activate => self.activate(),
            Transition::Deactivate => self.deactivate(),
            Transition::Cleanup => self.cleanup(),
            Transition::Shutdown => self.shutdown(),
        }?;
        Ok(self.state)
    }

    fn expect_state(&self, expected: LifecycleState, transition: Transition) -> Result<(), LifecycleError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                from: self.state,
                transition,
            })
        }
    }

    pub fn configure(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(LifecycleState::Unconfigured, Transition::Configure)?;
        info!("Configuring");

        let tracker_config = self.config.tracker_config();
        let method = tracker_config.validate()?;
        log_parameters(&self.config);
        let oracle = (self.oracle_factory)(&tracker_config.registration)?;

        for mount in &self.config.static_transforms {
            self.tf.set_transform(
                &TransformStamped {
                    parent_frame_id: mount.parent.clone(),
                    child_frame_id: mount.child.clone(),
                    timestamp: 0.0,
                    transform: mount.to_isometry(),
                },
                true,
            );
        }

        self.bus.create_output_topics();
        let mut tracker = PoseTracker::new(&tracker_config, oracle);
        tracker.suspend();
        self.tracker = Some(tracker);
        self.state = LifecycleState::Inactive;
        info!(%method, "Configuring end");
        Ok(())
    }

    /// Enables publication and applies the configured initial pose and map.
    /// Any failure leaves the node inactive.
    pub fn activate(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(LifecycleState::Inactive, Transition::Activate)?;
        info!("Activating");
        self.state = LifecycleState::Active;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.resume();
        }

        if let Err(e) = self.apply_startup_inputs() {
            error!("Activation failed: {e}");
            self.state = LifecycleState::Inactive;
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.suspend();
            }
            return Err(e);
        }
        info!("Activating end");
        Ok(())
    }

    /// Applies the configured map, then the configured initial pose. A map
    /// failure leaves the trajectory untouched.
    fn apply_startup_inputs(&mut self) -> Result<(), LifecycleError> {
        if self.config.map.use_pcd_map {
            let path = self.config.map.map_path.clone();
            info!("Loading map from: {}", path.display());
            let mut map = load_point_cloud(&path)?;
            map.frame_id = self.config.frames.global_frame_id.clone();
            info!("Map Size {}", map.len());

            self.with_tracker(|tracker, ctx| {
                ctx.publisher.publish_map(&map);
                tracker.handle_map(&map)
            })
            .map_err(LifecycleError::MapRejected)?;
            info!("Initial Map Published");
        }

        if self.config.initial_pose.set_initial_pose {
            let pose = PoseWithCovarianceStamped::new(
                &self.config.frames.global_frame_id,
                now(),
                self.config.initial_pose.to_isometry(),
            );
            self.with_tracker(|tracker, ctx| tracker.handle_initial_pose(&pose, ctx))
                .map_err(LifecycleError::InitialPose)?;
        }
        Ok(())
    }

    pub fn deactivate(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(LifecycleState::Active, Transition::Deactivate)?;
        info!("Deactivating");
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.suspend();
        }
        self.state = LifecycleState::Inactive;
        Ok(())
    }

    /// Drops the tracker and its outputs; the next `configure` starts fresh.
    pub fn cleanup(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(LifecycleState::Inactive, Transition::Cleanup)?;
        info!("Cleaning Up");
        self.tracker = None;
        self.bus.clear();
        self.state = LifecycleState::Unconfigured;
        Ok(())
    }

    /// Valid from every state except `Finalized`. The bus is kept so the last
    /// outputs stay readable.
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        if self.state == LifecycleState::Finalized {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                transition: Transition::Shutdown,
            });
        }
        info!("Shutting Down from {}", self.state);
        self.tracker = None;
        self.state = LifecycleState::Finalized;
        Ok(())
    }

    // =========================================================================
    // == Inputs ==
    // =========================================================================

    /// Routes one input into the tracker. Returns `None` when no tracker is
    /// configured; the input is dropped.
    pub fn handle(&mut self, input: TrackerInput<'_>) -> Option<Result<TrackerEvent, CycleError>> {
        if self.tracker.is_none() {
            return None;
        }
        Some(self.with_tracker(|tracker, ctx| tracker.process(input, ctx)))
    }

    /// Feeds an externally produced transform into the shared buffer.
    pub fn add_transform(&self, transform: &TransformStamped, is_static: bool) {
        self.tf.set_transform(transform, is_static);
    }

    fn with_tracker<R>(
        &mut self,
        f: impl FnOnce(&mut PoseTracker, &mut TrackerContext<'_>) -> Result<R, CycleError>,
    ) -> Result<R, CycleError> {
        let active = self.state == LifecycleState::Active;
        let Some(tracker) = self.tracker.as_mut() else {
            return Err(CycleError::NotReady(TrackingState::Idle));
        };
        let mut publisher = BusPublisher::new(&mut self.bus, &self.tf, active);
        let mut ctx = TrackerContext {
            tf: self.tf.as_ref(),
            publisher: &mut publisher,
        };
        f(tracker, &mut ctx)
    }
}

fn log_parameters(config: &LocalizationConfig) {
    let frames = &config.frames;
    let reg = &config.registration;
    info!(
        global = %frames.global_frame_id,
        odom = %frames.odom_frame_id,
        base = %frames.base_frame_id,
        map_odom_tf = frames.enable_map_odom_tf,
        "Frames"
    );
    info!(
        method = %reg.method,
        score_threshold = reg.score_threshold,
        hard_gate = reg.fitness_hard_gate,
        ndt_resolution = reg.ndt_resolution,
        ndt_step_size = reg.ndt_step_size,
        ndt_max_iterations = reg.ndt_max_iterations,
        threads = reg.ndt_num_threads,
        "Registration"
    );
    info!(
        voxel_leaf_size = config.filter.voxel_leaf_size,
        min_range = config.filter.scan_min_range,
        max_range = config.filter.scan_max_range,
        scan_period = config.scan.scan_period,
        use_odom = config.fusion.use_odom,
        use_imu = config.fusion.use_imu,
        "Filtering and fusion"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(config: LocalizationConfig) -> LifecycleNode {
        LifecycleNode::new(config, Arc::new(TfBuffer::default()))
    }

    #[test]
    fn test_full_lifecycle_walk() {
        let mut node = node(LocalizationConfig::default());
        assert_eq!(node.trigger(Transition::Configure).unwrap(), LifecycleState::Inactive);
        assert!(node.tracker().is_some());
        assert_eq!(node.trigger(Transition::Activate).unwrap(), LifecycleState::Active);
        assert_eq!(node.trigger(Transition::Deactivate).unwrap(), LifecycleState::Inactive);
        assert_eq!(node.trigger(Transition::Cleanup).unwrap(), LifecycleState::Unconfigured);
        assert!(node.tracker().is_none());
        assert_eq!(node.trigger(Transition::Shutdown).unwrap(), LifecycleState::Finalized);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut node = node(LocalizationConfig::default());
        assert!(matches!(
            node.trigger(Transition::Activate),
            Err(LifecycleError::InvalidTransition {
                from: LifecycleState::Unconfigured,
                transition: Transition::Activate
            })
        ));
        node.configure().unwrap();
        assert!(node.configure().is_err());
        assert!(node.deactivate().is_err());
        node.shutdown().unwrap();
        assert!(node.shutdown().is_err());
        assert_eq!(node.state(), LifecycleState::Finalized);
    }

    #[test]
    fn test_unknown_method_fails_configure() {
        let mut config = LocalizationConfig::default();
        config.registration.method = "ICP".into();
        let mut node = node(config);
        assert!(matches!(node.configure(), Err(LifecycleError::Config(_))));
        assert_eq!(node.state(), LifecycleState::Unconfigured);
    }

    #[test]
    fn test_static_transforms_installed_on_configure() {
        let config = crate::config::from_toml_str(
            "[[static_transforms]]\nparent = \"base_link\"\nchild = \"velodyne\"\ntranslation = [0.0, 0.0, 1.5]\n",
        )
        .unwrap();
        let mut node = node(config);
        node.configure().unwrap();
        assert!(node.tf().can_transform("base_link", "velodyne", 0.0));
    }

    #[test]
    fn test_unsupported_map_extension_leaves_node_inactive() {
        let mut config = LocalizationConfig::default();
        config.map.use_pcd_map = true;
        config.map.map_path = "/tmp/map.las".into();
        let mut node = node(config);
        node.configure().unwrap();
        assert!(matches!(
            node.activate(),
            Err(LifecycleError::MapLoad(MapLoadError::UnsupportedExtension(_)))
        ));
        assert_eq!(node.state(), LifecycleState::Inactive);
    }

    #[test]
    fn test_input_without_tracker_is_dropped() {
        let mut node = node(LocalizationConfig::default());
        let map = locus_core::messages::PointCloud::new("map", 0.0, Vec::new());
        assert!(node.handle(TrackerInput::Map(&map)).is_none());
    }

    #[test]
    fn test_rejected_map_leaves_trajectory_empty_across_retries() {
        let mut file = tempfile::Builder::new().suffix(".pcd").tempfile().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 0\nHEIGHT 1\nPOINTS 0\nDATA ascii\n",
        )
        .unwrap();
        let mut config = LocalizationConfig::default();
        config.map.use_pcd_map = true;
        config.map.map_path = file.path().to_path_buf();
        config.initial_pose.set_initial_pose = true;
        let mut node = node(config);
        node.configure().unwrap();

        for _ in 0..2 {
            assert!(matches!(node.activate(), Err(LifecycleError::MapRejected(CycleError::EmptyMap))));
            assert_eq!(node.state(), LifecycleState::Inactive);
            let tracker = node.tracker().unwrap();
            assert!(tracker.trajectory().is_empty());
            assert!(tracker.estimate().is_none());
        }
    }
}
