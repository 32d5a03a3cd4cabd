// locus_node/src/runtime/node.rs

use crossbeam_channel::{Receiver, Sender};
use locus_core::messages::{
    ImuSample, Odometry, PointCloud, PoseWithCovarianceStamped, TrackerInput, TransformStamped,
};
use locus_core::pipeline::{CycleError, TrackerEvent};
use tracing::{debug, error, info, warn};

use super::lifecycle::{LifecycleNode, Transition};

/// Everything a producer can hand to the node loop.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Odometry(Odometry),
    Imu(ImuSample),
    Scan(PointCloud),
    InitialPose(PoseWithCovarianceStamped),
    Map(PointCloud),
    Transform {
        transform: TransformStamped,
        is_static: bool,
    },
    Lifecycle(Transition),
    /// Stops the loop after a final `shutdown` transition.
    Shutdown,
}

/// The single owner of the lifecycle controller. Inputs are handled strictly
/// in arrival order, each to completion, on the thread that calls [`run`].
///
/// [`run`]: LocalizationNode::run
pub struct LocalizationNode {
    lifecycle: LifecycleNode,
    events: Receiver<NodeEvent>,
}

impl LocalizationNode {
    /// Returns the node and the sender producers use to reach it.
    pub fn new(lifecycle: LifecycleNode) -> (Self, Sender<NodeEvent>) {
        let (sender, events) = crossbeam_channel::unbounded();
        (Self { lifecycle, events }, sender)
    }

    pub fn lifecycle(&self) -> &LifecycleNode {
        &self.lifecycle
    }

    /// Processes events until `Shutdown` arrives or every sender is dropped,
    /// then hands the controller back for inspection.
    pub fn run(mut self) -> LifecycleNode {
        info!("Node loop started.");
        while let Ok(event) = self.events.recv() {
            if matches!(event, NodeEvent::Shutdown) {
                break;
            }
            self.dispatch(event);
        }
        if let Err(e) = self.lifecycle.shutdown() {
            debug!("{e}");
        }
        info!("Node loop stopped.");
        self.lifecycle
    }

    /// Handles one event. Failures are logged and never stop the loop.
    pub fn dispatch(&mut self, event: NodeEvent) {
        let outcome = match &event {
            NodeEvent::Odometry(odom) => self.lifecycle.handle(TrackerInput::Odometry(odom)),
            NodeEvent::Imu(imu) => self.lifecycle.handle(TrackerInput::Imu(imu)),
            NodeEvent::Scan(scan) => self.lifecycle.handle(TrackerInput::Scan(scan)),
            NodeEvent::InitialPose(pose) => self.lifecycle.handle(TrackerInput::InitialPose(pose)),
            NodeEvent::Map(map) => self.lifecycle.handle(TrackerInput::Map(map)),
            NodeEvent::Transform { transform, is_static } => {
                self.lifecycle.add_transform(transform, *is_static);
                return;
            }
            NodeEvent::Lifecycle(transition) => {
                match self.lifecycle.trigger(*transition) {
                    Ok(state) => info!(%transition, %state, "Transition complete."),
                    Err(e) => error!(%transition, "Transition failed: {e}"),
                }
                return;
            }
            NodeEvent::Shutdown => return,
        };

        match outcome {
            None => debug!(state = %self.lifecycle.state(), "No tracker; input dropped."),
            Some(Ok(event)) => log_event(&event),
            // Disabled fusion inputs are expected noise, everything else was
            // already logged where it was rejected.
            Some(Err(CycleError::FusionDisabled(_))) => {}
            Some(Err(e)) => debug!("Input not applied: {e}"),
        }
    }
}

fn log_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::Predicted { dt: Some(dt) } => debug!(dt, "Prediction applied."),
        TrackerEvent::InitialPoseApplied { replay: Some(Err(e)) } => {
            warn!("Replay against the new initial pose failed: {e}");
        }
        TrackerEvent::MapInstalled { points } => info!(points, "Map installed."),
        _ => {}
    }
}
