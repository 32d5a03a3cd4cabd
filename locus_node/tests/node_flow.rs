// locus_node/tests/node_flow.rs

//! Drives the node loop end to end with a scripted oracle.

use approx::assert_abs_diff_eq;
use crossbeam_channel::Sender;
use locus_core::registration::RegistrationParams;
use locus_node::prelude::*;
use nalgebra::{Isometry3, Vector3};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

// --- Scripted oracle ---

#[derive(Clone)]
struct ScriptedOracle {
    result: AlignmentResult,
    guesses: Arc<Mutex<Vec<Isometry3<f64>>>>,
}

impl ScriptedOracle {
    fn new(result: AlignmentResult) -> Self {
        Self {
            result,
            guesses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn factory(&self) -> OracleFactory {
        let oracle = self.clone();
        Box::new(move |_: &RegistrationParams| {
            Ok::<_, ConfigError>(Box::new(oracle.clone()) as Box<dyn AlignmentOracle>)
        })
    }
}

impl AlignmentOracle for ScriptedOracle {
    fn method(&self) -> RegistrationMethod {
        RegistrationMethod::Ndt
    }

    fn set_target(&mut self, _target: &PointCloud) {}

    fn has_target(&self) -> bool {
        true
    }

    fn align(&mut self, _source: &PointCloud, initial_guess: &Isometry3<f64>) -> AlignmentResult {
        self.guesses.lock().push(*initial_guess);
        self.result
    }
}

fn converged_at(x: f64) -> AlignmentResult {
    AlignmentResult {
        final_transform: Isometry3::translation(x, 0.0, 0.0),
        converged: true,
        fitness_score: 0.05,
        iterations: 4,
    }
}

// --- Fixtures ---

fn ring(frame: &str, stamp: f64) -> PointCloud {
    let points = (0..120)
        .map(|i| {
            let a = f64::from(i) * 0.05;
            Point::new(8.0 * a.cos(), 8.0 * a.sin(), 0.5)
        })
        .collect();
    PointCloud::new(frame, stamp, points)
}

fn origin_config() -> LocalizationConfig {
    let mut config = LocalizationConfig::default();
    config.initial_pose.set_initial_pose = true;
    config
}

struct Running {
    sender: Sender<NodeEvent>,
    worker: JoinHandle<LifecycleNode>,
}

impl Running {
    fn start(config: LocalizationConfig, oracle: &ScriptedOracle) -> Self {
        let mut lifecycle =
            LifecycleNode::new(config, Arc::new(TfBuffer::default())).with_oracle_factory(oracle.factory());
        lifecycle.configure().unwrap();
        lifecycle.activate().unwrap();
        let (node, sender) = LocalizationNode::new(lifecycle);
        Self {
            sender,
            worker: thread::spawn(move || node.run()),
        }
    }

    fn send(&self, event: NodeEvent) {
        self.sender.send(event).unwrap();
    }

    fn finish(self) -> LifecycleNode {
        self.sender.send(NodeEvent::Shutdown).unwrap();
        self.worker.join().unwrap()
    }
}

fn latest_pose(node: &LifecycleNode) -> Option<Isometry3<f64>> {
    node.bus()
        .latest::<PoseWithCovarianceStamped>(POSE_TOPIC)
        .map(|p| p.pose)
}

fn path_len(node: &LifecycleNode) -> usize {
    node.bus().latest::<Path>(PATH_TOPIC).map_or(0, Path::len)
}

// --- Scenarios ---

#[test]
fn test_single_scan_end_to_end() {
    let oracle = ScriptedOracle::new(converged_at(1.0));
    let node = Running::start(origin_config(), &oracle);
    node.send(NodeEvent::Map(ring("map", 0.0)));
    node.send(NodeEvent::Scan(ring("base_link", 1.0)));
    let node = node.finish();

    let pose = latest_pose(&node).unwrap();
    assert_abs_diff_eq!(pose.translation.vector, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-9);
    assert_eq!(path_len(&node), 2);

    let tf = node.bus().latest::<TransformStamped>(TF_TOPIC).unwrap();
    assert_eq!(tf.child_frame_id, "base_link");
    assert_abs_diff_eq!(tf.transform.translation.vector, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-9);

    // The tracker's own transform is visible to later lookups.
    let looked_up = node
        .tf()
        .lookup_transform("map", "base_link", LATEST, Duration::ZERO)
        .unwrap();
    assert_abs_diff_eq!(looked_up.translation.x, 1.0, epsilon = 1e-9);
    assert_eq!(oracle.guesses.lock().len(), 1);
}

#[test]
fn test_scan_before_map_is_dropped() {
    let oracle = ScriptedOracle::new(converged_at(1.0));
    let node = Running::start(origin_config(), &oracle);
    node.send(NodeEvent::Scan(ring("base_link", 1.0)));
    let node = node.finish();

    assert!(oracle.guesses.lock().is_empty());
    assert_eq!(path_len(&node), 0);
    // Only the configured initial pose was published.
    assert_abs_diff_eq!(latest_pose(&node).unwrap().translation.x, 0.0);
}

#[test]
fn test_new_initial_pose_replays_last_scan() {
    let oracle = ScriptedOracle::new(converged_at(1.0));
    let node = Running::start(origin_config(), &oracle);
    node.send(NodeEvent::Map(ring("map", 0.0)));
    node.send(NodeEvent::Scan(ring("base_link", 1.0)));
    node.send(NodeEvent::InitialPose(PoseWithCovarianceStamped::new(
        "map",
        2.0,
        Isometry3::translation(5.0, 0.0, 0.0),
    )));
    let node = node.finish();

    let guesses = oracle.guesses.lock();
    assert_eq!(guesses.len(), 2);
    assert_abs_diff_eq!(guesses[1].translation.x, 5.0);
    // initial pose, first scan, re-localization, replayed scan
    assert_eq!(path_len(&node), 4);
}

#[test]
fn test_unconverged_alignment_publishes_nothing() {
    let mut result = converged_at(3.0);
    result.converged = false;
    let oracle = ScriptedOracle::new(result);
    let node = Running::start(origin_config(), &oracle);
    node.send(NodeEvent::Map(ring("map", 0.0)));
    node.send(NodeEvent::Scan(ring("base_link", 1.0)));
    let node = node.finish();

    assert_eq!(oracle.guesses.lock().len(), 1);
    assert_abs_diff_eq!(latest_pose(&node).unwrap().translation.x, 0.0);
    assert_eq!(path_len(&node), 0);
    assert!(node.bus().latest::<TransformStamped>(TF_TOPIC).is_none());
}

#[test]
fn test_initial_pose_in_wrong_frame_is_ignored() {
    let oracle = ScriptedOracle::new(converged_at(1.0));
    let node = Running::start(LocalizationConfig::default(), &oracle);
    node.send(NodeEvent::InitialPose(PoseWithCovarianceStamped::new(
        "odom",
        1.0,
        Isometry3::identity(),
    )));
    node.send(NodeEvent::Map(ring("map", 0.0)));
    node.send(NodeEvent::Scan(ring("base_link", 2.0)));
    let node = node.finish();

    assert!(latest_pose(&node).is_none());
    assert!(oracle.guesses.lock().is_empty());
}

#[test]
fn test_decoupled_odom_chain_reproduces_registered_pose() {
    let oracle = ScriptedOracle::new(converged_at(1.0));
    let mut config = origin_config();
    config.frames.enable_map_odom_tf = true;
    let node = Running::start(config, &oracle);

    for stamp in [0.5, 1.5] {
        node.send(NodeEvent::Transform {
            transform: TransformStamped {
                parent_frame_id: "odom".into(),
                child_frame_id: "base_link".into(),
                timestamp: stamp,
                transform: Isometry3::translation(0.4, 0.2, 0.0),
            },
            is_static: false,
        });
    }
    node.send(NodeEvent::Map(ring("map", 0.0)));
    node.send(NodeEvent::Scan(ring("base_link", 1.0)));
    let node = node.finish();

    let tf = node.bus().latest::<TransformStamped>(TF_TOPIC).unwrap();
    assert_eq!((tf.parent_frame_id.as_str(), tf.child_frame_id.as_str()), ("map", "odom"));
    assert_abs_diff_eq!(tf.transform.translation.vector, Vector3::new(0.6, -0.2, 0.0), epsilon = 1e-9);

    let map_base = node
        .tf()
        .lookup_transform("map", "base_link", LookupTime::At(1.0), Duration::ZERO)
        .unwrap();
    assert_abs_diff_eq!(map_base.translation.vector, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-9);
}

#[test]
fn test_sensor_frame_scan_uses_static_mount() {
    let oracle = ScriptedOracle::new(converged_at(1.0));
    let mut config = origin_config();
    config.static_transforms = locus_node::config::from_toml_str(
        "[[static_transforms]]\nparent = \"base_link\"\nchild = \"velodyne\"\ntranslation = [0.0, 0.0, 1.0]\n",
    )
    .unwrap()
    .static_transforms;
    let node = Running::start(config, &oracle);
    node.send(NodeEvent::Map(ring("map", 0.0)));
    node.send(NodeEvent::Scan(ring("velodyne", 1.0)));
    node.send(NodeEvent::Scan(ring("lidar_without_mount", 1.1)));
    let node = node.finish();

    // Only the mounted sensor's scan reaches the oracle.
    assert_eq!(oracle.guesses.lock().len(), 1);
    assert_eq!(path_len(&node), 2);
}

#[test]
fn test_deactivated_node_drops_scans() {
    let oracle = ScriptedOracle::new(converged_at(1.0));
    let node = Running::start(origin_config(), &oracle);
    node.send(NodeEvent::Map(ring("map", 0.0)));
    node.send(NodeEvent::Lifecycle(Transition::Deactivate));
    node.send(NodeEvent::Scan(ring("base_link", 1.0)));
    node.send(NodeEvent::Lifecycle(Transition::Activate));
    node.send(NodeEvent::Scan(ring("base_link", 2.0)));
    let node = node.finish();

    assert_eq!(oracle.guesses.lock().len(), 1);
    assert_eq!(node.state(), LifecycleState::Finalized);
}
