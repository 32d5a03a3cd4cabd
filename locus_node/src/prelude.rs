// locus_node/src/prelude.rs

// Re-export the core prelude so binaries and tests get the message types,
// the tracker, and the oracle contract from one place.
pub use locus_core::prelude::*;

pub use crate::cli::Cli;
pub use crate::config::{load as load_config, LocalizationConfig};
pub use crate::io::{load_point_cloud, MapLoadError};
pub use crate::runtime::topics::{MAP_TOPIC, PATH_TOPIC, POSE_TOPIC, TF_TOPIC};
pub use crate::runtime::{
    LifecycleError, LifecycleNode, LifecycleState, LocalizationNode, NodeEvent, OracleFactory, TfBuffer,
    TopicBus, Transition,
};
