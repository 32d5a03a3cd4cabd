// locus_node/src/runtime/mod.rs

//! The process side of the tracker: frame tree, output topics, lifecycle,
//! and the event loop that ties them together.

pub mod lifecycle;
pub mod node;
pub mod topics;
pub mod transforms;

pub use lifecycle::{LifecycleError, LifecycleNode, LifecycleState, OracleFactory, Transition};
pub use node::{LocalizationNode, NodeEvent};
pub use topics::{BusPublisher, TopicBus};
pub use transforms::TfBuffer;
