// locus_node/src/runtime/topics.rs

use downcast_rs::{impl_downcast, Downcast};
use locus_core::messages::{Path, PointCloud, PoseWithCovarianceStamped, TransformStamped};
use locus_core::pipeline::Publisher;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

use super::transforms::TfBuffer;

// --- Well-known topic names ---
pub const POSE_TOPIC: &str = "pcl_pose";
pub const PATH_TOPIC: &str = "path";
pub const MAP_TOPIC: &str = "initial_map";
pub const TF_TOPIC: &str = "tf";

// --- Trait for Type-Erased Topics ---
/// Lets topics of different message types share one map.
pub trait AnyTopic: Downcast + Send + Sync {}
impl_downcast!(AnyTopic);

impl<T: Clone + Send + Sync + 'static> AnyTopic for Topic<T> {}

/// A bounded buffer for one topic. Once full, the oldest message is evicted.
#[derive(Debug)]
pub struct Topic<T: Clone + Send + Sync + 'static> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone + Send + Sync + 'static> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn publish(&mut self, message: T) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(message);
    }

    /// The most recent message; what a latched subscriber sees on connect.
    pub fn latest(&self) -> Option<&T> {
        self.buffer.back()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

// --- The Bus ---

/// Named, typed, bounded topics owned by the node.
#[derive(Default)]
pub struct TopicBus {
    topics: HashMap<String, Box<dyn AnyTopic>>,
}

impl TopicBus {
    /// Registers a topic. Returns `false` (and changes nothing) when the
    /// name is already taken.
    pub fn create_topic<T: Clone + Send + Sync + 'static>(&mut self, name: &str, capacity: usize) -> bool {
        if self.topics.contains_key(name) {
            warn!("Topic '{name}' already exists.");
            return false;
        }
        self.topics.insert(name.to_string(), Box::new(Topic::<T>::new(capacity)));
        true
    }

    /// Publishes onto an existing topic. Returns `false` for an unknown name
    /// or a type mismatch.
    pub fn publish<T: Clone + Send + Sync + 'static>(&mut self, topic_name: &str, message: T) -> bool {
        if let Some(topic) = self
            .topics
            .get_mut(topic_name)
            .and_then(|topic| topic.downcast_mut::<Topic<T>>())
        {
            topic.publish(message);
            return true;
        }
        false
    }

    pub fn get_topic<T: Clone + Send + Sync + 'static>(&self, topic_name: &str) -> Option<&Topic<T>> {
        self.topics
            .get(topic_name)
            .and_then(|topic| topic.downcast_ref::<Topic<T>>())
    }

    /// Shorthand for the newest message on a topic.
    pub fn latest<T: Clone + Send + Sync + 'static>(&self, topic_name: &str) -> Option<&T> {
        self.get_topic::<T>(topic_name).and_then(Topic::latest)
    }

    /// Drops every topic and its buffered messages.
    pub fn clear(&mut self) {
        self.topics.clear();
    }

    /// Creates the four output topics the tracker publishes on.
    pub fn create_output_topics(&mut self) {
        self.create_topic::<PoseWithCovarianceStamped>(POSE_TOPIC, 1);
        self.create_topic::<Path>(PATH_TOPIC, 1);
        self.create_topic::<PointCloud>(MAP_TOPIC, 1);
        self.create_topic::<TransformStamped>(TF_TOPIC, 100);
    }
}

// =========================================================================
// == Lifecycle-Gated Publisher ==
// =========================================================================

/// Adapts the bus to the tracker's [`Publisher`] trait.
///
/// Like a lifecycle publisher, it silently drops messages while inactive.
/// Transforms are also written into the shared transform buffer so later
/// lookups see the tracker's own output.
pub struct BusPublisher<'a> {
    bus: &'a mut TopicBus,
    tf: &'a TfBuffer,
    active: bool,
}

impl<'a> BusPublisher<'a> {
    pub fn new(bus: &'a mut TopicBus, tf: &'a TfBuffer, active: bool) -> Self {
        Self { bus, tf, active }
    }

    fn send<T: Clone + Send + Sync + 'static>(&mut self, topic: &str, message: &T) {
        if !self.active {
            debug!("Publisher inactive; dropping message on '{topic}'.");
            return;
        }
        if !self.bus.publish(topic, message.clone()) {
            warn!("No topic '{topic}' to publish on.");
        }
    }
}

impl Publisher for BusPublisher<'_> {
    fn publish_pose(&mut self, pose: &PoseWithCovarianceStamped) {
        self.send(POSE_TOPIC, pose);
    }

    fn publish_path(&mut self, path: &Path) {
        self.send(PATH_TOPIC, path);
    }

    fn publish_transform(&mut self, transform: &TransformStamped) {
        if self.active {
            self.tf.set_transform(transform, false);
        }
        self.send(TF_TOPIC, transform);
    }

    fn publish_map(&mut self, map: &PointCloud) {
        self.send(MAP_TOPIC, map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_core::frames::{TfProvider, LATEST};
    use nalgebra::Isometry3;
    use std::time::Duration;

    #[test]
    fn test_topic_evicts_oldest() {
        let mut topic = Topic::<u32>::new(2);
        for i in 0..5 {
            topic.publish(i);
        }
        assert_eq!(topic.len(), 2);
        assert_eq!(topic.latest(), Some(&4));
    }

    #[test]
    fn test_bus_rejects_duplicates_and_type_mismatch() {
        let mut bus = TopicBus::default();
        assert!(bus.create_topic::<u32>("a", 1));
        assert!(!bus.create_topic::<u32>("a", 1));
        assert!(!bus.publish("a", "wrong type"));
        assert!(!bus.publish("missing", 1u32));
        assert!(bus.publish("a", 7u32));
        assert_eq!(bus.latest::<u32>("a"), Some(&7));
    }

    #[test]
    fn test_clear_drops_output_topics() {
        let mut bus = TopicBus::default();
        bus.create_output_topics();
        assert!(bus.publish(PATH_TOPIC, Path::new("map")));
        bus.clear();
        assert!(bus.get_topic::<Path>(PATH_TOPIC).is_none());
        assert!(!bus.publish(PATH_TOPIC, Path::new("map")));
    }

    #[test]
    fn test_inactive_publisher_drops_everything() {
        let mut bus = TopicBus::default();
        bus.create_output_topics();
        let tf = TfBuffer::default();
        let transform = TransformStamped {
            parent_frame_id: "map".into(),
            child_frame_id: "base_link".into(),
            timestamp: 1.0,
            transform: Isometry3::translation(1.0, 0.0, 0.0),
        };

        BusPublisher::new(&mut bus, &tf, false).publish_transform(&transform);
        assert!(bus.latest::<TransformStamped>(TF_TOPIC).is_none());
        assert!(!tf.can_transform("map", "base_link", LATEST));

        BusPublisher::new(&mut bus, &tf, true).publish_transform(&transform);
        assert!(bus.latest::<TransformStamped>(TF_TOPIC).is_some());
        let looked_up = tf.lookup_transform("map", "base_link", LATEST, Duration::ZERO).unwrap();
        assert_eq!(looked_up.translation.x, 1.0);
    }
}
