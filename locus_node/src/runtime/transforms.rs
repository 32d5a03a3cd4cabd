// locus_node/src/runtime/transforms.rs

use locus_core::frames::{LookupTime, TfError, TfProvider};
use locus_core::messages::TransformStamped;
use locus_core::types::Timestamp;
use nalgebra::Isometry3;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::warn;

// =========================================================================
// == Frame Graph ==
// =========================================================================

/// One `parent -> child` edge of the frame tree.
#[derive(Debug)]
struct Edge {
    parent: String,
    is_static: bool,
    /// `T_parent_child` samples ordered by stamp. Static edges keep one.
    history: VecDeque<(Timestamp, Isometry3<f64>)>,
}

impl Edge {
    fn newest_stamp(&self) -> Option<Timestamp> {
        self.history.back().map(|(t, _)| *t)
    }

    fn oldest_stamp(&self) -> Option<Timestamp> {
        self.history.front().map(|(t, _)| *t)
    }

    /// `T_parent_child` at `time`, interpolated between the bracketing samples.
    fn at(&self, time: LookupTime) -> Option<Isometry3<f64>> {
        let stamp = match time {
            LookupTime::At(stamp) if !self.is_static => stamp,
            _ => return self.history.back().map(|(_, iso)| *iso),
        };
        let (oldest, newest) = (self.oldest_stamp()?, self.newest_stamp()?);
        if stamp < oldest || stamp > newest {
            return None;
        }
        let after = self.history.partition_point(|(t, _)| *t < stamp);
        let (t1, iso1) = self.history[after];
        if t1 == stamp || after == 0 {
            return Some(iso1);
        }
        let (t0, iso0) = self.history[after - 1];
        let ratio = (stamp - t0) / (t1 - t0);
        Some(
            iso0.try_lerp_slerp(&iso1, ratio, 1.0e-9)
                .unwrap_or(if ratio < 0.5 { iso0 } else { iso1 }),
        )
    }
}

#[derive(Debug, Default)]
struct FrameGraph {
    /// Keyed by child frame: every frame has at most one parent.
    edges: HashMap<String, Edge>,
}

impl FrameGraph {
    fn insert(&mut self, transform: &TransformStamped, is_static: bool, cache_duration: f64) {
        let child = &transform.child_frame_id;
        let sample = (transform.timestamp, transform.transform);
        let edge = self.edges.entry(child.clone()).or_insert_with(|| Edge {
            parent: transform.parent_frame_id.clone(),
            is_static,
            history: VecDeque::new(),
        });

        if edge.parent != transform.parent_frame_id || edge.is_static != is_static {
            warn!(
                child = %child,
                old_parent = %edge.parent,
                new_parent = %transform.parent_frame_id,
                "Re-parenting frame; dropping its history."
            );
            edge.parent = transform.parent_frame_id.clone();
            edge.is_static = is_static;
            edge.history.clear();
        }

        if is_static {
            edge.history.clear();
            edge.history.push_back(sample);
            return;
        }

        let index = edge.history.partition_point(|(t, _)| *t <= sample.0);
        if index > 0 && edge.history[index - 1].0 == sample.0 {
            edge.history[index - 1] = sample;
        } else {
            edge.history.insert(index, sample);
        }
        if let Some(newest) = edge.newest_stamp() {
            while edge.oldest_stamp().is_some_and(|t| t < newest - cache_duration) {
                edge.history.pop_front();
            }
        }
    }

    /// Frames from `frame` up to its root, `frame` first.
    fn ancestry<'a>(&'a self, frame: &'a str) -> Vec<&'a str> {
        let mut chain = vec![frame];
        let mut current = frame;
        while let Some(edge) = self.edges.get(current) {
            // A cycle can only come from inconsistent input; stop rather than loop.
            if chain.contains(&edge.parent.as_str()) {
                break;
            }
            chain.push(&edge.parent);
            current = &edge.parent;
        }
        chain
    }

    fn knows(&self, frame: &str) -> bool {
        self.edges.contains_key(frame) || self.edges.values().any(|e| e.parent == frame)
    }

    fn lookup(&self, target: &str, source: &str, time: LookupTime) -> Result<Isometry3<f64>, TfError> {
        let not_found = || TfError::NotFound {
            target: target.to_owned(),
            source_frame: source.to_owned(),
        };
        if target == source {
            return Ok(Isometry3::identity());
        }
        if !self.knows(target) || !self.knows(source) {
            return Err(not_found());
        }

        let source_chain = self.ancestry(source);
        let target_chain = self.ancestry(target);
        let (source_depth, target_depth) = source_chain
            .iter()
            .enumerate()
            .find_map(|(i, frame)| target_chain.iter().position(|f| f == frame).map(|j| (i, j)))
            .ok_or_else(not_found)?;
        let source_edges = &source_chain[..source_depth];
        let target_edges = &target_chain[..target_depth];

        // Latest resolves to the newest time every dynamic edge can answer.
        let time = match time {
            LookupTime::Latest => source_edges
                .iter()
                .chain(target_edges)
                .filter_map(|frame| self.edges.get(*frame))
                .filter(|edge| !edge.is_static)
                .filter_map(Edge::newest_stamp)
                .reduce(f64::min)
                .map_or(LookupTime::Latest, LookupTime::At),
            at => at,
        };

        let to_ancestor = |frames: &[&str]| -> Result<Isometry3<f64>, TfError> {
            frames.iter().try_fold(Isometry3::identity(), |acc, frame| {
                let edge = self.edges.get(*frame).ok_or_else(not_found)?;
                let parent_child = edge.at(time).ok_or_else(|| TfError::Extrapolation {
                    target: target.to_owned(),
                    source_frame: source.to_owned(),
                    stamp: time,
                })?;
                Ok(parent_child * acc)
            })
        };
        let ancestor_source = to_ancestor(source_edges)?;
        let ancestor_target = to_ancestor(target_edges)?;
        Ok(ancestor_target.inverse() * ancestor_source)
    }
}

// =========================================================================
// == Shared Buffer ==
// =========================================================================

/// A thread-safe frame tree with bounded per-edge history.
///
/// Shared through an `Arc` between the node loop and whoever feeds it
/// transforms. Lookups wait on a condition variable, so a producer thread
/// inserting the missing edge wakes a blocked lookup immediately.
#[derive(Debug)]
pub struct TfBuffer {
    graph: Mutex<FrameGraph>,
    updated: Condvar,
    cache_duration: f64,
}

impl Default for TfBuffer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl TfBuffer {
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            graph: Mutex::new(FrameGraph::default()),
            updated: Condvar::new(),
            cache_duration: cache_duration.as_secs_f64(),
        }
    }

    /// Adds or updates the `parent -> child` edge described by `transform`.
    pub fn set_transform(&self, transform: &TransformStamped, is_static: bool) {
        self.graph.lock().insert(transform, is_static, self.cache_duration);
        self.updated.notify_all();
    }

    /// Non-blocking check for whether a lookup would currently succeed.
    pub fn can_transform(&self, target: &str, source: &str, time: impl Into<LookupTime>) -> bool {
        self.graph.lock().lookup(target, source, time.into()).is_ok()
    }
}

impl TfProvider for TfBuffer {
    fn lookup_transform(
        &self,
        target: &str,
        source: &str,
        time: LookupTime,
        timeout: Duration,
    ) -> Result<Isometry3<f64>, TfError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut graph = self.graph.lock();
        loop {
            let error = match graph.lookup(target, source, time) {
                Ok(iso) => return Ok(iso),
                Err(e) => e,
            };
            if timeout.is_zero() {
                return Err(error);
            }
            if self.updated.wait_until(&mut graph, deadline).timed_out() {
                return graph.lookup(target, source, time).map_err(|_| TfError::Timeout {
                    target: target.to_owned(),
                    source_frame: source.to_owned(),
                    waited: started.elapsed(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use locus_core::frames::LATEST;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};
    use std::sync::Arc;
    use std::thread;

    fn tf(parent: &str, child: &str, stamp: f64, iso: Isometry3<f64>) -> TransformStamped {
        TransformStamped {
            parent_frame_id: parent.into(),
            child_frame_id: child.into(),
            timestamp: stamp,
            transform: iso,
        }
    }

    fn shift(x: f64, y: f64) -> Isometry3<f64> {
        Isometry3::translation(x, y, 0.0)
    }

    #[test]
    fn test_chain_through_common_ancestor() {
        let buffer = TfBuffer::default();
        buffer.set_transform(&tf("map", "odom", 1.0, shift(10.0, 0.0)), false);
        buffer.set_transform(&tf("odom", "base_link", 1.0, shift(1.0, 2.0)), false);
        buffer.set_transform(&tf("base_link", "velodyne", 0.0, shift(0.5, 0.0)), true);

        let map_velodyne = buffer.lookup_transform("map", "velodyne", LookupTime::At(1.0), Duration::ZERO).unwrap();
        assert_abs_diff_eq!(map_velodyne.translation.vector, Vector3::new(11.5, 2.0, 0.0), epsilon = 1e-12);

        let velodyne_map = buffer.lookup_transform("velodyne", "map", LookupTime::At(1.0), Duration::ZERO).unwrap();
        assert_abs_diff_eq!(
            (velodyne_map * map_velodyne).translation.vector,
            Vector3::zeros(),
            epsilon = 1e-12
        );
        assert!(buffer.can_transform("velodyne", "odom", 1.0));
    }

    #[test]
    fn test_sibling_frames_resolve_through_parent() {
        let buffer = TfBuffer::default();
        let yaw = Isometry3::from_parts(
            Translation3::new(0.0, 1.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
        );
        buffer.set_transform(&tf("base_link", "imu", 0.0, yaw), true);
        buffer.set_transform(&tf("base_link", "velodyne", 0.0, shift(1.0, 0.0)), true);

        // velodyne origin is at (1, 0) in base; in imu coordinates that is
        // R(-90deg) * ((1, 0) - (0, 1)) = (-1, -1).
        let imu_velodyne = buffer.lookup_transform("imu", "velodyne", LATEST, Duration::ZERO).unwrap();
        assert_abs_diff_eq!(imu_velodyne.translation.vector, Vector3::new(-1.0, -1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_interpolates_between_samples() {
        let buffer = TfBuffer::default();
        buffer.set_transform(&tf("odom", "base_link", 1.0, shift(0.0, 0.0)), false);
        buffer.set_transform(&tf("odom", "base_link", 2.0, shift(2.0, 0.0)), false);
        let mid = buffer.lookup_transform("odom", "base_link", LookupTime::At(1.25), Duration::ZERO).unwrap();
        assert_abs_diff_eq!(mid.translation.x, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_range_stamp_is_extrapolation() {
        let buffer = TfBuffer::default();
        buffer.set_transform(&tf("odom", "base_link", 1.0, shift(0.0, 0.0)), false);
        buffer.set_transform(&tf("odom", "base_link", 2.0, shift(1.0, 0.0)), false);
        assert!(matches!(
            buffer.lookup_transform("odom", "base_link", LookupTime::At(3.0), Duration::ZERO),
            Err(TfError::Extrapolation { .. })
        ));
    }

    #[test]
    fn test_latest_uses_common_newest_time() {
        let buffer = TfBuffer::default();
        buffer.set_transform(&tf("map", "odom", 1.0, shift(0.0, 0.0)), false);
        buffer.set_transform(&tf("map", "odom", 3.0, shift(2.0, 0.0)), false);
        buffer.set_transform(&tf("odom", "base_link", 2.0, shift(0.0, 1.0)), false);
        let latest = buffer.lookup_transform("map", "base_link", LATEST, Duration::ZERO).unwrap();
        // map->odom interpolated at t=2, the newest stamp odom->base_link has.
        assert_abs_diff_eq!(latest.translation.vector, Vector3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_history_is_bounded_by_cache_duration() {
        let buffer = TfBuffer::new(Duration::from_secs(1));
        for i in 0..10 {
            buffer.set_transform(&tf("odom", "base_link", f64::from(i), shift(f64::from(i), 0.0)), false);
        }
        assert!(!buffer.can_transform("odom", "base_link", 5.0));
        assert!(buffer.can_transform("odom", "base_link", 8.5));
    }

    #[test]
    fn test_disconnected_frames_are_not_found() {
        let buffer = TfBuffer::default();
        buffer.set_transform(&tf("map", "odom", 0.0, shift(0.0, 0.0)), true);
        buffer.set_transform(&tf("world", "base_link", 0.0, shift(0.0, 0.0)), true);
        assert!(matches!(
            buffer.lookup_transform("map", "base_link", LATEST, Duration::ZERO),
            Err(TfError::NotFound { .. })
        ));
        assert!(matches!(
            buffer.lookup_transform("map", "nowhere", LATEST, Duration::ZERO),
            Err(TfError::NotFound { .. })
        ));
    }

    #[test]
    fn test_wait_times_out() {
        let buffer = TfBuffer::default();
        let result = buffer.lookup_transform("map", "base_link", LATEST, Duration::from_millis(20));
        match result {
            Err(TfError::Timeout { waited, .. }) => assert!(waited >= Duration::from_millis(20)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_wakes_on_insert() {
        let buffer = Arc::new(TfBuffer::default());
        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buffer.set_transform(&tf("base_link", "velodyne", 0.0, shift(0.3, 0.0)), true);
            })
        };
        let found = buffer
            .lookup_transform("base_link", "velodyne", LATEST, Duration::from_secs(5))
            .unwrap();
        producer.join().unwrap();
        assert_abs_diff_eq!(found.translation.x, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_stamp_zero_is_not_latest() {
        let buffer = TfBuffer::default();
        buffer.set_transform(&tf("odom", "base_link", 0.0, shift(0.0, 0.0)), false);
        buffer.set_transform(&tf("odom", "base_link", 2.0, shift(4.0, 0.0)), false);

        let at_zero = buffer
            .lookup_transform("odom", "base_link", LookupTime::At(0.0), Duration::ZERO)
            .unwrap();
        assert_abs_diff_eq!(at_zero.translation.x, 0.0, epsilon = 1e-12);

        let latest = buffer.lookup_transform("odom", "base_link", LATEST, Duration::ZERO).unwrap();
        assert_abs_diff_eq!(latest.translation.x, 4.0, epsilon = 1e-12);
    }
}
