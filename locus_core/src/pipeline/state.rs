// locus_core/src/pipeline/state.rs

use std::fmt;

/// Where the tracker is in its warm-up sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// Missing a map or an initial pose, or suspended.
    #[default]
    Idle,
    /// Map and initial pose are both present; no scan accepted yet.
    Ready,
    /// At least one scan has been aligned.
    Tracking,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Tracking => "tracking",
        };
        f.write_str(name)
    }
}

/// The two preconditions for processing scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackingGate {
    pub map_received: bool,
    pub initial_pose_received: bool,
}

impl TrackingGate {
    pub fn is_open(&self) -> bool {
        self.map_received && self.initial_pose_received
    }
}

/// Resolves the state from the gate, suspension, and whether any scan has
/// been accepted since the tracker was built.
pub(crate) fn next_state(gate: TrackingGate, suspended: bool, tracked: bool) -> TrackingState {
    if suspended || !gate.is_open() {
        TrackingState::Idle
    } else if tracked {
        TrackingState::Tracking
    } else {
        TrackingState::Ready
    }
}
