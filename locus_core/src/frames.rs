// locus_core/src/frames.rs

use nalgebra::Isometry3;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::Timestamp;

/// The time a transform lookup is evaluated at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LookupTime {
    /// The most recent transform the provider knows.
    Latest,
    At(Timestamp),
}

/// Shorthand for [`LookupTime::Latest`].
pub const LATEST: LookupTime = LookupTime::Latest;

impl From<Timestamp> for LookupTime {
    fn from(stamp: Timestamp) -> Self {
        Self::At(stamp)
    }
}

impl fmt::Display for LookupTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::At(stamp) => write!(f, "t={stamp:.6}"),
        }
    }
}

/// Why a transform lookup could not be answered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TfError {
    /// One of the frames has never been seen, or the two frames are not
    /// connected in the tree.
    #[error("no transform path from '{source_frame}' to '{target}'")]
    NotFound { target: String, source_frame: String },

    /// The frames are connected but the requested stamp lies outside the
    /// buffered history of at least one edge.
    #[error("lookup of '{source_frame}' -> '{target}' at {stamp} would require extrapolation")]
    Extrapolation {
        target: String,
        source_frame: String,
        stamp: LookupTime,
    },

    /// The transform did not become available within the allowed wait.
    #[error("timed out after {waited:?} waiting for '{source_frame}' -> '{target}'")]
    Timeout {
        target: String,
        source_frame: String,
        waited: Duration,
    },
}

/// The contract for any object that can answer transform queries.
/// The node's transform buffer implements it, as will a mock for testing.
pub trait TfProvider {
    /// Returns `T_target_source`: the isometry that maps points expressed in
    /// `source` into `target` (equivalently, the pose of `source` in `target`).
    ///
    /// Implementations may block for at most `timeout` waiting for data to
    /// arrive and must never block indefinitely.
    fn lookup_transform(
        &self,
        target: &str,
        source: &str,
        time: LookupTime,
        timeout: Duration,
    ) -> Result<Isometry3<f64>, TfError>;
}
