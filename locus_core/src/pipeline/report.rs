// locus_core/src/pipeline/report.rs

use nalgebra::Isometry3;
use std::time::Duration;
use thiserror::Error;

use super::TrackingState;
use crate::estimation::PredictionError;
use crate::frames::TfError;
use crate::types::Timestamp;

/// Why a handler did not apply its input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    #[error("tracker is {0}; scans are only processed when ready or tracking")]
    NotReady(TrackingState),

    #[error("{kind} arrived in frame '{actual}', expected '{expected}'")]
    FrameMismatch {
        kind: &'static str,
        expected: String,
        actual: String,
    },

    #[error("required transform unavailable: {0}")]
    TransformUnavailable(#[source] TfError),

    #[error("scan has no points left after filtering")]
    EmptyScan,

    #[error("reference map has no points")]
    EmptyMap,

    #[error("registration did not converge (fitness {fitness_score:.4})")]
    NotConverged { fitness_score: f64 },

    #[error("fitness {fitness_score:.4} exceeds threshold {threshold:.4}")]
    FitnessRejected { fitness_score: f64, threshold: f64 },

    #[error("no current pose estimate")]
    NoEstimate,

    #[error("{0} fusion is disabled")]
    FusionDisabled(&'static str),

    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

/// Summary of one accepted scan cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub stamp: Timestamp,
    pub pose: Isometry3<f64>,
    pub fitness_score: f64,
    pub iterations: u32,
    pub raw_points: usize,
    pub filtered_points: usize,
    pub align_time: Duration,
    /// Rotation between initial guess and result, in degrees.
    pub delta_angle_deg: f64,
    /// Fitness was above the threshold but the soft gate let it through.
    pub poor_fitness: bool,
}

/// What a dispatched input did to the tracker.
#[derive(Debug)]
pub enum TrackerEvent {
    /// Odometry integrated over `dt` seconds, or only advanced the clock.
    Predicted { dt: Option<f64> },
    ImuBuffered,
    ScanAccepted(CycleReport),
    /// The remembered scan, if any, was replayed against the new pose.
    InitialPoseApplied {
        replay: Option<Result<CycleReport, CycleError>>,
    },
    MapInstalled { points: usize },
}
