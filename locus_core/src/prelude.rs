// locus_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::frames::{LookupTime, TfError, TfProvider, LATEST};
pub use crate::pipeline::Publisher;
pub use crate::registration::AlignmentOracle;

// --- Core Data Structures ---
pub use crate::messages::{
    ImuSample, Odometry, Path, Point, PointCloud, PoseStamped, PoseWithCovarianceStamped,
    TrackerInput, TransformStamped,
};
pub use crate::types::Timestamp;

// --- Configuration ---
pub use crate::config::{
    DebugConfig, FilterConfig, FrameConfig, FusionConfig, ScanConfig, TrackerConfig,
};
pub use crate::error::ConfigError;
pub use crate::registration::{RegistrationMethod, RegistrationParams};

// --- Tracking ---
pub use crate::pipeline::{
    CycleError, CycleReport, PoseTracker, TrackerContext, TrackerEvent, TrackingState,
};
pub use crate::registration::{build_oracle, AlignmentResult};
