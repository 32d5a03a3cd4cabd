// locus_core/src/registration/mod.rs

//! Scan-to-map alignment.
//!
//! The tracker only talks to the [`AlignmentOracle`] trait. Concrete oracles
//! are picked by family name at configure time through [`build_oracle`].

use nalgebra::Isometry3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::error::ConfigError;
use crate::messages::PointCloud;

pub mod icp;
pub mod index;
pub mod ndt;

pub use icp::IcpOracle;
pub use ndt::NdtOracle;

// =========================================================================
// == Oracle Contract ==
// =========================================================================

/// Outcome of one alignment attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentResult {
    /// `T_global_base` proposed by the oracle.
    pub final_transform: Isometry3<f64>,
    pub converged: bool,
    /// Mean squared distance between aligned source points and their nearest
    /// target points. Lower is better.
    pub fitness_score: f64,
    pub iterations: u32,
}

impl AlignmentResult {
    /// A non-converged result that echoes the initial guess.
    pub fn failed(initial_guess: &Isometry3<f64>) -> Self {
        Self {
            final_transform: *initial_guess,
            converged: false,
            fitness_score: f64::MAX,
            iterations: 0,
        }
    }
}

/// The contract for any scan-to-map registration algorithm.
pub trait AlignmentOracle: Send {
    fn method(&self) -> RegistrationMethod;

    /// Installs the reference cloud. The oracle keeps whatever index it needs
    /// but never modifies the cloud it was given.
    fn set_target(&mut self, target: &PointCloud);

    fn has_target(&self) -> bool;

    /// Aligns `source` (base frame) against the target starting from
    /// `initial_guess`. Degenerate inputs yield `converged == false`.
    fn align(&mut self, source: &PointCloud, initial_guess: &Isometry3<f64>) -> AlignmentResult;
}

// =========================================================================
// == Method Selection ==
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationMethod {
    Ndt,
    NdtOmp,
    Gicp,
    GicpOmp,
}

impl RegistrationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ndt => "NDT",
            Self::NdtOmp => "NDT_OMP",
            Self::Gicp => "GICP",
            Self::GicpOmp => "GICP_OMP",
        }
    }

    /// GICP-family oracles are installed with a voxel-downsampled map.
    pub fn requires_downsampled_target(&self) -> bool {
        matches!(self, Self::Gicp | Self::GicpOmp)
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::NdtOmp | Self::GicpOmp)
    }
}

impl fmt::Display for RegistrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NDT" => Ok(Self::Ndt),
            "NDT_OMP" => Ok(Self::NdtOmp),
            "GICP" => Ok(Self::Gicp),
            "GICP_OMP" => Ok(Self::GicpOmp),
            other => Err(ConfigError::UnknownRegistrationMethod(other.to_string())),
        }
    }
}

// =========================================================================
// == Parameters ==
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrationParams {
    /// One of `NDT`, `NDT_OMP`, `GICP`, `GICP_OMP`.
    pub method: String,
    /// Fitness above this is reported as a poor match.
    pub score_threshold: f64,
    /// Reject (instead of merely warn about) results above `score_threshold`.
    pub fitness_hard_gate: bool,
    pub ndt_resolution: f64,
    pub ndt_step_size: f64,
    pub ndt_max_iterations: u32,
    /// Worker threads for the `*_OMP` variants; 0 means one per core.
    pub ndt_num_threads: usize,
    pub transform_epsilon: f64,
    pub max_correspondence_distance: f64,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            method: "NDT".to_string(),
            score_threshold: 2.0,
            fitness_hard_gate: false,
            ndt_resolution: 1.0,
            ndt_step_size: 0.1,
            ndt_max_iterations: 35,
            ndt_num_threads: 4,
            transform_epsilon: 0.01,
            max_correspondence_distance: 1.0,
        }
    }
}

impl RegistrationParams {
    pub fn validate(&self) -> Result<RegistrationMethod, ConfigError> {
        let method = self.method.parse::<RegistrationMethod>()?;
        if !(self.ndt_resolution > 0.0) {
            return Err(ConfigError::invalid("registration.ndt_resolution", "must be > 0"));
        }
        if !(self.ndt_step_size > 0.0) {
            return Err(ConfigError::invalid("registration.ndt_step_size", "must be > 0"));
        }
        if self.ndt_max_iterations == 0 {
            return Err(ConfigError::invalid("registration.ndt_max_iterations", "must be > 0"));
        }
        if !(self.transform_epsilon >= 0.0) {
            return Err(ConfigError::invalid("registration.transform_epsilon", "must be >= 0"));
        }
        if !(self.max_correspondence_distance > 0.0) {
            return Err(ConfigError::invalid(
                "registration.max_correspondence_distance",
                "must be > 0",
            ));
        }
        if !(self.score_threshold >= 0.0) {
            return Err(ConfigError::invalid("registration.score_threshold", "must be >= 0"));
        }
        Ok(method)
    }
}

/// Builds the oracle for the configured family.
pub fn build_oracle(params: &RegistrationParams) -> Result<Box<dyn AlignmentOracle>, ConfigError> {
    let method = params.validate()?;
    let parallelism = if method.is_parallel() {
        Parallelism::pool(params.ndt_num_threads)?
    } else {
        Parallelism::Sequential
    };
    info!(%method, threads = parallelism.threads(), "Building registration oracle.");

    let oracle: Box<dyn AlignmentOracle> = match method {
        RegistrationMethod::Ndt | RegistrationMethod::NdtOmp => {
            Box::new(NdtOracle::new(method, params, parallelism))
        }
        RegistrationMethod::Gicp | RegistrationMethod::GicpOmp => {
            Box::new(IcpOracle::new(method, params, parallelism))
        }
    };
    Ok(oracle)
}

// =========================================================================
// == Parallel Execution ==
// =========================================================================

/// Where the per-point work of an oracle runs.
#[derive(Debug, Default)]
pub enum Parallelism {
    #[default]
    Sequential,
    Pool(rayon::ThreadPool),
}

impl Parallelism {
    /// A dedicated rayon pool. `0` threads lets rayon pick one per core.
    pub fn pool(num_threads: usize) -> Result<Self, ConfigError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("locus-align-{i}"))
            .build()
            .map(Self::Pool)
            .map_err(|e| ConfigError::ThreadPool(e.to_string()))
    }

    pub fn threads(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Pool(pool) => pool.current_num_threads(),
        }
    }

    /// Evaluates `f` for every index in `0..n`, preserving order.
    pub fn map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match self {
            Self::Sequential => (0..n).map(f).collect(),
            Self::Pool(pool) => pool.install(|| (0..n).into_par_iter().map(f).collect()),
        }
    }
}
