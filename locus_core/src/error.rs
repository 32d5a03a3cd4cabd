// locus_core/src/error.rs

use thiserror::Error;

/// Errors raised while validating configuration or building components from it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown registration method '{0}' (expected one of NDT, NDT_OMP, GICP, GICP_OMP)")]
    UnknownRegistrationMethod(String),

    #[error("invalid value for '{parameter}': {reason}")]
    InvalidParameter { parameter: &'static str, reason: String },

    #[error("failed to build registration thread pool: {0}")]
    ThreadPool(String),
}

impl ConfigError {
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }
}
