// locus_node/src/config/mod.rs

//! Loads the node configuration: built-in defaults, then an optional TOML
//! file, then `LOCUS_`-prefixed environment variables (`__` separates
//! sections, e.g. `LOCUS_REGISTRATION__METHOD=GICP`).

pub mod serde_helpers;
pub mod structs;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub use structs::{InitialPoseConfig, LocalizationConfig, MapConfig, StaticTransformConfig};

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("config file '{0}' does not exist")]
    MissingFile(PathBuf),

    #[error(transparent)]
    Figment(#[from] figment::Error),
}

fn defaults() -> Figment {
    Figment::from(Serialized::defaults(LocalizationConfig::default()))
}

/// Loads configuration from defaults, `path` (when given), and the environment.
pub fn load(path: Option<&Path>) -> Result<LocalizationConfig, ConfigLoadError> {
    let mut figment = defaults();
    if let Some(path) = path {
        if !path.is_file() {
            return Err(ConfigLoadError::MissingFile(path.to_path_buf()));
        }
        info!("Loading configuration from: {}", path.display());
        figment = figment.merge(Toml::file(path));
    }
    let config = figment.merge(Env::prefixed("LOCUS_").split("__")).extract()?;
    Ok(config)
}

/// Parses a TOML document on top of the defaults, without consulting the
/// environment.
pub fn from_toml_str(toml: &str) -> Result<LocalizationConfig, ConfigLoadError> {
    Ok(defaults().merge(Toml::string(toml)).extract()?)
}
