// locus_core/src/preprocessing/mod.rs

//! Scan conditioning applied before registration.

pub mod deskew;
pub mod filters;

pub use deskew::{InertialSample, ScanDeskewer};
pub use filters::{RangeFilter, VoxelGrid};
