// locus_core/src/lib.rs

// This file defines the public modules of the library.
pub mod config;
pub mod error;
pub mod estimation;
pub mod frames;
pub mod messages;
pub mod pipeline;
pub mod prelude;
pub mod preprocessing;
pub mod registration;
pub mod types;
