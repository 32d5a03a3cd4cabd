// locus_node/src/lib.rs

// This prelude is for convenience for binaries and tests of this crate.
pub mod prelude;

pub mod cli;
pub mod config;
pub mod io;
pub mod runtime;
