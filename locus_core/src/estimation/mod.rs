// locus_core/src/estimation/mod.rs

pub mod motion;

pub use motion::{MotionPredictor, PredictionError};
