//! IR analyses.

pub mod liveness;

pub use liveness::{LiveSet, Liveness};
