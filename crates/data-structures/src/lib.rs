//! Data structures shared across the Krait compiler crates.

pub mod index;
pub mod map;
pub mod topo;
