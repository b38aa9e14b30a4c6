//! Core deterministic primitives.
//!
//! Geometry, seeded randomness and state hashing. Everything here is a
//! pure function of its inputs.

pub mod geometry;
pub mod rng;
pub mod hash;

// Re-export core types
pub use geometry::{distance, point_to_segment_distance, wrap_position};
pub use rng::DeterministicRng;
pub use hash::{compute_state_hash, StateHash};
