//! State Hashing for Verification
//!
//! Provides deterministic hashing of round state for:
//! - Replay validation
//! - Comparing a client's mirror against the host's canonical set

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for round state.
///
/// Wraps SHA-256 with helpers for the simulation's scalar types.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for round state.
    pub fn for_round_state() -> Self {
        Self::new(b"KURVE_ROUND_STATE_V1")
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an f64 by its exact bit pattern.
    ///
    /// `-0.0` and `0.0` hash differently, as do distinct NaN payloads.
    #[inline]
    pub fn update_f64(&mut self, value: f64) {
        self.update_u64(value.to_bits());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute state hash for round verification.
///
/// Called by `RoundState::compute_hash()`.
/// The closure adds state-specific data after the header.
pub fn compute_state_hash<F>(tick: u32, rng_seed: u64, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_round_state();

    // Always hash tick and seed first
    hasher.update_u32(tick);
    hasher.update_u64(rng_seed);

    add_state(&mut hasher);

    hasher.finalize()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_hasher_determinism() {
        let make_hash = || {
            let mut hasher = StateHasher::for_round_state();
            hasher.update_u32(100);
            hasher.update_u64(12345);
            hasher.update_f64(5.5);
            hasher.update_bool(true);
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(1);
            h.update_u32(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(2);
            h.update_u32(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_f64_bit_exact() {
        let hash = |v: f64| {
            let mut h = StateHasher::new(b"test");
            h.update_f64(v);
            h.finalize()
        };

        assert_eq!(hash(1.5), hash(1.5));
        assert_ne!(hash(0.0), hash(-0.0));
        assert_ne!(hash(1.0), hash(1.0 + f64::EPSILON));
    }

    #[test]
    fn test_compute_state_hash() {
        let hash = compute_state_hash(100, 12345, |hasher| {
            hasher.update_f64(5.0);
            hasher.update_bool(true);
        });

        let hash2 = compute_state_hash(100, 12345, |hasher| {
            hasher.update_f64(5.0);
            hasher.update_bool(true);
        });

        assert_eq!(hash, hash2);

        let hash3 = compute_state_hash(101, 12345, |hasher| {
            hasher.update_f64(5.0);
            hasher.update_bool(true);
        });

        assert_ne!(hash, hash3);
    }
}
