//! Proof-of-work hashing boundary
//!
//! The memory-hard RandomX implementation lives in an external library; the
//! pool only needs "hash these bytes under this seed" and a stable 32-byte
//! result to compare and rank. `Blake2Pow` is a deterministic stand-in with
//! the same shape, used for tests and development deployments.

use blake2::{Blake2s256, Digest};

/// Hashes a reconstructed block blob under the template's seed hash.
pub trait PowHasher: Send + Sync {
    /// Compute the 32-byte proof-of-work hash of `blob`.
    fn hash(&self, blob: &[u8], seed_hash: &str) -> [u8; 32];
}

/// Blake2s-based stand-in for the external RandomX hasher.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake2Pow;

impl PowHasher for Blake2Pow {
    fn hash(&self, blob: &[u8], seed_hash: &str) -> [u8; 32] {
        let mut hasher = Blake2s256::new();
        hasher.update(seed_hash.as_bytes());
        hasher.update(blob);
        hasher.finalize().into()
    }
}
