//! Share validation primitives
//!
//! Pure helpers for the submit path: nonce normalization and the
//! three-way classification of a proof-of-work hash against job and
//! network difficulty.

use crate::core::target::hash_difficulty;
use num_bigint::BigUint;

/// Result of weighing a share's hash against the two difficulties that
/// matter: the job's (what the miner was asked for) and the template's
/// (what the network wants).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareClass {
    /// Meets the network difficulty: submit the block upstream.
    Candidate { hash_difficulty: BigUint },
    /// Meets the job difficulty only: credit the share.
    Accepted,
    /// Below the job difficulty: reject.
    TooLow { hash_difficulty: BigUint },
}

/// Classify a proof-of-work hash.
pub fn classify(hash: &[u8; 32], job_difficulty: u64, template_difficulty: u64) -> ShareClass {
    let hash_diff = hash_difficulty(hash);
    if hash_diff >= BigUint::from(template_difficulty) {
        ShareClass::Candidate {
            hash_difficulty: hash_diff,
        }
    } else if hash_diff >= BigUint::from(job_difficulty) {
        ShareClass::Accepted
    } else {
        ShareClass::TooLow {
            hash_difficulty: hash_diff,
        }
    }
}

/// Normalize a submitted nonce to its canonical form: exactly eight
/// lowercase hex characters. Anything else is malformed.
pub fn normalize_nonce(nonce: &str) -> Option<String> {
    let trimmed: String = nonce.chars().take(8).collect::<String>().to_lowercase();
    if trimmed.len() == 8 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(trimmed)
    } else {
        None
    }
}

/// Decode a canonical nonce into the four bytes written into the blob.
pub fn nonce_bytes(nonce: &str) -> Option<[u8; 4]> {
    let raw = hex::decode(nonce).ok()?;
    raw.try_into().ok()
}

/// Decode the hash a miner claims for its share.
pub fn claimed_hash(result: &str) -> Option<[u8; 32]> {
    let raw = hex::decode(result).ok()?;
    raw.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::diff1;

    /// Build a hash whose difficulty is at least `difficulty` but only
    /// marginally above it.
    fn hash_with_difficulty(difficulty: u64) -> [u8; 32] {
        let value = diff1() / BigUint::from(difficulty);
        let be = value.to_bytes_be();
        let mut padded = [0u8; 32];
        padded[32 - be.len()..].copy_from_slice(&be);
        padded.reverse();
        padded
    }

    #[test]
    fn test_candidate_when_network_difficulty_met() {
        let hash = hash_with_difficulty(6_000_000);
        assert!(matches!(
            classify(&hash, 1_000_000, 5_000_000),
            ShareClass::Candidate { .. }
        ));
    }

    #[test]
    fn test_accepted_between_job_and_network() {
        let hash = hash_with_difficulty(2_000_000);
        assert_eq!(classify(&hash, 1_000_000, 5_000_000), ShareClass::Accepted);
    }

    #[test]
    fn test_too_low_below_job_difficulty() {
        let hash = hash_with_difficulty(500_000);
        assert!(matches!(
            classify(&hash, 1_000_000, 5_000_000),
            ShareClass::TooLow { .. }
        ));
    }

    #[test]
    fn test_exact_job_difficulty_accepted() {
        // diff1 / (diff1 / d) >= d, so a boundary hash always credits.
        let hash = hash_with_difficulty(1_000_000);
        assert_eq!(classify(&hash, 1_000_000, 5_000_000), ShareClass::Accepted);
    }

    #[test]
    fn test_normalize_nonce_truncates_and_lowercases() {
        assert_eq!(normalize_nonce("DEADBEEF"), Some("deadbeef".into()));
        assert_eq!(normalize_nonce("deadbeefcafe"), Some("deadbeef".into()));
    }

    #[test]
    fn test_normalize_nonce_rejects_malformed() {
        assert_eq!(normalize_nonce("xyz"), None);
        assert_eq!(normalize_nonce("deadbee"), None);
        assert_eq!(normalize_nonce("deadbeeg"), None);
        assert_eq!(normalize_nonce(""), None);
    }

    #[test]
    fn test_nonce_bytes_round_trip() {
        assert_eq!(nonce_bytes("0000002a"), Some([0x00, 0x00, 0x00, 0x2a]));
        assert_eq!(nonce_bytes("zzzzzzzz"), None);
    }

    #[test]
    fn test_claimed_hash_requires_32_bytes() {
        assert!(claimed_hash(&"ab".repeat(32)).is_some());
        assert!(claimed_hash(&"ab".repeat(31)).is_none());
        assert!(claimed_hash("not hex").is_none());
    }
}
