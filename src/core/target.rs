//! Difficulty/target arithmetic
//!
//! Converts pool difficulties into the 4-byte compact targets sent to miners
//! and submitted hashes into the difficulty they actually achieved. All
//! 256-bit math goes through `num-bigint`; difficulties themselves fit in
//! `u64` everywhere else in the pool.

use num_bigint::BigUint;
use num_traits::Zero;
use once_cell::sync::Lazy;

/// Base difficulty-1 target: 2^256 - 1.
static DIFF1: Lazy<BigUint> = Lazy::new(|| {
    BigUint::parse_bytes(
        b"FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
        16,
    )
    .expect("diff1 constant parses")
});

/// The difficulty-1 target as a big integer.
pub fn diff1() -> &'static BigUint {
    &DIFF1
}

/// Compact target for a job difficulty.
///
/// `diff1 / difficulty` padded big-endian to 32 bytes; the first 4 bytes are
/// byte-reversed and hex-encoded. This is the `target` field of a job payload
/// in the CryptoNote stratum-like dialect.
pub fn difficulty_to_target_hex(difficulty: u64) -> String {
    let difficulty = difficulty.max(1);
    let quotient = &*DIFF1 / BigUint::from(difficulty);
    let bytes = quotient.to_bytes_be();

    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(&bytes);

    let mut prefix = [padded[0], padded[1], padded[2], padded[3]];
    prefix.reverse();
    hex::encode(prefix)
}

/// Difficulty achieved by a proof-of-work hash.
///
/// The hash arrives little-endian from the hashing function; it is reversed,
/// interpreted as a big-endian 256-bit integer `h`, and the result is
/// `diff1 / h`. An all-zero hash maps to the maximal difficulty rather than
/// dividing by zero.
pub fn hash_difficulty(hash: &[u8; 32]) -> BigUint {
    let mut reversed = *hash;
    reversed.reverse();
    let value = BigUint::from_bytes_be(&reversed);
    if value.is_zero() {
        return DIFF1.clone();
    }
    &*DIFF1 / value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_hex_difficulty_one() {
        // diff1 / 1 keeps all bits set, so the compact prefix is 0xffffffff.
        assert_eq!(difficulty_to_target_hex(1), "ffffffff");
    }

    #[test]
    fn test_target_hex_difficulty_two() {
        // diff1 / 2 = 0x7fff..ff; first four bytes 7f ff ff ff, reversed.
        assert_eq!(difficulty_to_target_hex(2), "ffffff7f");
    }

    #[test]
    fn test_target_prefix_shrinks_with_difficulty() {
        // Decode the reversed prefix back to its big-endian value before
        // comparing.
        fn prefix_value(difficulty: u64) -> u32 {
            let mut raw = hex::decode(difficulty_to_target_hex(difficulty)).unwrap();
            raw.reverse();
            u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])
        }
        assert!(prefix_value(10_000) < prefix_value(100));
    }

    #[test]
    fn test_zero_difficulty_clamped() {
        assert_eq!(difficulty_to_target_hex(0), difficulty_to_target_hex(1));
    }

    #[test]
    fn test_hash_difficulty_max_hash() {
        // A hash of all 0xFF is the hardest-to-beat value: difficulty 1.
        let hash = [0xFFu8; 32];
        assert_eq!(hash_difficulty(&hash), BigUint::from(1u64));
    }

    #[test]
    fn test_hash_difficulty_zero_hash() {
        let hash = [0u8; 32];
        assert_eq!(hash_difficulty(&hash), *diff1());
    }

    #[test]
    fn test_hash_difficulty_little_endian_interpretation() {
        // Only the last byte set: little-endian that is the most significant
        // byte, so the value is large and the difficulty small.
        let mut high = [0u8; 32];
        high[31] = 0xFF;

        // Only the first byte set: little-endian least significant, tiny
        // value, enormous difficulty.
        let mut low = [0u8; 32];
        low[0] = 0xFF;

        assert!(hash_difficulty(&high) < hash_difficulty(&low));
    }

    #[test]
    fn test_hash_difficulty_halves_as_hash_doubles() {
        let mut one = [0u8; 32];
        one[31] = 0x01;
        let d1 = hash_difficulty(&one);

        let mut two = [0u8; 32];
        two[31] = 0x02;
        let d2 = hash_difficulty(&two);

        assert_eq!(d1 / BigUint::from(2u64), d2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn target_hex_always_eight_chars(difficulty in any::<u64>()) {
                let hex = difficulty_to_target_hex(difficulty);
                prop_assert_eq!(hex.len(), 8);
                prop_assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
            }

            #[test]
            fn hash_difficulty_times_hash_never_exceeds_diff1(
                bytes in prop::array::uniform32(1u8..=255u8)
            ) {
                let mut reversed = bytes;
                reversed.reverse();
                let value = BigUint::from_bytes_be(&reversed);
                let achieved = hash_difficulty(&bytes);
                prop_assert!(&achieved * &value <= *diff1());
            }

            #[test]
            fn hash_difficulty_at_least_one(bytes in prop::array::uniform32(any::<u8>())) {
                prop_assert!(hash_difficulty(&bytes) >= BigUint::from(1u64));
            }
        }
    }
}
