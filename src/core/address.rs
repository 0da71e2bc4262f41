//! Wallet address prefix decoding
//!
//! Login validation only needs the base58 network-prefix varint at the front
//! of a CryptoNote address, not the full checksum verification. Addresses are
//! encoded in 8-byte blocks of 11 base58 characters, so decoding the first
//! block is enough to read the prefix.

use crate::error::{Error, Result};

/// Characters per full base58 block in a CryptoNote address.
const BLOCK_CHARS: usize = 11;

/// Bytes per full base58 block.
const BLOCK_BYTES: usize = 8;

/// Decode the network-prefix varint from the front of a wallet address.
pub fn address_prefix(address: &str) -> Result<u64> {
    let block = address
        .get(..BLOCK_CHARS)
        .ok_or_else(|| Error::invalid_address("address too short"))?;

    let decoded = bs58::decode(block)
        .into_vec()
        .map_err(|e| Error::invalid_address(format!("bad base58: {e}")))?;

    if decoded.len() > BLOCK_BYTES {
        return Err(Error::invalid_address("base58 block overflow"));
    }

    // A full block always represents 8 bytes; short decodings are
    // left-padded with zeros.
    let mut bytes = [0u8; BLOCK_BYTES];
    bytes[BLOCK_BYTES - decoded.len()..].copy_from_slice(&decoded);

    read_varint(&bytes)
}

/// Read an unsigned LEB128 varint from the start of a byte slice.
fn read_varint(bytes: &[u8]) -> Result<u64> {
    let mut value: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        if i >= 9 {
            break;
        }
    }
    Err(Error::invalid_address("unterminated prefix varint"))
}
