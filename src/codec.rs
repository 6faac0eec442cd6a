//! Value codecs
//!
//! Pluggable per-type serialization for tuple keys and values. Every codec
//! must round-trip exactly, and its byte form must sort consistently with
//! the comparator used by the tree that stores it: a tree re-opened from
//! disk has to preserve its order.

use crate::error::{DirError, Result};

/// A per-type codec: object to bytes and back
pub trait Codec<T> {
    /// Serialize a value to its canonical byte representation
    fn serialize(&self, value: &T) -> Vec<u8>;

    /// Deserialize a value from bytes produced by `serialize`
    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

// =============================================================================
// Signed integer codec (minimal two's-complement)
// =============================================================================

/// Codec for signed integers using the minimal big-endian two's-complement
/// representation: the shortest byte string whose sign extension yields the
/// value. Zero encodes as a single 0x00 byte.
pub struct IntCodec;

impl Codec<i128> for IntCodec {
    fn serialize(&self, value: &i128) -> Vec<u8> {
        let full = value.to_be_bytes();

        // Strip redundant leading bytes: a 0x00 whose successor has a clear
        // sign bit, or a 0xFF whose successor has a set sign bit.
        let mut start = 0;
        while start < full.len() - 1 {
            let lead = full[start];
            let next_high = full[start + 1] & 0x80 != 0;
            if (lead == 0x00 && !next_high) || (lead == 0xFF && next_high) {
                start += 1;
            } else {
                break;
            }
        }
        full[start..].to_vec()
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<i128> {
        if bytes.is_empty() {
            return Err(DirError::Serialization(
                "empty integer representation".to_string(),
            ));
        }
        if bytes.len() > 16 {
            return Err(DirError::Serialization(format!(
                "integer representation too long: {} bytes",
                bytes.len()
            )));
        }

        let fill = if bytes[0] & 0x80 != 0 { 0xFF } else { 0x00 };
        let mut full = [fill; 16];
        full[16 - bytes.len()..].copy_from_slice(bytes);
        Ok(i128::from_be_bytes(full))
    }
}

// =============================================================================
// Fixed-width u64 codec
// =============================================================================

/// Codec for entry identifiers: fixed 8-byte big-endian, so the raw byte
/// order equals the numeric order.
pub struct U64Codec;

impl Codec<u64> for U64Codec {
    fn serialize(&self, value: &u64) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u64> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| {
            DirError::Serialization(format!("expected 8 bytes for u64, got {}", bytes.len()))
        })?;
        Ok(u64::from_be_bytes(arr))
    }
}

// =============================================================================
// String codec
// =============================================================================

/// Codec for UTF-8 strings
pub struct StrCodec;

impl Codec<String> for StrCodec {
    fn serialize(&self, value: &String) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DirError::Serialization(format!("invalid UTF-8: {}", e)))
    }
}
