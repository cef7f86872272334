//! Content addresses and node identifiers.

use sbor::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A 32-byte content address derived from chunk bytes.
///
/// Keys order lexicographically and are safe to use as HashMap keys.
/// Proximity between two keys is the bit length of their common prefix,
/// which is how candidate peers are ranked for a retrieval.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
#[sbor(transparent)]
pub struct Key([u8; 32]);

impl Key {
    /// Size of a key in bytes.
    pub const BYTES: usize = 32;

    /// Zero key (all bytes are 0x00). Stands in for an omitted key.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Key from raw bytes (without hashing).
    ///
    /// # Panics
    ///
    /// Panics if bytes length is not exactly 32.
    pub fn from_hash_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), 32, "Key must be exactly 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Self(arr)
    }

    /// Fallible variant of [`from_hash_bytes`](Self::from_hash_bytes) for wire input.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, HexError> {
        if bytes.len() != 32 {
            return Err(HexError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        Ok(Self::from_hash_bytes(bytes))
    }

    /// Parse key from hex string.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        if hex.len() != 64 {
            return Err(HexError::InvalidLength {
                expected: 64,
                actual: hex.len(),
            });
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| HexError::InvalidHex)?;

        Ok(Self(bytes))
    }

    /// Convert key to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to bytes array.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Check if this is the zero key.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Bit length of the common prefix with `other`.
    ///
    /// 256 means equal keys; 0 means the first bit already differs.
    /// Higher proximity = closer in the overlay key space.
    pub fn proximity(&self, other: &Key) -> u32 {
        let mut count = 0u32;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let diff = a ^ b;
            if diff == 0 {
                count += 8;
            } else {
                count += diff.leading_zeros();
                return count;
            }
        }
        count
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Key({}..{})", &hex[..8], &hex[56..])
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Key::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A 32-byte opaque node identifier.
///
/// A node's overlay address — its coordinate in the chunk key space — is
/// the SHA3-256 of its identifier bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Size of a node identifier in bytes.
    pub const BYTES: usize = 32;

    /// Generate a random node identifier.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Create a NodeId from raw bytes.
    ///
    /// # Panics
    ///
    /// Panics if bytes length is not exactly 32.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), 32, "NodeId must be exactly 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Self(arr)
    }

    /// Parse a node identifier from hex.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        let key = Key::from_hex(hex)?;
        Ok(Self(key.0))
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The node's coordinate in the chunk key space.
    pub fn overlay_addr(&self) -> Key {
        use sha3::{Digest, Sha3_256};
        Key::from_hash_bytes(Sha3_256::digest(self.0).as_slice())
    }

    /// Short hex label for logging.
    pub fn label(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.label())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing hex strings or raw key bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    /// Invalid length.
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Invalid hex characters.
    #[error("Invalid hex string")]
    InvalidHex,
}
