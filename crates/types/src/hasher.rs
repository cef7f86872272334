//! Chunk hashing.

use crate::Key;
use std::str::FromStr;

/// Hash algorithm used to derive chunk keys.
///
/// Both options are collision-resistant with a fixed 32-byte output, which
/// is all the store requires of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgo {
    /// SHA3-256. The default for on-disk stores.
    #[default]
    Sha3,
    /// Blake3. Faster, useful for large simulated networks.
    Blake3,
}

impl FromStr for HashAlgo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha3" | "sha3-256" => Ok(HashAlgo::Sha3),
            "blake3" => Ok(HashAlgo::Blake3),
            other => Err(format!("unknown hash algorithm: {other}")),
        }
    }
}

/// Computes chunk keys from chunk bytes. Deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hasher {
    algo: HashAlgo,
}

impl Hasher {
    /// Create a hasher for the given algorithm.
    pub fn new(algo: HashAlgo) -> Self {
        Self { algo }
    }

    /// The configured algorithm.
    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    /// Hash chunk bytes into a key.
    pub fn hash(&self, data: &[u8]) -> Key {
        match self.algo {
            HashAlgo::Sha3 => {
                use sha3::{Digest, Sha3_256};
                Key::from_hash_bytes(Sha3_256::digest(data).as_slice())
            }
            HashAlgo::Blake3 => Key::from_hash_bytes(blake3::hash(data).as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let hasher = Hasher::default();
        assert_eq!(hasher.hash(b"hello world"), hasher.hash(b"hello world"));
    }

    #[test]
    fn test_hash_collision_resistance() {
        let hasher = Hasher::default();
        assert_ne!(hasher.hash(b"hello"), hasher.hash(b"world"));
    }

    #[test]
    fn test_algos_differ() {
        let data = b"chunk bytes";
        assert_ne!(
            Hasher::new(HashAlgo::Sha3).hash(data),
            Hasher::new(HashAlgo::Blake3).hash(data)
        );
    }

    #[test]
    fn test_parse_algo() {
        assert_eq!("sha3".parse::<HashAlgo>().unwrap(), HashAlgo::Sha3);
        assert_eq!("SHA3-256".parse::<HashAlgo>().unwrap(), HashAlgo::Sha3);
        assert_eq!("blake3".parse::<HashAlgo>().unwrap(), HashAlgo::Blake3);
        assert!("md5".parse::<HashAlgo>().is_err());
    }
}
