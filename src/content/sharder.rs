//! Assignment of objects to shard directories

use sha2::{Digest, Sha256};

/// Derives a shard directory and file name from an object's key
///
/// The key is hashed with SHA-256; the first `prefix_len` hex digits name
/// the shard directory and the remaining digits name the file. With the
/// default of 2 there are at most 256 shard directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sharder {
    prefix_len: usize,
}

const HEX_DIGITS: usize = 64;

impl Sharder {
    pub fn new(prefix_len: usize) -> Self {
        Self {
            prefix_len: prefix_len.clamp(1, HEX_DIGITS - 1),
        }
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Returns `(prefix, suffix)` for `key`
    pub fn assign(&self, key: &str) -> (String, String) {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        let (prefix, suffix) = digest.split_at(self.prefix_len);
        (prefix.to_string(), suffix.to_string())
    }
}

impl Default for Sharder {
    fn default() -> Self {
        Self::new(2)
    }
}
