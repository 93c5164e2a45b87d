//! Block structure for the ledger
//!
//! A `BlockSkeleton` is what the caller assembles; only the miner turns it
//! into a `Block` by filling in the nonce and hash.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::consensus::{canonicalize, hash_input, IdentifierPolicy, PayloadError};

/// An unmined block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockSkeleton {
    /// Position in the chain
    pub index: u64,
    /// Creation time, never changed afterwards
    pub timestamp: String,
    /// Transaction payload
    pub data: Value,
    /// Hash of the previous block, or the genesis sentinel
    pub previous_hash: String,
}

impl BlockSkeleton {
    /// Create a new skeleton
    pub fn new(index: u64, timestamp: impl Into<String>, data: Value, previous_hash: impl Into<String>) -> Self {
        Self {
            index,
            timestamp: timestamp.into(),
            data,
            previous_hash: previous_hash.into(),
        }
    }

    /// Create a skeleton stamped with the current UTC time (RFC 3339, milliseconds)
    pub fn stamped_now(index: u64, data: Value, previous_hash: impl Into<String>) -> Self {
        Self::new(index, current_timestamp(), data, previous_hash)
    }

    /// Attach the proof found by the miner
    pub fn seal(self, nonce: u64, hash: String) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            data: self.data,
            previous_hash: self.previous_hash,
            nonce,
            hash,
        }
    }
}

/// A mined block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position in the chain
    pub index: u64,
    /// Creation time
    pub timestamp: String,
    /// Transaction payload
    pub data: Value,
    /// Hash of the previous block, or the genesis sentinel
    pub previous_hash: String,
    /// Proof-of-work nonce
    pub nonce: u64,
    /// Digest of `index || nonce || canonical(data) || previous_hash`
    pub hash: String,
}

impl Block {
    /// Rebuild the exact string the stored hash should have been computed from
    pub fn hash_input(&self, identifiers: IdentifierPolicy) -> Result<String, PayloadError> {
        let canonical = canonicalize(&self.data, identifiers)?;
        Ok(hash_input(self.index, self.nonce, &canonical, &self.previous_hash))
    }

    /// Whether this block sits at a given `(index, timestamp, previous_hash)` position
    pub fn occupies(&self, index: u64, timestamp: &str, previous_hash: &str) -> bool {
        self.index == index && self.timestamp == timestamp && self.previous_hash == previous_hash
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_PREVIOUS_HASH
    }
}

/// Current UTC time, e.g. `2024-05-01T10:00:00.000Z`
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
