//! Block verification
//!
//! Recomputes a stored block's hash from its canonical payload and the
//! stored nonce. A mismatch is reported, never repaired.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::consensus::{Block, MiningPolicy, PayloadError};
use crate::crypto::{digest_hex, DigestError};
use crate::mining::MiningAttempt;

/// Verification errors
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The block cannot be verified at all, as opposed to failing verification
    #[error("block {index} ({timestamp}, previous hash {previous_hash}) is not in the supplied chain")]
    BlockNotFound {
        index: u64,
        timestamp: String,
        previous_hash: String,
    },
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Digest(#[from] DigestError),
}

/// Outcome of comparing the recomputed hash with the stored one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Verdict {
    Match,
    Mismatch { stored: String, recomputed: String },
}

/// A verification trace and its verdict
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    /// Two entries: the stored result, then the recomputed one
    pub attempts: Vec<MiningAttempt>,
    #[serde(flatten)]
    pub verdict: Verdict,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self.verdict, Verdict::Match)
    }
}

/// Verify a block with the default policy
pub fn verify_block(block: &Block, all_blocks: &[Block]) -> Result<Verification, VerifyError> {
    verify_block_with(&MiningPolicy::default(), block, all_blocks)
}

/// Verify a block.
///
/// The block is looked up in `all_blocks` by `(index, timestamp,
/// previous_hash)` and the stored copy found there is the one checked.
pub fn verify_block_with(
    policy: &MiningPolicy,
    block: &Block,
    all_blocks: &[Block],
) -> Result<Verification, VerifyError> {
    let stored = all_blocks
        .iter()
        .find(|candidate| candidate.occupies(block.index, &block.timestamp, &block.previous_hash))
        .ok_or_else(|| VerifyError::BlockNotFound {
            index: block.index,
            timestamp: block.timestamp.clone(),
            previous_hash: block.previous_hash.clone(),
        })?;

    let input = stored.hash_input(policy.identifiers)?;
    let recomputed = digest_hex(&input)?;
    let matches = recomputed == stored.hash;

    let mut attempts = Vec::with_capacity(2);
    attempts.push(MiningAttempt {
        nonce: stored.nonce,
        hash: stored.hash.clone(),
        description: "Stored result from the chain".to_string(),
        hash_input: Some(input.clone()),
        detail: Some(format!("stored hash: {}", stored.hash)),
    });

    let verdict = if matches {
        debug!(index = stored.index, hash = %stored.hash, "block verified");
        attempts.push(MiningAttempt {
            nonce: stored.nonce,
            hash: recomputed,
            description: "Hash verification succeeded".to_string(),
            hash_input: Some(input),
            detail: Some("recomputed hash matches the stored hash".to_string()),
        });
        Verdict::Match
    } else {
        warn!(index = stored.index, stored = %stored.hash, recomputed = %recomputed, "block hash mismatch");
        attempts.push(MiningAttempt {
            nonce: stored.nonce,
            hash: recomputed.clone(),
            description: "Hash verification failed: recomputed hash does not match".to_string(),
            hash_input: Some(input),
            detail: Some(format!("expected: {}", stored.hash)),
        });
        Verdict::Mismatch {
            stored: stored.hash.clone(),
            recomputed,
        }
    };

    Ok(Verification { attempts, verdict })
}
