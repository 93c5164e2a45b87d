//! Chain state management
//!
//! Keeps the ledger as an in-memory, append-only list of mined blocks and
//! validates it as a whole: every block must verify and link to its
//! predecessor.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::consensus::{Block, BlockSkeleton, MiningPolicy};
use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::mining::{Miner, MiningAttempt, MiningError, Verdict};
use crate::node::genesis_skeleton;

/// A problem found while validating a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "fault", rename_all = "camelCase")]
pub enum ChainFault {
    #[error("block at position {position} carries index {index}")]
    IndexOutOfSequence { position: usize, index: u64 },
    #[error("block {index} links to {found}, expected {expected}")]
    BrokenLink {
        index: u64,
        expected: String,
        found: String,
    },
    #[error("block {index} hash mismatch: stored {stored}, recomputed {recomputed}")]
    HashMismatch {
        index: u64,
        stored: String,
        recomputed: String,
    },
    #[error("block {index} hash {hash} does not meet the difficulty target")]
    InsufficientWork { index: u64, hash: String },
    #[error("block {index} could not be verified: {reason}")]
    Unverifiable { index: u64, reason: String },
}

/// Chain validation result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    /// Number of blocks checked
    pub height: usize,
    /// Hash of the last block
    pub tip_hash: String,
    pub faults: Vec<ChainFault>,
}

impl ChainReport {
    /// Whether the chain is valid
    pub fn is_valid(&self) -> bool {
        self.faults.is_empty()
    }
}

/// In-memory chain of mined blocks
#[derive(Debug, Clone, Default)]
pub struct Chain {
    blocks: Vec<Block>,
    miner: Miner,
}

impl Chain {
    /// Create an empty chain
    pub fn new(policy: MiningPolicy) -> Self {
        Self {
            blocks: Vec::new(),
            miner: Miner::new(policy),
        }
    }

    /// Create a chain holding only the mined genesis block
    pub fn with_genesis(policy: MiningPolicy) -> Result<Self, MiningError> {
        let mut chain = Self::new(policy);
        chain.append(genesis_skeleton())?;
        Ok(chain)
    }

    /// Wrap blocks mined elsewhere, e.g. loaded by a ledger service
    pub fn from_blocks(policy: MiningPolicy, blocks: Vec<Block>) -> Self {
        Self {
            blocks,
            miner: Miner::new(policy),
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    /// Number of blocks
    pub fn height(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Hash of the current tip, or the genesis sentinel for an empty chain
    pub fn tip_hash(&self) -> &str {
        self.blocks
            .last()
            .map_or(GENESIS_PREVIOUS_HASH, |block| block.hash.as_str())
    }

    /// Skeleton for the block that would extend the current tip
    pub fn next_skeleton(&self, timestamp: impl Into<String>, data: Value) -> BlockSkeleton {
        BlockSkeleton::new(self.blocks.len() as u64, timestamp, data, self.tip_hash())
    }

    /// Mine the next block and append it.
    ///
    /// Returns the mining trace. An abandoned search leaves the chain untouched.
    pub fn mine_next(
        &mut self,
        timestamp: impl Into<String>,
        data: Value,
    ) -> Result<Vec<MiningAttempt>, MiningError> {
        let skeleton = self.next_skeleton(timestamp, data);
        self.append(skeleton)
    }

    fn append(&mut self, skeleton: BlockSkeleton) -> Result<Vec<MiningAttempt>, MiningError> {
        let previous_hash = skeleton.previous_hash.clone();
        let outcome = self.miner.mine(skeleton, &previous_hash, &self.blocks)?;
        let max_nonce = self.miner.policy().max_nonce;

        match outcome.into_parts() {
            (attempts, Some(block)) => {
                info!(height = self.blocks.len() + 1, hash = %block.hash, "block appended");
                self.blocks.push(block);
                Ok(attempts)
            }
            (_, None) => Err(MiningError::Exhausted { max_nonce }),
        }
    }

    /// Validate the whole chain
    pub fn validate(&self) -> ChainReport {
        let mut faults = Vec::new();
        let target = self.miner.policy().target_prefix();
        let mut previous: Option<&Block> = None;

        for (position, block) in self.blocks.iter().enumerate() {
            if block.index != position as u64 {
                faults.push(ChainFault::IndexOutOfSequence {
                    position,
                    index: block.index,
                });
            }

            let expected = previous.map_or(GENESIS_PREVIOUS_HASH, |p| p.hash.as_str());
            if block.previous_hash != expected {
                faults.push(ChainFault::BrokenLink {
                    index: block.index,
                    expected: expected.to_string(),
                    found: block.previous_hash.clone(),
                });
            }

            match self.miner.verify(block, &self.blocks) {
                Ok(verification) => match verification.verdict {
                    Verdict::Match if !block.hash.starts_with(&target) => {
                        faults.push(ChainFault::InsufficientWork {
                            index: block.index,
                            hash: block.hash.clone(),
                        });
                    }
                    Verdict::Match => {}
                    Verdict::Mismatch { stored, recomputed } => {
                        faults.push(ChainFault::HashMismatch {
                            index: block.index,
                            stored,
                            recomputed,
                        });
                    }
                },
                Err(e) => faults.push(ChainFault::Unverifiable {
                    index: block.index,
                    reason: e.to_string(),
                }),
            }

            previous = Some(block);
        }

        if !faults.is_empty() {
            warn!(faults = faults.len(), "chain validation failed");
        }

        ChainReport {
            height: self.blocks.len(),
            tip_hash: self.tip_hash().to_string(),
            faults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order(id: &str) -> Value {
        json!({
            "transactionId": id,
            "buyer": "buyer-1",
            "vendor": "vendor-1",
            "items": [{"name": "Cable", "sku": format!("SKU-{id}"), "quantity": 1, "price": 10}],
            "total": 10
        })
    }

    #[test]
    fn test_empty_chain_tip_is_sentinel() {
        let chain = Chain::default();
        assert!(chain.is_empty());
        assert_eq!(chain.tip_hash(), "0");
        assert!(chain.validate().is_valid());
    }

    #[test]
    fn test_with_genesis() {
        let chain = Chain::with_genesis(MiningPolicy::default()).unwrap();
        assert_eq!(chain.height(), 1);
        let genesis = chain.tip().unwrap();
        assert!(genesis.is_genesis());
        assert!(genesis.hash.starts_with("000"));
    }

    #[test]
    fn test_mine_next_links_blocks() {
        let mut chain = Chain::with_genesis(MiningPolicy::default()).unwrap();
        let genesis_hash = chain.tip_hash().to_string();

        let attempts = chain.mine_next("2024-05-01T10:00:00.000Z", order("tx-1")).unwrap();
        assert!(!attempts.is_empty());
        assert_eq!(chain.height(), 2);

        let tip = chain.tip().unwrap();
        assert_eq!(tip.index, 1);
        assert_eq!(tip.previous_hash, genesis_hash);
        assert!(chain.validate().is_valid());
    }

    #[test]
    fn test_abandoned_search_leaves_chain_untouched() {
        let policy = MiningPolicy::default().with_leading_zeros(64).with_max_nonce(3);
        let mut chain = Chain::new(policy);
        let err = chain.mine_next("t", order("tx-1")).unwrap_err();
        assert!(matches!(err, MiningError::Exhausted { max_nonce: 3 }));
        assert!(chain.is_empty());
    }

    #[test]
    fn test_validate_detects_tampering_and_broken_links() {
        let mut chain = Chain::with_genesis(MiningPolicy::default()).unwrap();
        chain.mine_next("t1", order("tx-1")).unwrap();
        chain.mine_next("t2", order("tx-2")).unwrap();

        let mut blocks = chain.blocks().to_vec();
        blocks[1].data["total"] = json!(1_000_000);
        blocks[2].previous_hash = "f".repeat(64);

        let report = Chain::from_blocks(MiningPolicy::default(), blocks).validate();
        assert!(!report.is_valid());
        assert!(report
            .faults
            .iter()
            .any(|f| matches!(f, ChainFault::HashMismatch { index: 1, .. })));
        assert!(report
            .faults
            .iter()
            .any(|f| matches!(f, ChainFault::BrokenLink { index: 2, .. })));
    }

    #[test]
    fn test_validate_flags_insufficient_work() {
        let easy = MiningPolicy::default().with_leading_zeros(0);
        let mut chain = Chain::new(easy);
        chain.mine_next("t", order("tx-1")).unwrap();

        let strict = Chain::from_blocks(MiningPolicy::default().with_leading_zeros(8), chain.blocks().to_vec());
        let report = strict.validate();
        assert!(report
            .faults
            .iter()
            .any(|f| matches!(f, ChainFault::InsufficientWork { index: 0, .. })));
    }
}
