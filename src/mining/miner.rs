//! Block miner implementation
//!
//! Searches nonces from zero upward until the block digest meets the
//! mining policy, recording every attempt along the way.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::consensus::{
    canonicalize, hash_input, Block, BlockSkeleton, MiningPolicy, PayloadError,
};
use crate::crypto::{digest, latin1_bytes, DigestError};
use crate::mining::verifier::{verify_block_with, Verification, VerifyError};

/// Mining errors
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("no nonce in 0..={max_nonce} met the difficulty target")]
    Exhausted { max_nonce: u64 },
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Digest(#[from] DigestError),
    #[error("mining worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// One nonce tried during a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningAttempt {
    pub nonce: u64,
    pub hash: String,
    pub description: String,
    /// Exact string that was hashed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_input: Option<String>,
    /// Diagnostic note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Search state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiningState {
    Ready,
    Searching,
    /// A nonce met the target
    Found,
    /// The safety cap was reached without success
    Abandoned,
}

impl MiningState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MiningState::Found | MiningState::Abandoned)
    }
}

/// Result of a finished search
#[derive(Debug, Clone)]
pub enum MiningOutcome {
    /// Successfully mined a block
    Found {
        attempts: Vec<MiningAttempt>,
        block: Block,
    },
    /// Gave up after trying every nonce up to `max_nonce`
    Abandoned {
        attempts: Vec<MiningAttempt>,
        max_nonce: u64,
    },
}

impl MiningOutcome {
    pub fn state(&self) -> MiningState {
        match self {
            MiningOutcome::Found { .. } => MiningState::Found,
            MiningOutcome::Abandoned { .. } => MiningState::Abandoned,
        }
    }

    /// The mining trace
    pub fn attempts(&self) -> &[MiningAttempt] {
        match self {
            MiningOutcome::Found { attempts, .. } | MiningOutcome::Abandoned { attempts, .. } => {
                attempts
            }
        }
    }

    /// The mined block, if any
    pub fn block(&self) -> Option<&Block> {
        match self {
            MiningOutcome::Found { block, .. } => Some(block),
            MiningOutcome::Abandoned { .. } => None,
        }
    }

    /// Split into the trace and the mined block
    pub fn into_parts(self) -> (Vec<MiningAttempt>, Option<Block>) {
        match self {
            MiningOutcome::Found { attempts, block } => (attempts, Some(block)),
            MiningOutcome::Abandoned { attempts, .. } => (attempts, None),
        }
    }

    /// The mined block, or `MiningError::Exhausted`
    pub fn into_block(self) -> Result<Block, MiningError> {
        match self {
            MiningOutcome::Found { block, .. } => Ok(block),
            MiningOutcome::Abandoned { max_nonce, .. } => Err(MiningError::Exhausted { max_nonce }),
        }
    }
}

/// A single nonce search over one block.
///
/// Advances one nonce per `step`. The payload is canonicalized once up
/// front since only the nonce changes between attempts.
#[derive(Debug)]
pub struct MiningSearch<'p> {
    policy: &'p MiningPolicy,
    skeleton: BlockSkeleton,
    canonical: String,
    state: MiningState,
    next_nonce: u64,
    attempts: Vec<MiningAttempt>,
    found: Option<(u64, String)>,
}

impl<'p> MiningSearch<'p> {
    /// Prepare a search. Fails early if the payload cannot be hashed at all.
    pub fn new(policy: &'p MiningPolicy, skeleton: BlockSkeleton) -> Result<Self, MiningError> {
        let canonical = canonicalize(&skeleton.data, policy.identifiers)?;
        latin1_bytes(&canonical)?;
        latin1_bytes(&skeleton.previous_hash)?;

        Ok(Self {
            policy,
            skeleton,
            canonical,
            state: MiningState::Ready,
            next_nonce: 0,
            attempts: Vec::new(),
            found: None,
        })
    }

    pub fn state(&self) -> MiningState {
        self.state
    }

    pub fn attempts(&self) -> &[MiningAttempt] {
        &self.attempts
    }

    /// Try the next nonce
    pub fn step(&mut self) -> Result<MiningState, MiningError> {
        match self.state {
            MiningState::Found | MiningState::Abandoned => return Ok(self.state),
            MiningState::Ready => self.state = MiningState::Searching,
            MiningState::Searching => {}
        }

        let nonce = self.next_nonce;
        let input = hash_input(
            self.skeleton.index,
            nonce,
            &self.canonical,
            &self.skeleton.previous_hash,
        );
        let hash = digest(&input)?;
        let hex = hash.to_hex();

        self.attempts.push(MiningAttempt {
            nonce,
            hash: hex.clone(),
            description: format!("Mining attempt with nonce {nonce}"),
            hash_input: self.policy.keep_hash_inputs.then_some(input),
            detail: None,
        });

        if self.policy.accepts(&hash) {
            self.state = MiningState::Found;
            self.found = Some((nonce, hex));
        } else if nonce >= self.policy.max_nonce {
            self.state = MiningState::Abandoned;
        } else {
            self.next_nonce += 1;
        }

        Ok(self.state)
    }

    /// Close the search. A search stopped short of a terminal state counts as abandoned.
    pub fn finish(self) -> MiningOutcome {
        match self.found {
            Some((nonce, hash)) => MiningOutcome::Found {
                attempts: self.attempts,
                block: self.skeleton.seal(nonce, hash),
            },
            None => MiningOutcome::Abandoned {
                attempts: self.attempts,
                max_nonce: self.policy.max_nonce,
            },
        }
    }
}

/// Block miner
#[derive(Debug, Clone, Default)]
pub struct Miner {
    policy: MiningPolicy,
}

impl Miner {
    /// Create a new miner
    pub fn new(policy: MiningPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MiningPolicy {
        &self.policy
    }

    /// Mine a block (find valid nonce).
    ///
    /// `previous_hash` is the hash that gets committed to; it replaces
    /// whatever the skeleton carried. `chain` is only consulted to flag a
    /// skeleton that does not follow its tip.
    pub fn mine(
        &self,
        skeleton: BlockSkeleton,
        previous_hash: &str,
        chain: &[Block],
    ) -> Result<MiningOutcome, MiningError> {
        self.mine_with_progress(skeleton, previous_hash, chain, 0, |_| {})
    }

    /// Mine with progress callback, invoked every `progress_interval` attempts
    /// (never when the interval is zero)
    pub fn mine_with_progress<F>(
        &self,
        mut skeleton: BlockSkeleton,
        previous_hash: &str,
        chain: &[Block],
        progress_interval: u64,
        mut callback: F,
    ) -> Result<MiningOutcome, MiningError>
    where
        F: FnMut(u64), // attempt count
    {
        skeleton.previous_hash = previous_hash.to_string();
        check_chain_context(&skeleton, chain);

        let index = skeleton.index;
        let mut search = MiningSearch::new(&self.policy, skeleton)?;
        let mut iterations = 0u64;

        loop {
            let state = search.step()?;
            iterations += 1;

            if progress_interval > 0 && iterations % progress_interval == 0 {
                debug!(index, attempts = iterations, "mining in progress");
                callback(iterations);
            }

            if state.is_terminal() {
                break;
            }
        }

        let outcome = search.finish();
        match &outcome {
            MiningOutcome::Found { block, .. } => {
                info!(index, nonce = block.nonce, hash = %block.hash, attempts = iterations, "block mined");
            }
            MiningOutcome::Abandoned { max_nonce, .. } => {
                warn!(index, max_nonce, "mining abandoned at safety cap");
            }
        }
        Ok(outcome)
    }

    /// Run `mine` on a blocking worker thread
    pub async fn mine_in_background(
        &self,
        skeleton: BlockSkeleton,
        previous_hash: String,
        chain: Vec<Block>,
    ) -> Result<MiningOutcome, MiningError> {
        let miner = self.clone();
        tokio::task::spawn_blocking(move || miner.mine(skeleton, &previous_hash, &chain)).await?
    }

    /// Verify a block under this miner's policy
    pub fn verify(&self, block: &Block, all_blocks: &[Block]) -> Result<Verification, VerifyError> {
        verify_block_with(&self.policy, block, all_blocks)
    }
}

/// Mine a block with the default policy
pub fn mine_block(
    skeleton: BlockSkeleton,
    previous_hash: &str,
    existing_chain: &[Block],
) -> Result<MiningOutcome, MiningError> {
    Miner::default().mine(skeleton, previous_hash, existing_chain)
}

fn check_chain_context(skeleton: &BlockSkeleton, chain: &[Block]) {
    match chain.last() {
        Some(tip) => {
            if tip.index.checked_add(1) != Some(skeleton.index) {
                warn!(index = skeleton.index, tip = tip.index, "block index does not follow chain tip");
            }
            if skeleton.previous_hash != tip.hash {
                warn!(index = skeleton.index, "previous hash does not match chain tip");
            }
        }
        None => {
            if skeleton.previous_hash != GENESIS_PREVIOUS_HASH {
                debug!(index = skeleton.index, "mining against an empty chain without the genesis sentinel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn skeleton() -> BlockSkeleton {
        BlockSkeleton::new(
            1,
            "2024-05-01T10:00:00.000Z",
            json!({
                "transactionId": "tx-1",
                "buyer": "b-1",
                "vendor": "v-1",
                "items": [{"name": "Bolt", "sku": "SKU-1", "quantity": 2, "price": 1.5}],
                "total": 3
            }),
            "ignored",
        )
    }

    #[test]
    fn test_mine_block_finds_target() {
        let outcome = mine_block(skeleton(), "0", &[]).unwrap();
        assert_eq!(outcome.state(), MiningState::Found);

        let block = outcome.block().unwrap();
        assert!(block.hash.starts_with("000"));
        assert_eq!(block.previous_hash, "0");

        let attempts = outcome.attempts();
        let last = attempts.last().unwrap();
        assert_eq!(last.nonce, block.nonce);
        assert_eq!(last.hash, block.hash);
        for attempt in &attempts[..attempts.len() - 1] {
            assert!(!attempt.hash.starts_with("000"));
        }
    }

    #[test]
    fn test_attempts_record_hash_input() {
        let outcome = mine_block(skeleton(), "0", &[]).unwrap();
        let first = &outcome.attempts()[0];
        assert_eq!(first.nonce, 0);
        let input = first.hash_input.as_deref().unwrap();
        assert!(input.starts_with("10{\"transactionId\""));
        assert!(input.ends_with('0'));
        assert_eq!(digest(input).unwrap().to_hex(), first.hash);
    }

    #[test]
    fn test_hash_inputs_can_be_dropped() {
        let miner = Miner::new(MiningPolicy::default().with_hash_inputs(false));
        let outcome = miner.mine(skeleton(), "0", &[]).unwrap();
        assert!(outcome.attempts().iter().all(|a| a.hash_input.is_none()));
    }

    #[test]
    fn test_search_state_machine() {
        let policy = MiningPolicy::default().with_leading_zeros(64).with_max_nonce(2);
        let mut search = MiningSearch::new(&policy, skeleton()).unwrap();
        assert_eq!(search.state(), MiningState::Ready);
        assert_eq!(search.step().unwrap(), MiningState::Searching);
        assert_eq!(search.step().unwrap(), MiningState::Searching);
        assert_eq!(search.step().unwrap(), MiningState::Abandoned);
        // Terminal states do not advance
        assert_eq!(search.step().unwrap(), MiningState::Abandoned);
        assert_eq!(search.attempts().len(), 3);

        let outcome = search.finish();
        assert!(matches!(outcome.into_block(), Err(MiningError::Exhausted { max_nonce: 2 })));
    }

    #[test]
    fn test_zero_difficulty_accepts_first_nonce() {
        let miner = Miner::new(MiningPolicy::default().with_leading_zeros(0));
        let outcome = miner.mine(skeleton(), "0", &[]).unwrap();
        assert_eq!(outcome.attempts().len(), 1);
        assert_eq!(outcome.block().unwrap().nonce, 0);
    }

    #[test]
    fn test_wide_characters_fail_before_searching() {
        let mut wide = skeleton();
        wide.data = json!({"buyerName": "\u{738b}"});
        let err = mine_block(wide, "0", &[]).unwrap_err();
        assert!(matches!(err, MiningError::Digest(DigestError::UnsupportedInput { .. })));
    }

    #[test]
    fn test_tip_at_highest_index_does_not_overflow() {
        let mut tip = skeleton().seal(0, "000abc".to_string());
        tip.index = u64::MAX;
        let outcome = mine_block(skeleton(), "000abc", &[tip]).unwrap();
        assert_eq!(outcome.state(), MiningState::Found);
    }

    #[test]
    fn test_progress_callback() {
        let miner = Miner::new(MiningPolicy::default().with_leading_zeros(64).with_max_nonce(9));
        let mut reports = Vec::new();
        let outcome = miner
            .mine_with_progress(skeleton(), "0", &[], 5, |n| reports.push(n))
            .unwrap();
        assert_eq!(outcome.attempts().len(), 10);
        assert_eq!(reports, vec![5, 10]);
    }

    #[tokio::test]
    async fn test_background_mining_matches_foreground() {
        let miner = Miner::default();
        let foreground = miner.mine(skeleton(), "0", &[]).unwrap();
        let background = miner
            .mine_in_background(skeleton(), "0".to_string(), Vec::new())
            .await
            .unwrap();
        assert_eq!(foreground.block(), background.block());
        assert_eq!(foreground.attempts(), background.attempts());
    }
}
