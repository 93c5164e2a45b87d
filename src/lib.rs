//! Ledger PoW Core Library
//!
//! A deterministic proof-of-work simulator for a procurement ledger:
//! transaction payloads are canonicalized, hashed with SHA-256 under an
//! incrementing nonce until the digest meets the difficulty target, and
//! mined blocks can later be re-verified against their stored hash.

pub mod consensus;
pub mod crypto;
pub mod logging;
pub mod mining;
pub mod node;
pub mod storage;

pub use consensus::{Block, BlockSkeleton, MiningPolicy};
pub use mining::{mine_block, verify_block, MiningAttempt, MiningOutcome, Verification};

/// Ledger constants
pub mod constants {
    /// Default number of leading `'0'` hex digits a block hash needs
    pub const DEFAULT_LEADING_ZEROS: usize = 3;

    /// Default highest nonce tried before a search is abandoned
    pub const DEFAULT_MAX_NONCE: u64 = 1_000_000;

    /// `previousHash` of the genesis block
    pub const GENESIS_PREVIOUS_HASH: &str = "0";

    /// Genesis timestamp
    pub const GENESIS_TIMESTAMP: &str = "2024-01-01T00:00:00.000Z";

    /// Transaction id carried by the genesis payload
    pub const GENESIS_TRANSACTION_ID: &str = "GENESIS";
}
