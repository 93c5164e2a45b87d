//! Genesis block for the ledger
//!
//! The genesis skeleton is reproducible byte-for-byte; it is mined like any
//! other block so the hash invariant holds from index 0.

use serde_json::{json, Value};

use crate::consensus::BlockSkeleton;
use crate::constants::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP, GENESIS_TRANSACTION_ID};

/// Payload carried by the genesis block
pub fn genesis_payload() -> Value {
    json!({
        "transactionId": GENESIS_TRANSACTION_ID,
        "items": [],
        "total": 0,
        "timestamp": GENESIS_TIMESTAMP,
    })
}

/// Create the genesis skeleton
pub fn genesis_skeleton() -> BlockSkeleton {
    BlockSkeleton::new(0, GENESIS_TIMESTAMP, genesis_payload(), GENESIS_PREVIOUS_HASH)
}
