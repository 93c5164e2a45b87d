//! Mining module - nonce search and block verification

mod miner;
pub mod verifier;

pub use miner::*;
pub use verifier::{verify_block, verify_block_with, Verdict, Verification, VerifyError};
