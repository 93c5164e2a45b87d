//! Consensus module - Block structure, payload canonicalization, and mining policy

mod block;
mod difficulty;
mod number;
mod payload;

pub use block::*;
pub use difficulty::*;
pub use number::{js_number, JsFormatter};
pub use payload::*;
