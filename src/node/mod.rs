//! Node module - genesis block

mod genesis;

pub use genesis::*;
