//! Cryptography module - SHA-256 digest engine

mod hasher;

pub use hasher::*;
