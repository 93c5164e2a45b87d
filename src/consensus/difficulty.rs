//! Mining policy
//!
//! The difficulty predicate and the safety cap are tunable policy, not
//! protocol constants. Defaults live in `crate::constants`.

use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

use crate::constants::{DEFAULT_LEADING_ZEROS, DEFAULT_MAX_NONCE};
use crate::crypto::Hash;

/// Environment variable overriding `leading_zeros`
pub const ENV_LEADING_ZEROS: &str = "LEDGER_POW_LEADING_ZEROS";
/// Environment variable overriding `max_nonce`
pub const ENV_MAX_NONCE: &str = "LEDGER_POW_MAX_NONCE";
/// Environment variable overriding `keep_hash_inputs`
pub const ENV_KEEP_HASH_INPUTS: &str = "LEDGER_POW_KEEP_HASH_INPUTS";
/// Environment variable switching to `IdentifierPolicy::Require`
pub const ENV_REQUIRE_IDENTIFIERS: &str = "LEDGER_POW_REQUIRE_IDENTIFIERS";

/// Policy loading errors
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
    #[error("leading zero requirement {0} exceeds the 64 hex digits of a digest")]
    UnreachableDifficulty(usize),
}

/// What to do with line items that carry no identifier at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierPolicy {
    /// Derive a stable token from the item content and its position
    #[default]
    Derive,
    /// Refuse to canonicalize the payload
    Require,
}

/// Tunable mining parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MiningPolicy {
    /// Required number of leading `'0'` hex digits
    pub leading_zeros: usize,
    /// Highest nonce attempted before the search is abandoned
    pub max_nonce: u64,
    /// Keep the full hash input on every mining attempt
    pub keep_hash_inputs: bool,
    /// Handling of items without identifiers
    pub identifiers: IdentifierPolicy,
}

impl Default for MiningPolicy {
    fn default() -> Self {
        Self {
            leading_zeros: DEFAULT_LEADING_ZEROS,
            max_nonce: DEFAULT_MAX_NONCE,
            keep_hash_inputs: true,
            identifiers: IdentifierPolicy::Derive,
        }
    }
}

impl MiningPolicy {
    /// Set the difficulty
    pub fn with_leading_zeros(mut self, leading_zeros: usize) -> Self {
        self.leading_zeros = leading_zeros;
        self
    }

    /// Set the safety cap
    pub fn with_max_nonce(mut self, max_nonce: u64) -> Self {
        self.max_nonce = max_nonce;
        self
    }

    /// Toggle hash-input retention on attempts
    pub fn with_hash_inputs(mut self, keep: bool) -> Self {
        self.keep_hash_inputs = keep;
        self
    }

    /// Set the identifier policy
    pub fn with_identifiers(mut self, identifiers: IdentifierPolicy) -> Self {
        self.identifiers = identifiers;
        self
    }

    /// The difficulty predicate
    pub fn accepts(&self, hash: &Hash) -> bool {
        hash.leading_zero_digits() >= self.leading_zeros
    }

    /// The predicate as a hex prefix, e.g. `"000"`
    pub fn target_prefix(&self) -> String {
        "0".repeat(self.leading_zeros)
    }

    /// Whether any digest could ever satisfy this policy
    pub fn is_reachable(&self) -> bool {
        self.leading_zeros <= 64
    }

    /// Default policy with overrides taken from the `LEDGER_POW_*` environment
    pub fn from_env() -> Result<Self, PolicyError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Default policy with overrides from `lookup`, keyed by variable name.
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PolicyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut policy = Self::default();

        if let Some(value) = read(ENV_LEADING_ZEROS) {
            policy.leading_zeros = parse_value(ENV_LEADING_ZEROS, &value)?;
            if !policy.is_reachable() {
                return Err(PolicyError::UnreachableDifficulty(policy.leading_zeros));
            }
        }
        if let Some(value) = read(ENV_MAX_NONCE) {
            policy.max_nonce = parse_value(ENV_MAX_NONCE, &value)?;
        }
        if let Some(value) = read(ENV_KEEP_HASH_INPUTS) {
            policy.keep_hash_inputs = parse_flag(ENV_KEEP_HASH_INPUTS, &value)?;
        }
        if let Some(value) = read(ENV_REQUIRE_IDENTIFIERS) {
            if parse_flag(ENV_REQUIRE_IDENTIFIERS, &value)? {
                policy.identifiers = IdentifierPolicy::Require;
            }
        }

        Ok(policy)
    }
}

fn parse_value<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, PolicyError> {
    value.trim().parse().map_err(|_| PolicyError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, PolicyError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PolicyError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}
