//! SHA-256 digest engine
//!
//! Self-contained implementation of the 256-bit SHA-2 compression function.
//! Every block hash in the ledger goes through here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Size of one message block in bytes
const BLOCK_LEN: usize = 64;

/// Offset of the 64-bit length field inside the final padded block
const LENGTH_OFFSET: usize = 56;

/// Digest engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("unsupported character {character:?} at position {position}: only code points up to U+00FF can be hashed")]
    UnsupportedInput { character: char, position: usize },
}

/// 32-byte digest output
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Create a zero hash
    pub const fn zero() -> Self {
        Hash([0u8; 32])
    }

    /// Create hash from hex string
    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }

    /// Convert to 64-character lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Number of leading `'0'` characters in the hex rendering
    pub fn leading_zero_digits(&self) -> usize {
        let mut zeros = 0;
        for byte in self.0 {
            if byte == 0 {
                zeros += 2;
                continue;
            }
            if byte >> 4 == 0 {
                zeros += 1;
            }
            break;
        }
        zeros
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

/// Initial hash state and round constants, derived from the first primes.
struct RoundConstants {
    /// Fractional parts of the square roots of the first 8 primes
    initial: [u32; 8],
    /// Fractional parts of the cube roots of the first 64 primes
    rounds: [u32; 64],
}

static CONSTANTS: OnceLock<RoundConstants> = OnceLock::new();

impl RoundConstants {
    fn derive() -> Self {
        let primes = first_primes::<64>();

        let mut initial = [0u32; 8];
        for (slot, prime) in initial.iter_mut().zip(primes.iter()) {
            *slot = fractional_bits(f64::from(*prime).sqrt());
        }

        let mut rounds = [0u32; 64];
        for (slot, prime) in rounds.iter_mut().zip(primes.iter()) {
            *slot = fractional_bits(f64::from(*prime).cbrt());
        }

        Self { initial, rounds }
    }
}

fn constants() -> &'static RoundConstants {
    CONSTANTS.get_or_init(RoundConstants::derive)
}

fn first_primes<const N: usize>() -> [u32; N] {
    let mut primes = [0u32; N];
    let mut found = 0;
    let mut candidate = 2u32;
    while found < N {
        if primes[..found].iter().all(|p| candidate % p != 0) {
            primes[found] = candidate;
            found += 1;
        }
        candidate += 1;
    }
    primes
}

/// First 32 bits of the fractional part of `x`
fn fractional_bits(x: f64) -> u32 {
    (x.fract() * 4_294_967_296.0) as u32
}

/// Run the 64 compression rounds for one 64-byte block, updating `state` in place.
fn compress(state: &mut [u32; 8], block: &[u8], k: &[u32; 64]) {
    let mut w = [0u32; 64];
    for (i, word) in block.chunks_exact(4).enumerate().take(16) {
        w[i] = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    }
    for i in 16..64 {
        let s0 = w[i - 15].rotate_right(7) ^ w[i - 15].rotate_right(18) ^ (w[i - 15] >> 3);
        let s1 = w[i - 2].rotate_right(17) ^ w[i - 2].rotate_right(19) ^ (w[i - 2] >> 10);
        w[i] = w[i - 16]
            .wrapping_add(s0)
            .wrapping_add(w[i - 7])
            .wrapping_add(s1);
    }

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;

    for i in 0..64 {
        let big_s1 = e.rotate_right(6) ^ e.rotate_right(11) ^ e.rotate_right(25);
        let ch = (e & f) ^ (!e & g);
        let temp1 = h
            .wrapping_add(big_s1)
            .wrapping_add(ch)
            .wrapping_add(k[i])
            .wrapping_add(w[i]);
        let big_s0 = a.rotate_right(2) ^ a.rotate_right(13) ^ a.rotate_right(22);
        let maj = (a & b) ^ (a & c) ^ (b & c);
        let temp2 = big_s0.wrapping_add(maj);

        h = g;
        g = f;
        f = e;
        e = d.wrapping_add(temp1);
        d = c;
        c = b;
        b = a;
        a = temp1.wrapping_add(temp2);
    }

    for (slot, value) in state.iter_mut().zip([a, b, c, d, e, f, g, h]) {
        *slot = slot.wrapping_add(value);
    }
}

/// SHA-256 of raw bytes
pub fn sha256(data: &[u8]) -> Hash {
    let table = constants();
    let mut state = table.initial;

    let mut blocks = data.chunks_exact(BLOCK_LEN);
    for block in &mut blocks {
        compress(&mut state, block, &table.rounds);
    }

    // Padding: 0x80, zeros up to 56 mod 64, then the bit length (big-endian)
    let remainder = blocks.remainder();
    let mut tail = [0u8; 2 * BLOCK_LEN];
    tail[..remainder.len()].copy_from_slice(remainder);
    tail[remainder.len()] = 0x80;
    let tail_len = if remainder.len() < LENGTH_OFFSET {
        BLOCK_LEN
    } else {
        2 * BLOCK_LEN
    };
    let bit_len = (data.len() as u64).wrapping_mul(8);
    tail[tail_len - 8..tail_len].copy_from_slice(&bit_len.to_be_bytes());

    for block in tail[..tail_len].chunks_exact(BLOCK_LEN) {
        compress(&mut state, block, &table.rounds);
    }

    let mut out = [0u8; 32];
    for (chunk, word) in out.chunks_exact_mut(4).zip(state) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    Hash(out)
}

/// Map a string onto single bytes, one per character.
///
/// Characters above U+00FF have no single-byte form and are rejected.
pub fn latin1_bytes(input: &str) -> Result<Vec<u8>, DigestError> {
    input
        .chars()
        .enumerate()
        .map(|(position, character)| {
            u8::try_from(character)
                .map_err(|_| DigestError::UnsupportedInput { character, position })
        })
        .collect()
}

/// Digest a string whose characters are all in the single-byte range
pub fn digest(input: &str) -> Result<Hash, DigestError> {
    let bytes = latin1_bytes(input)?;
    Ok(sha256(&bytes))
}

/// Digest a string and render it as 64 lowercase hex characters
pub fn digest_hex(input: &str) -> Result<String, DigestError> {
    digest(input).map(|hash| hash.to_hex())
}
