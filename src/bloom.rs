//! BIP37 bloom filter used to ask the peer for relevant transactions only
//!
//! False positives are wanted: the peer cannot tell which matches are real.
//! There is no deletion; a different interest set means a new filter.

use crate::constants::*;
use crate::encode::encode_varint;
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;
use std::io::Cursor;

/// MurmurHash3 (x86, 32-bit) of `data` under `seed`
pub fn murmur_hash3(seed: u32, data: &[u8]) -> u32 {
    let mut cursor = Cursor::new(data);
    // reading from an in-memory cursor cannot fail
    murmur3::murmur3_32(&mut cursor, seed).unwrap_or(0)
}

/// Bloom filter as loaded into a peer with `filterload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    #[serde(with = "hex::serde")]
    bits: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    flags: u8,
}

impl BloomFilter {
    /// Size the filter for `element_count` elements at `false_positive_rate`.
    ///
    /// size = -1 / ln(2)^2 * n * ln(p) bits, at most 36,000 bytes;
    /// k = size / n * ln(2), between 1 and 50.
    pub fn new(element_count: usize, false_positive_rate: f64, tweak: u32, flags: u8) -> Self {
        let n = element_count.max(1) as f64;
        let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 1.0);

        let size_bits = -1.0 / (LN_2 * LN_2) * n * p.ln();
        let size_bytes = ((size_bits / 8.0).ceil() as usize).clamp(1, MAX_BLOOM_FILTER_SIZE);

        let hash_funcs = ((size_bytes * 8) as f64 / n * LN_2) as u32;
        let hash_funcs = hash_funcs.clamp(1, MAX_HASH_FUNCS);

        Self {
            bits: vec![0; size_bytes],
            hash_funcs,
            tweak,
            flags,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.bits.len()
    }

    pub fn hash_funcs(&self) -> u32 {
        self.hash_funcs
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Hash round `round`: seed = round * 0xFBA4C795 + tweak
    pub fn hash(&self, round: u32, data: &[u8]) -> u32 {
        let seed = round.wrapping_mul(BLOOM_SEED_MULTIPLIER).wrapping_add(self.tweak);
        murmur_hash3(seed, data)
    }

    fn bit_index(&self, round: u32, data: &[u8]) -> usize {
        (self.hash(round, data) as usize) % (self.bits.len() * 8)
    }

    pub fn insert(&mut self, data: &[u8]) {
        for round in 0..self.hash_funcs {
            let index = self.bit_index(round, data);
            self.bits[index >> 3] |= 1 << (index & 7);
        }
    }

    /// Possibly-contains: never false for inserted data
    pub fn contains(&self, data: &[u8]) -> bool {
        (0..self.hash_funcs).all(|round| {
            let index = self.bit_index(round, data);
            self.bits[index >> 3] & (1 << (index & 7)) != 0
        })
    }

    /// The `filterload` payload
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = encode_varint(self.bits.len() as u64);
        out.extend_from_slice(&self.bits);
        out.extend_from_slice(&self.hash_funcs.to_le_bytes());
        out.extend_from_slice(&self.tweak.to_le_bytes());
        out.push(self.flags);
        out
    }

    /// Rebuild a filter read off the wire, enforcing the BIP37 limits
    pub(crate) fn from_parts(bits: Vec<u8>, hash_funcs: u32, tweak: u32, flags: u8) -> Result<Self> {
        if bits.is_empty() || bits.len() > MAX_BLOOM_FILTER_SIZE {
            return Err(WalletError::MalformedMessage(format!(
                "bloom filter of {} bytes, expected 1..={}",
                bits.len(),
                MAX_BLOOM_FILTER_SIZE
            )));
        }
        if hash_funcs > MAX_HASH_FUNCS {
            return Err(WalletError::MalformedMessage(format!(
                "bloom filter with {} hash functions, at most {}",
                hash_funcs, MAX_HASH_FUNCS
            )));
        }
        Ok(Self {
            bits,
            hash_funcs,
            tweak,
            flags,
        })
    }
}
