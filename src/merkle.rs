//! Merkle roots and BIP37 partial merkle tree verification
//!
//! A `merkleblock` carries the total transaction count, a depth-first list
//! of hashes and one flag bit per visited node. Walking the tree with those
//! bits rebuilds the root and yields the matched leaves.

use crate::error::{Result, WalletError};
use crate::hash::double_sha256;
use crate::types::Hash;

/// No block can hold more transactions than this
const MAX_TRANSACTIONS: u64 = 4_000_000 / 60;

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    double_sha256(&combined)
}

/// Number of nodes at `height` above the leaves
fn tree_width(total: u64, height: u32) -> u64 {
    (total + (1u64 << height) - 1) >> height
}

fn tree_height(total: u64) -> u32 {
    let mut height = 0;
    while tree_width(total, height) > 1 {
        height += 1;
    }
    height
}

/// Merkle root of a full list of txids; an odd last node pairs with itself
pub fn compute_merkle_root(txids: &[Hash]) -> Option<Hash> {
    if txids.is_empty() {
        return None;
    }
    let mut level = txids.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|chunk| hash_pair(&chunk[0], chunk.get(1).unwrap_or(&chunk[0])))
            .collect();
    }
    Some(level[0])
}

/// Result of walking a partial merkle tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMerkleProof {
    pub root: Hash,
    pub matched: Vec<Hash>,
}

struct Traversal<'a> {
    total: u64,
    hashes: &'a [Hash],
    flags: &'a [u8],
    hashes_used: usize,
    bits_used: usize,
    matched: Vec<Hash>,
}

impl Traversal<'_> {
    fn next_bit(&mut self) -> Result<bool> {
        if self.bits_used >= self.flags.len() * 8 {
            return Err(WalletError::MalformedMessage(
                "partial merkle tree ran out of flag bits".to_string(),
            ));
        }
        let bit = (self.flags[self.bits_used / 8] >> (self.bits_used % 8)) & 1 == 1;
        self.bits_used += 1;
        Ok(bit)
    }

    fn next_hash(&mut self) -> Result<Hash> {
        let hash = self.hashes.get(self.hashes_used).copied().ok_or_else(|| {
            WalletError::MalformedMessage("partial merkle tree ran out of hashes".to_string())
        })?;
        self.hashes_used += 1;
        Ok(hash)
    }

    fn walk(&mut self, height: u32, pos: u64) -> Result<Hash> {
        let parent_of_match = self.next_bit()?;
        if height == 0 || !parent_of_match {
            let hash = self.next_hash()?;
            if height == 0 && parent_of_match {
                self.matched.push(hash);
            }
            return Ok(hash);
        }

        let left = self.walk(height - 1, pos * 2)?;
        let right = if pos * 2 + 1 < tree_width(self.total, height - 1) {
            let right = self.walk(height - 1, pos * 2 + 1)?;
            // identical siblings would let two different trees share a root
            if right == left {
                return Err(WalletError::MalformedMessage(
                    "partial merkle tree has identical sibling hashes".to_string(),
                ));
            }
            right
        } else {
            left
        };
        Ok(hash_pair(&left, &right))
    }
}

/// Rebuild the root from a partial merkle tree and collect matched txids.
/// Structural problems are `MalformedMessage`; the caller compares the root.
pub fn extract_matches(total: u32, hashes: &[Hash], flags: &[u8]) -> Result<PartialMerkleProof> {
    let total = total as u64;
    if total == 0 {
        return Err(WalletError::MalformedMessage("merkle tree with no transactions".to_string()));
    }
    if total > MAX_TRANSACTIONS {
        return Err(WalletError::MalformedMessage(format!("{} transactions in one block", total)));
    }
    if hashes.len() as u64 > total {
        return Err(WalletError::MalformedMessage(format!(
            "{} hashes for {} transactions",
            hashes.len(),
            total
        )));
    }
    if flags.len() * 8 < hashes.len() {
        return Err(WalletError::MalformedMessage("fewer flag bits than hashes".to_string()));
    }

    let mut traversal = Traversal {
        total,
        hashes,
        flags,
        hashes_used: 0,
        bits_used: 0,
        matched: Vec::new(),
    };
    let root = traversal.walk(tree_height(total), 0)?;

    if traversal.hashes_used != hashes.len() {
        return Err(WalletError::MalformedMessage(format!(
            "{} of {} hashes unused",
            hashes.len() - traversal.hashes_used,
            hashes.len()
        )));
    }
    if (traversal.bits_used + 7) / 8 != flags.len() {
        return Err(WalletError::MalformedMessage("unused flag bytes".to_string()));
    }

    Ok(PartialMerkleProof {
        root,
        matched: traversal.matched,
    })
}

/// Build the (hashes, flag bytes) pair a peer would send for `txids` with
/// the leaves in `matches` marked.
pub fn build_partial_tree(txids: &[Hash], matches: &[bool]) -> (Vec<Hash>, Vec<u8>) {
    fn subtree_hash(txids: &[Hash], height: u32, pos: u64) -> Hash {
        if height == 0 {
            return txids[pos as usize];
        }
        let total = txids.len() as u64;
        let left = subtree_hash(txids, height - 1, pos * 2);
        let right = if pos * 2 + 1 < tree_width(total, height - 1) {
            subtree_hash(txids, height - 1, pos * 2 + 1)
        } else {
            left
        };
        hash_pair(&left, &right)
    }

    fn build(
        txids: &[Hash],
        matches: &[bool],
        height: u32,
        pos: u64,
        bits: &mut Vec<bool>,
        hashes: &mut Vec<Hash>,
    ) {
        let total = txids.len() as u64;
        let start = (pos << height) as usize;
        let end = (((pos + 1) << height).min(total)) as usize;
        let parent_of_match = matches[start..end].iter().any(|&m| m);
        bits.push(parent_of_match);
        if height == 0 || !parent_of_match {
            hashes.push(subtree_hash(txids, height, pos));
        } else {
            build(txids, matches, height - 1, pos * 2, bits, hashes);
            if pos * 2 + 1 < tree_width(total, height - 1) {
                build(txids, matches, height - 1, pos * 2 + 1, bits, hashes);
            }
        }
    }

    let mut bits = Vec::new();
    let mut hashes = Vec::new();
    if !txids.is_empty() {
        build(txids, matches, tree_height(txids.len() as u64), 0, &mut bits, &mut hashes);
    }

    let mut flags = vec![0u8; (bits.len() + 7) / 8];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            flags[i / 8] |= 1 << (i % 8);
        }
    }
    (hashes, flags)
}
