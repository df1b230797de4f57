//! Hash functions shared by the codec, the merkle verifier and key handling

use crate::types::Hash;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA256(SHA256(data)), in internal byte order
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha256_hash = Sha256::digest(data);
    let ripemd160_hash = Ripemd160::digest(sha256_hash);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd160_hash);
    out
}

/// First four bytes of the double SHA256, as used by frame headers and
/// Base58Check.
pub fn checksum(data: &[u8]) -> [u8; 4] {
    let digest = double_sha256(data);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Hashes are displayed big-endian, the reverse of their wire order.
pub fn to_display_hex(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Parse a display-order hex string back into wire order.
pub fn from_display_hex(s: &str) -> Option<Hash> {
    let mut hash: Hash = hex::FromHex::from_hex(s).ok()?;
    hash.reverse();
    Some(hash)
}
