//! Core Bitcoin types shared by the codec, the chain state and the wallet

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash, internal (wire) byte order
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Public key hash: RIPEMD160(SHA256(pubkey))
pub type PubkeyHash = [u8; 20];

/// OutPoint: a (txid, output index) reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    #[serde(with = "serde_hash")]
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    /// 36-byte wire form, also the element inserted into bloom filters
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(&self.hash);
        out[32..].copy_from_slice(&self.index.to_le_bytes());
        out
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    #[serde(with = "hex::serde")]
    pub script_sig: ByteString,
    pub sequence: u32,
}

/// Transaction output, value in satoshis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: i64,
    #[serde(with = "hex::serde")]
    pub script_pubkey: ByteString,
}

/// Transaction (witness data, if any was on the wire, is not retained)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

/// Block header: the 80 bytes every block and merkleblock starts with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    #[serde(with = "serde_hash")]
    pub prev_block_hash: Hash,
    #[serde(with = "serde_hash")]
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// Full block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// Unspent output owned by one of the wallet's keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    #[serde(with = "hex::serde")]
    pub script_pubkey: ByteString,
}

/// Serde adapter writing hashes as display-order hex strings.
pub mod serde_hash {
    use super::Hash;
    use crate::hash::{from_display_hex, to_display_hex};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_display_hex(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        from_display_hex(&s).ok_or_else(|| D::Error::custom(format!("invalid hash {s}")))
    }

    /// Same, for lists of hashes
    pub mod vec {
        use super::Hash;
        use crate::hash::{from_display_hex, to_display_hex};
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(hashes: &[Hash], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(hashes.iter().map(to_display_hex))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Hash>, D::Error> {
            let strings = Vec::<String>::deserialize(deserializer)?;
            strings
                .iter()
                .map(|s| from_display_hex(s).ok_or_else(|| D::Error::custom(format!("invalid hash {s}"))))
                .collect()
        }
    }
}
