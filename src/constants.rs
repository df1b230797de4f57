//! Protocol constants and per-network parameters

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol version advertised in our `version` message
pub const PROTOCOL_VERSION: i32 = 70002;

/// First protocol version carrying the BIP37 `relay` flag and filtered blocks
pub const BLOOM_FILTER_VERSION: i32 = 70001;

/// From this version on, peers serving filters must advertise [`NODE_BLOOM`] (BIP111)
pub const NO_BLOOM_VERSION: i32 = 70011;

/// Service bit: the peer accepts bloom filters
pub const NODE_BLOOM: u64 = 1 << 2;

/// User agent advertised in our `version` message
pub const USER_AGENT: &str = "/bcwallet.rs:0.1.0/";

/// Satoshis per BTC
pub const SATOSHIS_PER_BTC: u64 = 100_000_000;

/// Maximum money supply: 21,000,000 BTC in satoshis
pub const MAX_MONEY: u64 = 21_000_000 * SATOSHIS_PER_BTC;

/// Frame header: magic + command + length + checksum
pub const FRAME_HEADER_SIZE: usize = 24;

/// Width of the NUL-padded command field
pub const COMMAND_SIZE: usize = 12;

/// Upper bound on a single payload; anything larger desynchronizes the stream
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Serialized block header size
pub const BLOCK_HEADER_SIZE: usize = 80;

/// Maximum bloom filter size in bytes (BIP37)
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;

/// Maximum number of bloom hash functions (BIP37)
pub const MAX_HASH_FUNCS: u32 = 50;

/// Orphan blocks held in memory while their parents are fetched
pub const MAX_ORPHAN_BLOCKS: usize = 100;

/// Multiplier applied to the hash round index to derive the murmur seed
pub const BLOOM_SEED_MULTIPLIER: u32 = 0xFBA4_C795;

/// Bloom filter update flags
pub const BLOOM_UPDATE_NONE: u8 = 0;
pub const BLOOM_UPDATE_ALL: u8 = 1;
pub const BLOOM_UPDATE_P2PUBKEY_ONLY: u8 = 2;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Legacy signature hash type
pub const SIGHASH_ALL: u32 = 1;

/// Port written into placeholder network addresses
pub const PLACEHOLDER_PORT: u16 = 8333;

/// Bitcoin network the wallet talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Magic bytes as they appear on the wire
    pub fn magic(self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0xf9, 0xbe, 0xb4, 0xd9],
            Network::Testnet => [0x0b, 0x11, 0x09, 0x07],
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet => 18333,
        }
    }

    /// Base58Check version byte of P2PKH addresses
    pub fn address_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6f,
        }
    }

    /// Base58Check version byte of WIF private keys
    pub fn private_key_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x80,
            Network::Testnet => 0xef,
        }
    }

    /// Genesis block hash in display order
    pub fn genesis_hash(self) -> &'static str {
        match self {
            Network::Mainnet => "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
            Network::Testnet => "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
        }
    }

    /// DNS seed used when no peer is configured
    pub fn dns_seed(self) -> &'static str {
        match self {
            Network::Mainnet => "seed.bitcoin.sipa.be",
            Network::Testnet => "testnet-seed.bitcoin.jonasschnelli.ch",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mainnet" | "main" | "bitcoin" => Ok(Network::Mainnet),
            "testnet" | "testnet3" | "test" => Ok(Network::Testnet),
            other => Err(format!("unknown network {other}")),
        }
    }
}
