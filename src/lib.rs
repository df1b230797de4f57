//! # spv-wallet
//!
//! A minimal Simplified Payment Verification Bitcoin wallet that speaks the
//! raw peer-to-peer protocol to a single peer.
//!
//! ## Architecture
//!
//! Leaves first:
//! - Encoding: Base58Check, compact sizes, the bounds-checked `ByteReader`
//! - Filtering: the BIP37 bloom filter loaded into the peer
//! - Wire: the `Message` enum, payload codec and 24-byte framing
//! - Verification: partial merkle trees carried by `merkleblock`
//! - Session: handshake, filtered block walk, broadcast
//! - Wallet: named keys, balances, sends, stored blocks
//!
//! The peer is assumed hostile: every frame is checked, every proof is
//! recomputed, and any violation ends the session.
//!
//! ## Usage
//!
//! ```rust
//! use spv_wallet::{base58, format_amount, parse_amount};
//!
//! assert_eq!(base58::encode(&[0, 1, 2]), "15T");
//! assert_eq!(parse_amount("0.5").unwrap(), 50_000_000);
//! assert_eq!(format_amount(50_000_000), "0.50000000");
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod hash;
pub mod encode;
pub mod base58;
pub mod bloom;
pub mod key;
pub mod transaction;
pub mod merkle;
pub mod message;
pub mod chain;
pub mod transport;
pub mod session;
pub mod storage;
pub mod config;
pub mod wallet;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{Result, WalletError};
pub use hash::{double_sha256, from_display_hex, hash160, to_display_hex};
pub use bloom::BloomFilter;
pub use key::{Address, KeyCapability, Keypair, Secp256k1Keys};
pub use message::{decode_frame, encode_frame, Message};
pub use chain::ChainState;
pub use transport::{Connector, TcpConnector, Transport};
pub use session::{PeerSession, SessionOptions, SessionState, SyncReport};
pub use storage::{JsonFileStore, KeyMap, WalletStore};
pub use config::WalletConfig;
pub use wallet::{format_amount, parse_amount, AddressBalance, PreparedSend, Wallet};
