//! Error types for the wallet, the wire codec and the peer session

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("merkle proof mismatch for block {0}")]
    MerkleProofMismatch(String),

    #[error("you don't have enough balance to pay (needed {needed} satoshis, available {available})")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid base58 character {0:?}")]
    InvalidCharacter(char),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("timed out after {0} seconds waiting for the peer")]
    Timeout(u64),

    #[error("the name \"{0}\" already exists")]
    NameExists(String),

    #[error("an address named {0} doesn't exist")]
    UnknownName(String),

    #[error("block {0} is not known")]
    UnknownBlock(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl WalletError {
    /// True when the peer sent data that cannot be trusted; the session
    /// must be dropped and a different peer chosen.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            WalletError::InvalidFrame(_)
                | WalletError::MalformedMessage(_)
                | WalletError::Protocol(_)
                | WalletError::MerkleProofMismatch(_)
        )
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::Connection(err.to_string())
    }
}

impl From<secp256k1::Error> for WalletError {
    fn from(err: secp256k1::Error) -> Self {
        WalletError::Key(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
