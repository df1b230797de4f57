//! Base58 and Base58Check encoding over the `bs58` codec
//!
//! Leading zero bytes survive as leading `'1'` characters.

use crate::error::{Result, WalletError};

/// Encode bytes as Base58
pub fn encode(input: &[u8]) -> String {
    bs58::encode(input).into_string()
}

/// Decode a Base58 string
pub fn decode(input: &str) -> Result<Vec<u8>> {
    bs58::decode(input)
        .into_vec()
        .map_err(|e| decode_error(input, e))
}

/// Base58Check: version byte, payload, then the first four bytes of the
/// double SHA256 of both.
pub fn encode_check(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len());
    data.push(version);
    data.extend_from_slice(payload);
    bs58::encode(data).with_check().into_string()
}

/// Inverse of [`encode_check`], returning (version, payload)
pub fn decode_check(input: &str) -> Result<(u8, Vec<u8>)> {
    let data = bs58::decode(input)
        .with_check(None)
        .into_vec()
        .map_err(|e| decode_error(input, e))?;
    match data.split_first() {
        Some((&version, payload)) => Ok((version, payload.to_vec())),
        None => Err(WalletError::InvalidAddress(format!("{input} has no version byte"))),
    }
}

fn decode_error(input: &str, error: bs58::decode::Error) -> WalletError {
    match error {
        bs58::decode::Error::InvalidCharacter { character, .. } => WalletError::InvalidCharacter(character),
        bs58::decode::Error::NonAsciiCharacter { index } => {
            WalletError::InvalidCharacter(input.get(index..).and_then(|rest| rest.chars().next()).unwrap_or('\u{fffd}'))
        }
        bs58::decode::Error::InvalidChecksum { .. } => {
            WalletError::InvalidAddress(format!("{input} has a bad checksum"))
        }
        bs58::decode::Error::NoChecksum => WalletError::InvalidAddress(format!("{input} is too short")),
        other => WalletError::InvalidAddress(format!("{input}: {other}")),
    }
}
