//! Key material, P2PKH addresses and the signing capability
//!
//! The wallet core only talks to [`KeyCapability`]; curve arithmetic stays
//! inside the `secp256k1` crate.

use crate::base58;
use crate::constants::Network;
use crate::error::{Result, WalletError};
use crate::hash::hash160;
use crate::types::{Hash, PubkeyHash};
use rand::RngCore;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A secret scalar and its compressed public point
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    #[serde(with = "hex::serde")]
    pub secret: [u8; 32],
    #[serde(with = "hex::serde")]
    pub public: Vec<u8>,
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("secret", &"<redacted>")
            .field("public", &hex::encode(&self.public))
            .finish()
    }
}

/// Key generation, address derivation and signing
pub trait KeyCapability {
    fn generate(&self, rng: &mut dyn RngCore) -> Result<Keypair>;

    /// RIPEMD160(SHA256(pubkey))
    fn pubkey_hash(&self, keypair: &Keypair) -> PubkeyHash {
        hash160(&keypair.public)
    }

    fn address_string(&self, keypair: &Keypair) -> String;

    /// Wallet import format
    fn private_key_export_string(&self, keypair: &Keypair) -> String;

    /// DER-encoded ECDSA signature over a 32-byte digest
    fn sign(&self, keypair: &Keypair, digest: &Hash) -> Result<Vec<u8>>;
}

/// [`KeyCapability`] backed by libsecp256k1
pub struct Secp256k1Keys {
    secp: Secp256k1<All>,
    network: Network,
}

impl Secp256k1Keys {
    pub fn new(network: Network) -> Self {
        Self {
            secp: Secp256k1::new(),
            network,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Check a DER signature against the keypair's public key
    pub fn verify(&self, keypair: &Keypair, digest: &Hash, der: &[u8]) -> bool {
        let (Ok(public), Ok(signature), Ok(message)) = (
            PublicKey::from_slice(&keypair.public),
            Signature::from_der(der),
            Message::from_digest_slice(digest),
        ) else {
            return false;
        };
        self.secp.verify_ecdsa(&message, &signature, &public).is_ok()
    }
}

impl KeyCapability for Secp256k1Keys {
    fn generate(&self, rng: &mut dyn RngCore) -> Result<Keypair> {
        let secret = SecretKey::new(rng);
        let public = PublicKey::from_secret_key(&self.secp, &secret);
        Ok(Keypair {
            secret: secret.secret_bytes(),
            public: public.serialize().to_vec(),
        })
    }

    fn address_string(&self, keypair: &Keypair) -> String {
        Address::new(self.network, self.pubkey_hash(keypair)).to_string()
    }

    fn private_key_export_string(&self, keypair: &Keypair) -> String {
        // trailing 0x01: the public key is compressed
        let mut payload = keypair.secret.to_vec();
        payload.push(0x01);
        base58::encode_check(self.network.private_key_version(), &payload)
    }

    fn sign(&self, keypair: &Keypair, digest: &Hash) -> Result<Vec<u8>> {
        let secret = SecretKey::from_slice(&keypair.secret)?;
        let message = Message::from_digest_slice(digest)?;
        let signature = self.secp.sign_ecdsa(&message, &secret);
        Ok(signature.serialize_der().to_vec())
    }
}

/// P2PKH address on a given network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub network: Network,
    pub pubkey_hash: PubkeyHash,
}

impl Address {
    pub fn new(network: Network, pubkey_hash: PubkeyHash) -> Self {
        Self { network, pubkey_hash }
    }

    /// Parse a Base58Check address, insisting on the given network
    pub fn parse(s: &str, network: Network) -> Result<Self> {
        let (version, payload) = base58::decode_check(s).map_err(|e| match e {
            WalletError::InvalidCharacter(c) => {
                WalletError::InvalidAddress(format!("{s} contains invalid character {c:?}"))
            }
            other => other,
        })?;
        if version != network.address_version() {
            return Err(WalletError::InvalidAddress(format!(
                "{s} is not a {network} address"
            )));
        }
        let pubkey_hash: PubkeyHash = payload
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::InvalidAddress(format!("{s} has a {}-byte payload", payload.len())))?;
        Ok(Self { network, pubkey_hash })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            base58::encode_check(self.network.address_version(), &self.pubkey_hash)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_base58(s: &str) -> bool {
        !s.is_empty()
            && s.chars()
                .all(|c| "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz".contains(c))
    }

    #[test]
    fn test_key_generation() {
        let keys = Secp256k1Keys::new(Network::Testnet);
        let keypair = keys.generate(&mut rand::thread_rng()).unwrap();
        assert_eq!(keypair.public.len(), 33);

        let address = keys.address_string(&keypair);
        let wif = keys.private_key_export_string(&keypair);
        assert!(is_base58(&address));
        assert!(is_base58(&wif));
        // testnet P2PKH addresses start with m or n, compressed WIF with c
        assert!(address.starts_with('m') || address.starts_with('n'));
        assert!(wif.starts_with('c'));
    }

    #[test]
    fn test_address_parses_back() {
        let keys = Secp256k1Keys::new(Network::Testnet);
        let keypair = keys.generate(&mut rand::thread_rng()).unwrap();
        let address = Address::parse(&keys.address_string(&keypair), Network::Testnet).unwrap();
        assert_eq!(address.pubkey_hash, keys.pubkey_hash(&keypair));
    }

    #[test]
    fn test_known_testnet_address() {
        let address = Address::parse("n2eMqTT929pb1RDNuqEnxdaLau1rxy3efi", Network::Testnet).unwrap();
        assert_eq!(address.to_string(), "n2eMqTT929pb1RDNuqEnxdaLau1rxy3efi");
    }

    #[test]
    fn test_wrong_network_rejected() {
        let err = Address::parse("n2eMqTT929pb1RDNuqEnxdaLau1rxy3efi", Network::Mainnet).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAddress(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            Address::parse("n2eMqTT929pb1RDNuqEnxdaLau1rxy3efO", Network::Testnet),
            Err(WalletError::InvalidAddress(_))
        ));
        assert!(matches!(
            Address::parse("n2eMqTT929pb1RDNuqEnxdaLau1rxy3efj", Network::Testnet),
            Err(WalletError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = Secp256k1Keys::new(Network::Testnet);
        let keypair = keys.generate(&mut rand::thread_rng()).unwrap();
        let digest = [0x11u8; 32];
        let der = keys.sign(&keypair, &digest).unwrap();
        assert_eq!(der[0], 0x30);
        assert!(keys.verify(&keypair, &digest, &der));
        assert!(!keys.verify(&keypair, &[0x12u8; 32], &der));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keypair = Keypair { secret: [0xab; 32], public: vec![2; 33] };
        assert!(!format!("{keypair:?}").contains("abab"));
    }

    #[test]
    fn test_keypair_json_round_trip() {
        let keys = Secp256k1Keys::new(Network::Mainnet);
        let keypair = keys.generate(&mut rand::thread_rng()).unwrap();
        let json = serde_json::to_string(&keypair).unwrap();
        let back: Keypair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, keypair);
    }
}
