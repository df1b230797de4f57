//! Wallet commands: keys, balance, send and stored blocks
//!
//! Every network command opens one fresh session; `send` syncs on one
//! connection and broadcasts on a second.

use crate::chain::ChainState;
use crate::config::WalletConfig;
use crate::constants::{MAX_MONEY, SATOSHIS_PER_BTC};
use crate::error::{Result, WalletError};
use crate::hash::{from_display_hex, to_display_hex};
use crate::key::{Address, KeyCapability, Keypair};
use crate::message::Message;
use crate::session::{PeerSession, SyncReport};
use crate::storage::{KeyMap, WalletStore};
use crate::transaction::{build_spend, txid, SpendRequest};
use crate::transport::Connector;
use crate::types::{Hash, PubkeyHash, Transaction};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

/// Confirmed balance of one named address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBalance {
    pub name: String,
    pub address: String,
    pub satoshis: u64,
}

/// A signed spend waiting for confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSend {
    pub name: String,
    pub destination: String,
    pub amount: u64,
    pub fee: u64,
    pub transaction: Transaction,
    pub txid: Hash,
}

pub struct Wallet<S: WalletStore, K: KeyCapability, C: Connector> {
    store: S,
    keys: K,
    connector: C,
    config: WalletConfig,
    rng: StdRng,
}

impl<S: WalletStore, K: KeyCapability, C: Connector> Wallet<S, K, C> {
    pub fn new(store: S, keys: K, connector: C, config: WalletConfig) -> Self {
        Self {
            store,
            keys,
            connector,
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the randomness source (key generation, nonces, filter tweak)
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Create a keypair under `name`; returns its address
    pub fn generate(&mut self, name: &str) -> Result<String> {
        let mut keys = self.store.load_keys()?;
        if keys.contains_key(name) {
            return Err(WalletError::NameExists(name.to_string()));
        }
        let keypair = self.keys.generate(&mut self.rng)?;
        let address = self.keys.address_string(&keypair);
        keys.insert(name.to_string(), keypair);
        self.store.save_keys(&keys)?;
        info!("generated address {} for {}", address, name);
        Ok(address)
    }

    /// (name, address) pairs sorted by name
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .store
            .load_keys()?
            .iter()
            .map(|(name, keypair)| (name.clone(), self.keys.address_string(keypair)))
            .collect())
    }

    /// WIF private key of `name`
    pub fn export(&self, name: &str) -> Result<String> {
        let keys = self.store.load_keys()?;
        let keypair = lookup(&keys, name)?;
        Ok(self.keys.private_key_export_string(keypair))
    }

    /// Sync with the peer and report every address's confirmed balance
    pub fn balance(&mut self) -> Result<Vec<AddressBalance>> {
        let keys = self.store.load_keys()?;
        if keys.is_empty() {
            debug!("no keys to watch, skipping sync");
            return Ok(Vec::new());
        }
        let (chain, _) = self.sync(&keys)?;
        let watched = self.watched(&keys);
        let balances = chain.balances(&watched);

        Ok(keys
            .iter()
            .zip(watched)
            .map(|((name, keypair), hash)| AddressBalance {
                name: name.clone(),
                address: self.keys.address_string(keypair),
                satoshis: balances.get(&hash).copied().unwrap_or(0),
            })
            .collect())
    }

    /// Validate, sync and sign a payment from `name` without sending it
    pub fn prepare_send(&mut self, name: &str, destination: &str, amount: u64) -> Result<PreparedSend> {
        let keys = self.store.load_keys()?;
        let keypair = lookup(&keys, name)?.clone();
        let destination_address = Address::parse(destination, self.config.network)?;
        if amount > MAX_MONEY {
            return Err(WalletError::InvalidAmount(format_amount(amount)));
        }

        let (chain, _) = self.sync(&keys)?;
        let owner = self.keys.pubkey_hash(&keypair);
        let utxos = chain.utxos(&[owner]);

        let request = SpendRequest {
            utxos: &utxos,
            destination: destination_address.pubkey_hash,
            amount,
            fee: self.config.fee,
            change: owner,
        };
        let transaction = build_spend(&request, &self.keys, &keypair)?;
        let id = txid(&transaction);
        info!(
            "prepared {} ({} inputs) paying {} to {}",
            to_display_hex(&id),
            transaction.inputs.len(),
            format_amount(amount),
            destination
        );

        Ok(PreparedSend {
            name: name.to_string(),
            destination: destination.to_string(),
            amount,
            fee: self.config.fee,
            transaction,
            txid: id,
        })
    }

    /// Send a prepared payment on a fresh connection
    pub fn broadcast(&mut self, prepared: PreparedSend) -> Result<Hash> {
        let chain = self.load_chain()?;
        let transport = self
            .connector
            .connect(self.config.peer_host(), self.config.peer_port())?;
        let mut session = PeerSession::new(transport, &mut self.rng, self.config.session_options());
        session.handshake(chain.tip_height())?;
        session.broadcast(&prepared.transaction)
    }

    /// Prepare, ask `confirm`, then broadcast. `Ok(None)` when declined.
    pub fn send<F>(&mut self, name: &str, destination: &str, amount: u64, confirm: F) -> Result<Option<Hash>>
    where
        F: FnOnce(&PreparedSend) -> bool,
    {
        let prepared = self.prepare_send(name, destination, amount)?;
        if !confirm(&prepared) {
            info!("send of {} cancelled", to_display_hex(&prepared.txid));
            return Ok(None);
        }
        self.broadcast(prepared).map(Some)
    }

    /// Pretty JSON of a stored merkleblock, looked up by display hash
    pub fn block(&self, hash: &str) -> Result<String> {
        let unknown = || WalletError::UnknownBlock(hash.to_string());
        let block_hash = from_display_hex(hash).ok_or_else(unknown)?;
        let chain = self.load_chain()?;
        let stored = chain.block(&block_hash).ok_or_else(unknown)?;
        serde_json::to_string_pretty(&Message::MerkleBlock(stored.merkleblock.clone()))
            .map_err(|e| WalletError::Storage(e.to_string()))
    }

    fn watched(&self, keys: &KeyMap) -> Vec<PubkeyHash> {
        keys.values().map(|keypair| self.keys.pubkey_hash(keypair)).collect()
    }

    fn load_chain(&self) -> Result<ChainState> {
        match self.store.load_chain()? {
            Some(chain) if chain.network == self.config.network => Ok(chain),
            Some(chain) => {
                warn!("stored chain is for {}, starting over on {}", chain.network, self.config.network);
                Ok(ChainState::new(self.config.network))
            }
            None => Ok(ChainState::new(self.config.network)),
        }
    }

    /// Bring the stored chain up to the peer's height and persist it
    fn sync(&mut self, keys: &KeyMap) -> Result<(ChainState, SyncReport)> {
        let mut chain = self.load_chain()?;

        // pubkey hashes, public keys and known outpoints, so spends match too
        let watched = self.watched(keys);
        let mut elements: Vec<Vec<u8>> = Vec::new();
        for (keypair, hash) in keys.values().zip(&watched) {
            elements.push(hash.to_vec());
            elements.push(keypair.public.clone());
        }
        for utxo in chain.utxos(&watched) {
            elements.push(utxo.outpoint.to_bytes().to_vec());
        }

        let transport = self
            .connector
            .connect(self.config.peer_host(), self.config.peer_port())?;
        let mut session = PeerSession::new(transport, &mut self.rng, self.config.session_options());
        session.handshake(chain.tip_height())?;
        let report = session.sync(&mut chain, &elements)?;

        self.store.save_chain(&chain)?;
        Ok((chain, report))
    }
}

fn lookup<'a>(keys: &'a KeyMap, name: &str) -> Result<&'a Keypair> {
    keys.get(name).ok_or_else(|| WalletError::UnknownName(name.to_string()))
}

/// Parse a BTC amount with at most eight decimals into satoshis
pub fn parse_amount(text: &str) -> Result<u64> {
    let invalid = || WalletError::InvalidAmount(text.to_string());
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    if (whole.is_empty() && fraction.is_empty())
        || fraction.len() > 8
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<8}", fraction).parse().map_err(|_| invalid())?
    };

    let satoshis = whole
        .checked_mul(SATOSHIS_PER_BTC)
        .and_then(|s| s.checked_add(fraction))
        .filter(|s| *s <= MAX_MONEY)
        .ok_or_else(invalid)?;
    Ok(satoshis)
}

/// Satoshis as BTC with eight decimals
pub fn format_amount(satoshis: u64) -> String {
    format!("{}.{:08}", satoshis / SATOSHIS_PER_BTC, satoshis % SATOSHIS_PER_BTC)
}
