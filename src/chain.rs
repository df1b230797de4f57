//! Persisted scan state: verified merkleblocks, matched transactions, tip
//!
//! Blocks are connected by their previous-block hash. The network's genesis
//! block is implicitly known at height 0 even before its merkleblock has
//! been received. Blocks whose parent is unknown wait in memory as orphans,
//! at most [`MAX_ORPHAN_BLOCKS`] of them.

use crate::constants::{Network, MAX_ORPHAN_BLOCKS};
use crate::hash::{from_display_hex, to_display_hex};
use crate::message::{block_hash, MerkleBlockMessage};
use crate::transaction::{extract_p2pkh, txid};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// A verified merkleblock and the txids its proof matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub height: u32,
    pub merkleblock: MerkleBlockMessage,
    #[serde(with = "serde_hash::vec")]
    pub matched: Vec<Hash>,
}

/// Outcome of handing a block to [`ChainState::connect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Already stored
    Duplicate,
    /// Parent unknown, held until it arrives
    Orphan,
    /// Stored, with any orphans it unblocked, in connection order
    Connected(Vec<Hash>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Orphan {
    hash: Hash,
    merkleblock: MerkleBlockMessage,
    matched: Vec<Hash>,
}

/// Orphans indexed by the parent they wait for, oldest evicted first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct OrphanPool {
    by_parent: HashMap<Hash, Vec<Orphan>>,
    /// (parent, hash) in arrival order
    arrival: VecDeque<(Hash, Hash)>,
}

impl OrphanPool {
    fn len(&self) -> usize {
        self.arrival.len()
    }

    fn contains(&self, hash: &Hash) -> bool {
        self.arrival.iter().any(|(_, held)| held == hash)
    }

    fn insert(&mut self, orphan: Orphan) {
        if self.contains(&orphan.hash) {
            return;
        }
        if self.arrival.len() >= MAX_ORPHAN_BLOCKS {
            if let Some((parent, evicted)) = self.arrival.pop_front() {
                debug!("evicting orphan block {}", to_display_hex(&evicted));
                if let Some(siblings) = self.by_parent.get_mut(&parent) {
                    siblings.retain(|held| held.hash != evicted);
                    if siblings.is_empty() {
                        self.by_parent.remove(&parent);
                    }
                }
            }
        }
        let parent = orphan.merkleblock.header.prev_block_hash;
        self.arrival.push_back((parent, orphan.hash));
        self.by_parent.entry(parent).or_default().push(orphan);
    }

    /// Remove and return every orphan waiting on `parent`
    fn take_children(&mut self, parent: &Hash) -> Vec<Orphan> {
        let children = self.by_parent.remove(parent).unwrap_or_default();
        if !children.is_empty() {
            self.arrival.retain(|(waiting_on, _)| waiting_on != parent);
        }
        children
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub network: Network,
    /// Keyed by display hash
    blocks: BTreeMap<String, StoredBlock>,
    /// Keyed by display txid
    transactions: BTreeMap<String, Transaction>,
    tip: Option<String>,
    #[serde(skip)]
    orphans: OrphanPool,
}

impl ChainState {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            blocks: BTreeMap::new(),
            transactions: BTreeMap::new(),
            tip: None,
            orphans: OrphanPool::default(),
        }
    }

    fn genesis(&self) -> Hash {
        from_display_hex(self.network.genesis_hash()).unwrap_or([0; 32])
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip
            .as_deref()
            .and_then(from_display_hex)
            .unwrap_or_else(|| self.genesis())
    }

    pub fn tip_height(&self) -> u32 {
        self.tip
            .as_ref()
            .and_then(|tip| self.blocks.get(tip))
            .map(|block| block.height)
            .unwrap_or(0)
    }

    pub fn height_of(&self, hash: &Hash) -> Option<u32> {
        if *hash == self.genesis() {
            return Some(0);
        }
        self.blocks.get(&to_display_hex(hash)).map(|block| block.height)
    }

    /// Whether the block is stored (or is the implicit genesis)
    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.height_of(hash).is_some()
    }

    pub fn is_orphan(&self, hash: &Hash) -> bool {
        self.orphans.contains(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, hash: &Hash) -> Option<&StoredBlock> {
        self.blocks.get(&to_display_hex(hash))
    }

    /// Store a block whose merkle proof has already been checked.
    pub fn connect(&mut self, merkleblock: MerkleBlockMessage, matched: Vec<Hash>) -> ConnectOutcome {
        let hash = block_hash(&merkleblock.header);
        if self.blocks.contains_key(&to_display_hex(&hash)) {
            return ConnectOutcome::Duplicate;
        }

        let height = if hash == self.genesis() {
            0
        } else {
            match self.height_of(&merkleblock.header.prev_block_hash) {
                Some(parent) => parent + 1,
                None => {
                    debug!("holding orphan block {}", to_display_hex(&hash));
                    self.orphans.insert(Orphan {
                        hash,
                        merkleblock,
                        matched,
                    });
                    return ConnectOutcome::Orphan;
                }
            }
        };

        let mut connected = vec![hash];
        self.store(hash, height, merkleblock, matched);

        // Adopt orphans whose parents are now known
        let mut frontier = vec![(hash, height)];
        while let Some((parent, parent_height)) = frontier.pop() {
            for child in self.orphans.take_children(&parent) {
                self.store(child.hash, parent_height + 1, child.merkleblock, child.matched);
                connected.push(child.hash);
                frontier.push((child.hash, parent_height + 1));
            }
        }

        ConnectOutcome::Connected(connected)
    }

    fn store(&mut self, hash: Hash, height: u32, merkleblock: MerkleBlockMessage, matched: Vec<Hash>) {
        let key = to_display_hex(&hash);
        let is_new_tip = self.tip.is_none() || height > self.tip_height();
        self.blocks.insert(
            key.clone(),
            StoredBlock {
                height,
                merkleblock,
                matched,
            },
        );
        if is_new_tip {
            self.tip = Some(key);
        } else if hash != self.genesis() {
            warn!("block {} at height {} does not extend the tip", to_display_hex(&hash), height);
        }
    }

    /// Hashes from the tip back to genesis, tip first
    fn active_chain(&self) -> Vec<Hash> {
        let mut chain = Vec::new();
        let mut cursor = self.tip.clone();
        while let Some(key) = cursor {
            let Some(block) = self.blocks.get(&key) else { break };
            if let Some(hash) = from_display_hex(&key) {
                chain.push(hash);
            }
            cursor = (block.height > 0).then(|| to_display_hex(&block.merkleblock.header.prev_block_hash));
        }
        if chain.last() != Some(&self.genesis()) {
            chain.push(self.genesis());
        }
        chain
    }

    /// Block locator for `getblocks`: the last ten blocks one by one, then
    /// exponentially further back, always ending at genesis.
    pub fn locator(&self) -> Vec<Hash> {
        let chain = self.active_chain();
        let mut locator = Vec::new();
        let mut index = 0usize;
        let mut step = 1usize;
        while index < chain.len() {
            locator.push(chain[index]);
            if locator.len() >= 10 {
                step *= 2;
            }
            index += step;
        }
        if locator.last() != chain.last() {
            if let Some(genesis) = chain.last() {
                locator.push(*genesis);
            }
        }
        locator
    }

    pub fn has_transaction(&self, txid: &Hash) -> bool {
        self.transactions.contains_key(&to_display_hex(txid))
    }

    /// Whether any stored block's proof matched `txid`
    pub fn is_matched(&self, txid: &Hash) -> bool {
        self.blocks.values().any(|block| block.matched.contains(txid))
    }

    /// Store a transaction; returns its txid
    pub fn add_transaction(&mut self, tx: Transaction) -> Hash {
        let id = txid(&tx);
        self.transactions.insert(to_display_hex(&id), tx);
        id
    }

    pub fn transaction(&self, txid: &Hash) -> Option<&Transaction> {
        self.transactions.get(&to_display_hex(txid))
    }

    /// Matched txids whose transactions were never received
    pub fn missing_transactions(&self) -> Vec<Hash> {
        let mut missing = Vec::new();
        for block in self.blocks.values() {
            for id in &block.matched {
                if !self.has_transaction(id) && !missing.contains(id) {
                    missing.push(*id);
                }
            }
        }
        missing
    }

    /// Transactions confirmed on the active chain, oldest block first
    fn confirmed_transactions(&self) -> Vec<(Hash, &Transaction)> {
        let mut chain = self.active_chain();
        chain.reverse();
        let mut seen = HashSet::new();
        let mut confirmed = Vec::new();
        for hash in chain {
            let Some(block) = self.block(&hash) else { continue };
            for id in &block.matched {
                if let Some(tx) = self.transaction(id) {
                    if seen.insert(*id) {
                        confirmed.push((*id, tx));
                    }
                }
            }
        }
        confirmed
    }

    /// Unspent P2PKH outputs paying any of `watched`, oldest first
    pub fn utxos(&self, watched: &[PubkeyHash]) -> Vec<Utxo> {
        let confirmed = self.confirmed_transactions();
        let spent: HashSet<OutPoint> = confirmed
            .iter()
            .flat_map(|(_, tx)| tx.inputs.iter().map(|input| input.prevout))
            .collect();

        let mut utxos = Vec::new();
        for (id, tx) in &confirmed {
            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    hash: *id,
                    index: index as u32,
                };
                let owned = extract_p2pkh(&output.script_pubkey)
                    .map(|owner| watched.contains(&owner))
                    .unwrap_or(false);
                if owned && output.value >= 0 && !spent.contains(&outpoint) {
                    utxos.push(Utxo {
                        outpoint,
                        value: output.value as u64,
                        script_pubkey: output.script_pubkey.clone(),
                    });
                }
            }
        }
        utxos
    }

    /// Confirmed balance per watched pubkey hash
    pub fn balances(&self, watched: &[PubkeyHash]) -> HashMap<PubkeyHash, u64> {
        let mut balances: HashMap<PubkeyHash, u64> = watched.iter().map(|h| (*h, 0)).collect();
        for utxo in self.utxos(watched) {
            if let Some(owner) = extract_p2pkh(&utxo.script_pubkey) {
                *balances.entry(owner).or_insert(0) += utxo.value;
            }
        }
        balances
    }
}
