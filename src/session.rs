//! Peer session: handshake, filtered block sync and broadcast
//!
//! One session drives one connection for one command. Every read is bounded
//! by the session deadline; any framing, decoding or proof failure closes
//! the connection and is returned to the caller. There is no resync of a
//! corrupted stream and no retry.

use crate::bloom::BloomFilter;
use crate::chain::{ChainState, ConnectOutcome};
use crate::constants::*;
use crate::error::{Result, WalletError};
use crate::hash::to_display_hex;
use crate::merkle::extract_matches;
use crate::message::*;
use crate::transaction::txid;
use crate::transport::Transport;
use crate::types::{Hash, Transaction};
use rand::RngCore;
use std::collections::HashSet;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8192;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingVersion,
    AwaitingVerack,
    Ready,
    ReceivingBlocks,
    Sending,
    Closed,
}

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub network: Network,
    pub user_agent: String,
    /// Overall deadline for everything the session does
    pub timeout: Duration,
    pub false_positive_rate: f64,
}

impl SessionOptions {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            user_agent: USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            false_positive_rate: 0.0001,
        }
    }
}

/// What the peer told us in its `version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub version: i32,
    pub services: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

/// Summary of a finished sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub peer_height: i32,
    pub tip_height: u32,
    pub blocks_connected: usize,
    /// Matched transactions stored during this session
    pub transactions: Vec<Hash>,
    pub orphans: usize,
}

/// Response to a single incoming message
#[derive(Debug, Clone)]
enum SessionResponse {
    Ok,
    SendMessage(Message),
    SendMessages(Vec<Message>),
}

/// Bookkeeping for the block walk
#[derive(Debug, Default)]
struct SyncProgress {
    requested_blocks: HashSet<Hash>,
    pending_transactions: HashSet<Hash>,
    awaiting_inventory: bool,
    blocks_connected: usize,
    transactions: Vec<Hash>,
}

impl SyncProgress {
    fn idle(&self) -> bool {
        self.requested_blocks.is_empty() && !self.awaiting_inventory
    }
}

pub struct PeerSession<T: Transport, R: RngCore> {
    transport: T,
    rng: R,
    options: SessionOptions,
    state: SessionState,
    buffer: Vec<u8>,
    deadline: Instant,
    peer: Option<PeerInfo>,
    verack_received: bool,
}

impl<T: Transport, R: RngCore> PeerSession<T, R> {
    /// Wrap a freshly connected transport. The deadline starts now.
    pub fn new(transport: T, rng: R, options: SessionOptions) -> Self {
        let deadline = Instant::now() + options.timeout;
        Self {
            transport,
            rng,
            options,
            state: SessionState::Connecting,
            buffer: Vec::new(),
            deadline,
            peer: None,
            verack_received: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Exchange `version`/`verack`. Ours goes first; the peer's two replies
    /// may arrive in either order.
    pub fn handshake(&mut self, start_height: u32) -> Result<PeerInfo> {
        let result = self.run_handshake(start_height);
        self.close_on_error(result)
    }

    fn run_handshake(&mut self, start_height: u32) -> Result<PeerInfo> {
        if self.state != SessionState::Connecting {
            return Err(WalletError::Protocol(format!("handshake in state {:?}", self.state)));
        }

        let version = self.version_message(start_height);
        self.send(&Message::Version(version))?;
        self.state = SessionState::AwaitingVersion;

        loop {
            if let (Some(peer), true) = (&self.peer, self.verack_received) {
                let peer = peer.clone();
                self.state = SessionState::Ready;
                info!(
                    "handshake complete: peer {} version {} at height {}",
                    peer.user_agent, peer.version, peer.start_height
                );
                return Ok(peer);
            }

            match self.receive()? {
                Message::Version(_) if self.peer.is_some() => {
                    warn!("ignoring duplicate version from peer")
                }
                Message::Version(version) => {
                    self.process_version_message(version)?;
                    self.send(&Message::Verack)?;
                    if !self.verack_received {
                        self.state = SessionState::AwaitingVerack;
                    }
                }
                Message::Verack => self.verack_received = true,
                Message::Ping(ping) => self.send(&Message::Pong(PongMessage { nonce: ping.nonce }))?,
                Message::Reject(reject) => {
                    warn!("peer rejected {}: {}", reject.message, reject.reason)
                }
                other => debug!("ignoring {} during handshake", other.command()),
            }
        }
    }

    fn version_message(&mut self, start_height: u32) -> VersionMessage {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        VersionMessage {
            version: PROTOCOL_VERSION,
            services: 0,
            timestamp,
            addr_recv: None,
            addr_from: None,
            nonce: self.rng.next_u64(),
            user_agent: self.options.user_agent.clone(),
            start_height: start_height as i32,
            relay: true,
        }
    }

    fn process_version_message(&mut self, version: VersionMessage) -> Result<()> {
        if version.version < BLOOM_FILTER_VERSION {
            return Err(WalletError::Protocol(format!(
                "peer protocol version {} cannot serve filtered blocks",
                version.version
            )));
        }
        if version.services & NODE_BLOOM == 0 {
            if version.version >= NO_BLOOM_VERSION {
                return Err(WalletError::Protocol(format!(
                    "peer version {} does not advertise bloom filter support",
                    version.version
                )));
            }
            warn!("peer services {:#x} lack NODE_BLOOM; filtering may be refused", version.services);
        }
        self.peer = Some(PeerInfo {
            version: version.version,
            services: version.services,
            user_agent: version.user_agent,
            start_height: version.start_height,
            relay: version.relay,
        });
        Ok(())
    }

    /// Load a filter over `elements` and walk blocks until the chain tip
    /// reaches the peer's advertised height and every matched transaction
    /// has arrived. The connection is closed afterwards.
    pub fn sync(&mut self, chain: &mut ChainState, elements: &[Vec<u8>]) -> Result<SyncReport> {
        let result = self.run_sync(chain, elements);
        let report = self.close_on_error(result)?;
        self.close();
        Ok(report)
    }

    fn run_sync(&mut self, chain: &mut ChainState, elements: &[Vec<u8>]) -> Result<SyncReport> {
        let peer_height = match (&self.peer, self.state) {
            (Some(peer), SessionState::Ready) => peer.start_height,
            _ => return Err(WalletError::Protocol(format!("sync in state {:?}", self.state))),
        };

        let filter = self.bloom_filter(elements);
        debug!(
            "loading bloom filter: {} bytes, {} hash functions",
            filter.size_bytes(),
            filter.hash_funcs()
        );
        self.send(&Message::FilterLoad(filter))?;
        self.state = SessionState::ReceivingBlocks;

        let mut progress = SyncProgress::default();

        let missing = chain.missing_transactions();
        if !missing.is_empty() {
            info!("requesting {} matched transactions from earlier runs", missing.len());
            progress.pending_transactions.extend(missing.iter().copied());
            self.send(&Message::GetData(inventory(InventoryType::Tx, &missing)))?;
        }

        self.request_blocks(chain, &mut progress)?;

        loop {
            if i64::from(chain.tip_height()) >= i64::from(peer_height)
                && progress.pending_transactions.is_empty()
            {
                break;
            }

            let message = self.receive()?;
            match self.process_sync_message(message, chain, &mut progress)? {
                SessionResponse::Ok => {}
                SessionResponse::SendMessage(message) => self.send(&message)?,
                SessionResponse::SendMessages(messages) => {
                    for message in &messages {
                        self.send(message)?;
                    }
                }
            }

            if progress.idle() && i64::from(chain.tip_height()) < i64::from(peer_height) {
                self.request_blocks(chain, &mut progress)?;
            }
        }

        info!(
            "sync complete at height {} ({} new blocks, {} transactions)",
            chain.tip_height(),
            progress.blocks_connected,
            progress.transactions.len()
        );
        Ok(SyncReport {
            peer_height,
            tip_height: chain.tip_height(),
            blocks_connected: progress.blocks_connected,
            transactions: progress.transactions,
            orphans: chain.orphan_count(),
        })
    }

    fn bloom_filter(&mut self, elements: &[Vec<u8>]) -> BloomFilter {
        let mut filter = BloomFilter::new(
            elements.len(),
            self.options.false_positive_rate,
            self.rng.next_u32(),
            BLOOM_UPDATE_ALL,
        );
        for element in elements {
            filter.insert(element);
        }
        filter
    }

    fn request_blocks(&mut self, chain: &ChainState, progress: &mut SyncProgress) -> Result<()> {
        let locator = chain.locator();
        debug!("getblocks from height {} ({} locator hashes)", chain.tip_height(), locator.len());
        progress.awaiting_inventory = true;
        self.send(&Message::GetBlocks(GetBlocksMessage {
            version: PROTOCOL_VERSION as u32,
            block_locator_hashes: locator,
            hash_stop: [0; 32],
        }))
    }

    /// Process one message received while walking blocks
    fn process_sync_message(
        &mut self,
        message: Message,
        chain: &mut ChainState,
        progress: &mut SyncProgress,
    ) -> Result<SessionResponse> {
        match message {
            Message::Inv(inv) => Ok(process_inv_message(&inv, chain, progress)),
            Message::MerkleBlock(merkleblock) => process_merkleblock_message(merkleblock, chain, progress),
            Message::Tx(tx) => Ok(process_tx_message(tx, chain, progress)),
            Message::NotFound(inv) => Ok(process_notfound_message(&inv, progress)),
            Message::Ping(ping) => Ok(SessionResponse::SendMessage(Message::Pong(PongMessage {
                nonce: ping.nonce,
            }))),
            Message::Reject(reject) => {
                warn!("peer rejected {}: {} (code {:#04x})", reject.message, reject.reason, reject.code);
                Ok(SessionResponse::Ok)
            }
            other => {
                debug!("ignoring {}", other.command());
                Ok(SessionResponse::Ok)
            }
        }
    }

    /// Send a signed transaction and hang up; returns its txid
    pub fn broadcast(&mut self, tx: &Transaction) -> Result<Hash> {
        if self.state != SessionState::Ready {
            let err = WalletError::Protocol(format!("broadcast in state {:?}", self.state));
            return self.close_on_error(Err(err));
        }
        self.state = SessionState::Sending;
        let result = self.send(&Message::Tx(tx.clone()));
        self.close();
        result?;

        let id = txid(tx);
        info!("broadcast transaction {}", to_display_hex(&id));
        Ok(id)
    }

    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.transport.close();
            self.state = SessionState::Closed;
        }
    }

    fn close_on_error<V>(&mut self, result: Result<V>) -> Result<V> {
        if let Err(e) = &result {
            warn!("closing session: {}", e);
            self.close();
        }
        result
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        let frame = encode_frame(self.options.network.magic(), message);
        debug!("sending {} ({} bytes)", message.command(), frame.len());

        let mut written = 0;
        while written < frame.len() {
            match self.transport.write(&frame[written..]) {
                Ok(0) => {
                    return Err(WalletError::Connection(
                        "peer stopped accepting data".to_string(),
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.transport.flush()?;
        Ok(())
    }

    /// Next whole message, reading more bytes as needed
    fn receive(&mut self) -> Result<Message> {
        let magic = self.options.network.magic();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some((message, used)) = decode_frame(magic, &self.buffer)? {
                self.buffer.drain(..used);
                debug!("received {}", message.command());
                return Ok(message);
            }

            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WalletError::Timeout(self.options.timeout.as_secs()));
            }
            self.transport.set_read_timeout(Some(remaining))?;

            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    return Err(WalletError::Connection(
                        "peer closed the connection".to_string(),
                    ))
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(WalletError::Timeout(self.options.timeout.as_secs()))
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn inventory(inv_type: InventoryType, hashes: &[Hash]) -> InvMessage {
    InvMessage {
        inventory: hashes
            .iter()
            .map(|hash| InventoryVector { inv_type, hash: *hash })
            .collect(),
    }
}

/// Ask for filtered versions of announced blocks we do not have
fn process_inv_message(inv: &InvMessage, chain: &ChainState, progress: &mut SyncProgress) -> SessionResponse {
    let mut wanted = Vec::new();
    for item in &inv.inventory {
        match item.inv_type {
            InventoryType::Block | InventoryType::FilteredBlock => {
                progress.awaiting_inventory = false;
                if !chain.contains_block(&item.hash)
                    && !chain.is_orphan(&item.hash)
                    && progress.requested_blocks.insert(item.hash)
                {
                    wanted.push(item.hash);
                }
            }
            // unconfirmed
            InventoryType::Tx => {}
            other => debug!("ignoring inventory of type {:?}", other),
        }
    }

    if wanted.is_empty() {
        SessionResponse::Ok
    } else {
        debug!("requesting {} filtered blocks", wanted.len());
        SessionResponse::SendMessage(Message::GetData(inventory(InventoryType::FilteredBlock, &wanted)))
    }
}

fn process_merkleblock_message(
    merkleblock: MerkleBlockMessage,
    chain: &mut ChainState,
    progress: &mut SyncProgress,
) -> Result<SessionResponse> {
    let hash = block_hash(&merkleblock.header);
    progress.requested_blocks.remove(&hash);

    let proof = extract_matches(
        merkleblock.total_transactions,
        &merkleblock.hashes,
        &merkleblock.flags,
    )?;
    if proof.root != merkleblock.header.merkle_root {
        return Err(WalletError::MerkleProofMismatch(format!(
            "block {} commits to {} but its proof yields {}",
            to_display_hex(&hash),
            to_display_hex(&merkleblock.header.merkle_root),
            to_display_hex(&proof.root)
        )));
    }

    let matched = proof.matched;
    match chain.connect(merkleblock, matched.clone()) {
        ConnectOutcome::Connected(blocks) => {
            progress.blocks_connected += blocks.len();
            debug!("connected block {} at height {}", to_display_hex(&hash), chain.tip_height());
        }
        ConnectOutcome::Orphan => warn!("block {} has an unknown parent", to_display_hex(&hash)),
        ConnectOutcome::Duplicate => debug!("already have block {}", to_display_hex(&hash)),
    }

    let wanted: Vec<Hash> = matched
        .into_iter()
        .filter(|id| !chain.has_transaction(id) && progress.pending_transactions.insert(*id))
        .collect();
    if wanted.is_empty() {
        Ok(SessionResponse::Ok)
    } else {
        debug!("block {} matched {} transactions", to_display_hex(&hash), wanted.len());
        Ok(SessionResponse::SendMessage(Message::GetData(inventory(InventoryType::Tx, &wanted))))
    }
}

fn process_tx_message(tx: Transaction, chain: &mut ChainState, progress: &mut SyncProgress) -> SessionResponse {
    let id = txid(&tx);
    let expected = progress.pending_transactions.remove(&id) || chain.is_matched(&id);
    if expected && !chain.has_transaction(&id) {
        debug!("storing transaction {}", to_display_hex(&id));
        chain.add_transaction(tx);
        progress.transactions.push(id);
    } else if !expected {
        debug!("ignoring unsolicited transaction {}", to_display_hex(&id));
    }
    SessionResponse::Ok
}

fn process_notfound_message(inv: &InvMessage, progress: &mut SyncProgress) -> SessionResponse {
    for item in &inv.inventory {
        warn!("peer does not have {:?} {}", item.inv_type, to_display_hex(&item.hash));
        progress.pending_transactions.remove(&item.hash);
        progress.requested_blocks.remove(&item.hash);
    }
    SessionResponse::Ok
}
