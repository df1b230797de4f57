//! Bitcoin P2P wire messages: payload codec and 24-byte framing
//!
//! Every command the wallet sends or understands is one [`Message`] variant;
//! encoding and decoding go through a single dispatch on the command name.
//! Commands we do not model decode to [`Message::Unknown`].

use crate::bloom::BloomFilter;
use crate::constants::*;
use crate::encode::{encode_varint, write_var_bytes, write_var_str, ByteReader};
use crate::error::{Result, WalletError};
use crate::hash::{checksum, double_sha256};
use crate::transaction::{deserialize_transaction, serialize_transaction};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Network message types for the Bitcoin P2P protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Ping(PingMessage),
    Pong(PongMessage),
    Inv(InvMessage),
    GetData(InvMessage),
    NotFound(InvMessage),
    GetBlocks(GetBlocksMessage),
    GetHeaders(GetBlocksMessage),
    Headers(HeadersMessage),
    Addr(AddrMessage),
    FilterLoad(BloomFilter),
    FilterAdd(FilterAddMessage),
    FilterClear,
    MerkleBlock(MerkleBlockMessage),
    Tx(Transaction),
    Block(Block),
    MemPool,
    SendHeaders,
    FeeFilter(FeeFilterMessage),
    Reject(RejectMessage),
    Unknown(UnknownMessage),
}

/// Version message for the initial handshake.
///
/// `addr_recv`/`addr_from` are `None` when absent or unspecified.
/// `relay` only exists on the wire from protocol 70001 on; when the byte is
/// missing it reads as `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: Option<NetworkAddress>,
    pub addr_from: Option<NetworkAddress>,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

/// Ping message for connection keepalive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMessage {
    pub nonce: u64,
}

/// Pong message responding to ping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongMessage {
    pub nonce: u64,
}

/// Inventory list shared by inv, getdata and notfound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvMessage {
    pub inventory: Vec<InventoryVector>,
}

/// getblocks / getheaders request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksMessage {
    pub version: u32,
    #[serde(with = "serde_hash::vec")]
    pub block_locator_hashes: Vec<Hash>,
    #[serde(with = "serde_hash")]
    pub hash_stop: Hash,
}

/// Headers message containing block headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersMessage {
    pub headers: Vec<BlockHeader>,
}

/// Address message containing peer addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrMessage {
    pub addresses: Vec<TimestampedAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedAddress {
    pub time: u32,
    pub address: NetworkAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterAddMessage {
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

/// Block header plus a partial merkle tree of its transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleBlockMessage {
    pub header: BlockHeader,
    pub total_transactions: u32,
    #[serde(with = "serde_hash::vec")]
    pub hashes: Vec<Hash>,
    #[serde(with = "hex::serde")]
    pub flags: Vec<u8>,
}

/// FeeFilter message setting minimum fee rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeFilterMessage {
    pub feerate: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectMessage {
    pub message: String,
    pub code: u8,
    pub reason: String,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

/// Any command the codec does not model, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownMessage {
    pub name: String,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
}

/// Network address: services, IPv6 (IPv4-mapped for v4), big-endian port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

impl NetworkAddress {
    pub const ENCODED_SIZE: usize = 26;

    pub fn from_socket_addr(addr: SocketAddr, services: u64) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        Self {
            services,
            ip,
            port: addr.port(),
        }
    }

    /// What a null address is written as: no services, ::ffff:0.0.0.0
    pub fn unspecified() -> Self {
        Self::from_socket_addr(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), PLACEHOLDER_PORT),
            0,
        )
    }

    pub fn is_unspecified(&self) -> bool {
        self.to_socket_addr().ip().is_unspecified()
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.ip);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        SocketAddr::new(ip, self.port)
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.ip);
        out.extend_from_slice(&self.port.to_be_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            services: reader.read_u64()?,
            ip: reader.read_array()?,
            port: reader.read_u16_be()?,
        })
    }
}

/// Inventory object type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryType {
    Error,
    Tx,
    Block,
    FilteredBlock,
    Other(u32),
}

impl From<u32> for InventoryType {
    fn from(value: u32) -> Self {
        match value {
            0 => InventoryType::Error,
            1 => InventoryType::Tx,
            2 => InventoryType::Block,
            3 => InventoryType::FilteredBlock,
            other => InventoryType::Other(other),
        }
    }
}

impl From<InventoryType> for u32 {
    fn from(value: InventoryType) -> Self {
        match value {
            InventoryType::Error => 0,
            InventoryType::Tx => 1,
            InventoryType::Block => 2,
            InventoryType::FilteredBlock => 3,
            InventoryType::Other(other) => other,
        }
    }
}

/// Inventory vector identifying objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryVector {
    pub inv_type: InventoryType,
    #[serde(with = "serde_hash")]
    pub hash: Hash,
}

impl InventoryVector {
    pub const ENCODED_SIZE: usize = 36;
}

// ============================================================================
// BLOCK HEADERS
// ============================================================================

pub fn serialize_header(header: &BlockHeader, out: &mut Vec<u8>) {
    out.extend_from_slice(&header.version.to_le_bytes());
    out.extend_from_slice(&header.prev_block_hash);
    out.extend_from_slice(&header.merkle_root);
    out.extend_from_slice(&header.timestamp.to_le_bytes());
    out.extend_from_slice(&header.bits.to_le_bytes());
    out.extend_from_slice(&header.nonce.to_le_bytes());
}

pub fn deserialize_header(reader: &mut ByteReader<'_>) -> Result<BlockHeader> {
    Ok(BlockHeader {
        version: reader.read_i32()?,
        prev_block_hash: reader.read_hash()?,
        merkle_root: reader.read_hash()?,
        timestamp: reader.read_u32()?,
        bits: reader.read_u32()?,
        nonce: reader.read_u32()?,
    })
}

/// Block hash: double SHA256 of the 80-byte header
pub fn block_hash(header: &BlockHeader) -> Hash {
    let mut data = Vec::with_capacity(BLOCK_HEADER_SIZE);
    serialize_header(header, &mut data);
    double_sha256(&data)
}

// ============================================================================
// PAYLOAD CODEC
// ============================================================================

impl Message {
    /// Command name as written in the frame header
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::NotFound(_) => "notfound",
            Message::GetBlocks(_) => "getblocks",
            Message::GetHeaders(_) => "getheaders",
            Message::Headers(_) => "headers",
            Message::Addr(_) => "addr",
            Message::FilterLoad(_) => "filterload",
            Message::FilterAdd(_) => "filteradd",
            Message::FilterClear => "filterclear",
            Message::MerkleBlock(_) => "merkleblock",
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
            Message::MemPool => "mempool",
            Message::SendHeaders => "sendheaders",
            Message::FeeFilter(_) => "feefilter",
            Message::Reject(_) => "reject",
            Message::Unknown(unknown) => &unknown.name,
        }
    }

    /// Serialize the payload (without frame header)
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Message::Version(version) => encode_version(version, &mut out),
            Message::Verack | Message::FilterClear | Message::MemPool | Message::SendHeaders => {}
            Message::Ping(ping) => out.extend_from_slice(&ping.nonce.to_le_bytes()),
            Message::Pong(pong) => out.extend_from_slice(&pong.nonce.to_le_bytes()),
            Message::Inv(inv) | Message::GetData(inv) | Message::NotFound(inv) => {
                encode_inventory(inv, &mut out)
            }
            Message::GetBlocks(request) | Message::GetHeaders(request) => {
                out.extend_from_slice(&request.version.to_le_bytes());
                out.extend_from_slice(&encode_varint(request.block_locator_hashes.len() as u64));
                for hash in &request.block_locator_hashes {
                    out.extend_from_slice(hash);
                }
                out.extend_from_slice(&request.hash_stop);
            }
            Message::Headers(headers) => {
                out.extend_from_slice(&encode_varint(headers.headers.len() as u64));
                for header in &headers.headers {
                    serialize_header(header, &mut out);
                    out.push(0);
                }
            }
            Message::Addr(addr) => {
                out.extend_from_slice(&encode_varint(addr.addresses.len() as u64));
                for entry in &addr.addresses {
                    out.extend_from_slice(&entry.time.to_le_bytes());
                    entry.address.write(&mut out);
                }
            }
            Message::FilterLoad(filter) => out = filter.serialize(),
            Message::FilterAdd(add) => write_var_bytes(&mut out, &add.data),
            Message::MerkleBlock(merkle) => {
                serialize_header(&merkle.header, &mut out);
                out.extend_from_slice(&merkle.total_transactions.to_le_bytes());
                out.extend_from_slice(&encode_varint(merkle.hashes.len() as u64));
                for hash in &merkle.hashes {
                    out.extend_from_slice(hash);
                }
                write_var_bytes(&mut out, &merkle.flags);
            }
            Message::Tx(tx) => out = serialize_transaction(tx),
            Message::Block(block) => {
                serialize_header(&block.header, &mut out);
                out.extend_from_slice(&encode_varint(block.transactions.len() as u64));
                for tx in &block.transactions {
                    out.extend_from_slice(&serialize_transaction(tx));
                }
            }
            Message::FeeFilter(fee) => out.extend_from_slice(&fee.feerate.to_le_bytes()),
            Message::Reject(reject) => {
                write_var_str(&mut out, &reject.message);
                out.push(reject.code);
                write_var_str(&mut out, &reject.reason);
                out.extend_from_slice(&reject.data);
            }
            Message::Unknown(unknown) => out.extend_from_slice(&unknown.payload),
        }
        out
    }

    /// Decode the payload of `command`
    pub fn decode(command: &str, payload: &[u8]) -> Result<Message> {
        let mut reader = ByteReader::new(payload);
        let r = &mut reader;

        let message = match command {
            "version" => return Ok(Message::Version(decode_version(r)?)),
            "verack" => Message::Verack,
            "filterclear" => Message::FilterClear,
            "mempool" => Message::MemPool,
            "sendheaders" => Message::SendHeaders,
            "ping" => Message::Ping(PingMessage { nonce: r.read_u64()? }),
            "pong" => Message::Pong(PongMessage { nonce: r.read_u64()? }),
            "inv" => Message::Inv(decode_inventory(r)?),
            "getdata" => Message::GetData(decode_inventory(r)?),
            "notfound" => Message::NotFound(decode_inventory(r)?),
            "getblocks" => Message::GetBlocks(decode_getblocks(r)?),
            "getheaders" => Message::GetHeaders(decode_getblocks(r)?),
            "headers" => {
                let count = r.read_count(BLOCK_HEADER_SIZE + 1)?;
                let mut headers = Vec::with_capacity(count);
                for _ in 0..count {
                    headers.push(deserialize_header(r)?);
                    r.read_varint()?;
                }
                Message::Headers(HeadersMessage { headers })
            }
            "addr" => {
                let count = r.read_count(4 + NetworkAddress::ENCODED_SIZE)?;
                let mut addresses = Vec::with_capacity(count);
                for _ in 0..count {
                    addresses.push(TimestampedAddress {
                        time: r.read_u32()?,
                        address: NetworkAddress::read(r)?,
                    });
                }
                Message::Addr(AddrMessage { addresses })
            }
            "filterload" => {
                let bits = r.read_var_bytes()?.to_vec();
                let hash_funcs = r.read_u32()?;
                let tweak = r.read_u32()?;
                let flags = r.read_u8()?;
                Message::FilterLoad(BloomFilter::from_parts(bits, hash_funcs, tweak, flags)?)
            }
            "filteradd" => Message::FilterAdd(FilterAddMessage {
                data: r.read_var_bytes()?.to_vec(),
            }),
            "merkleblock" => {
                let header = deserialize_header(r)?;
                let total_transactions = r.read_u32()?;
                let count = r.read_count(32)?;
                let mut hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    hashes.push(r.read_hash()?);
                }
                let flags = r.read_var_bytes()?.to_vec();
                Message::MerkleBlock(MerkleBlockMessage {
                    header,
                    total_transactions,
                    hashes,
                    flags,
                })
            }
            "tx" => Message::Tx(deserialize_transaction(r)?),
            "block" => {
                let header = deserialize_header(r)?;
                let count = r.read_count(10)?;
                let mut transactions = Vec::with_capacity(count);
                for _ in 0..count {
                    transactions.push(deserialize_transaction(r)?);
                }
                Message::Block(Block { header, transactions })
            }
            "feefilter" => Message::FeeFilter(FeeFilterMessage { feerate: r.read_u64()? }),
            "reject" => Message::Reject(RejectMessage {
                message: r.read_var_str()?,
                code: r.read_u8()?,
                reason: r.read_var_str()?,
                data: r.read_rest().to_vec(),
            }),
            other => Message::Unknown(UnknownMessage {
                name: other.to_string(),
                payload: r.read_rest().to_vec(),
            }),
        };

        reader.finish(command)?;
        Ok(message)
    }
}

fn encode_version(version: &VersionMessage, out: &mut Vec<u8>) {
    out.extend_from_slice(&version.version.to_le_bytes());
    out.extend_from_slice(&version.services.to_le_bytes());
    out.extend_from_slice(&version.timestamp.to_le_bytes());
    version
        .addr_recv
        .unwrap_or_else(NetworkAddress::unspecified)
        .write(out);
    version
        .addr_from
        .unwrap_or_else(NetworkAddress::unspecified)
        .write(out);
    out.extend_from_slice(&version.nonce.to_le_bytes());
    write_var_str(out, &version.user_agent);
    out.extend_from_slice(&version.start_height.to_le_bytes());
    if version.version >= BLOOM_FILTER_VERSION {
        out.push(version.relay as u8);
    }
}

/// Fields after the timestamp were added over time; each one may be
/// missing entirely, but a field that is started must be complete.
fn decode_version(r: &mut ByteReader<'_>) -> Result<VersionMessage> {
    let version = r.read_i32()?;
    let services = r.read_u64()?;
    let timestamp = r.read_i64()?;

    let addr_recv = read_optional_address(r)?;
    let addr_from = read_optional_address(r)?;

    let nonce = if r.is_empty() { 0 } else { r.read_u64()? };
    let user_agent = if r.is_empty() { String::new() } else { r.read_var_str()? };
    let start_height = if r.is_empty() { 0 } else { r.read_i32()? };
    let relay = if r.is_empty() { true } else { r.read_u8()? != 0 };

    Ok(VersionMessage {
        version,
        services,
        timestamp,
        addr_recv,
        addr_from,
        nonce,
        user_agent,
        start_height,
        relay,
    })
}

fn read_optional_address(r: &mut ByteReader<'_>) -> Result<Option<NetworkAddress>> {
    if r.is_empty() {
        return Ok(None);
    }
    let address = NetworkAddress::read(r)?;
    Ok(if address.is_unspecified() { None } else { Some(address) })
}

fn encode_inventory(inv: &InvMessage, out: &mut Vec<u8>) {
    out.extend_from_slice(&encode_varint(inv.inventory.len() as u64));
    for item in &inv.inventory {
        out.extend_from_slice(&u32::from(item.inv_type).to_le_bytes());
        out.extend_from_slice(&item.hash);
    }
}

fn decode_inventory(r: &mut ByteReader<'_>) -> Result<InvMessage> {
    let count = r.read_count(InventoryVector::ENCODED_SIZE)?;
    let mut inventory = Vec::with_capacity(count);
    for _ in 0..count {
        inventory.push(InventoryVector {
            inv_type: InventoryType::from(r.read_u32()?),
            hash: r.read_hash()?,
        });
    }
    Ok(InvMessage { inventory })
}

fn decode_getblocks(r: &mut ByteReader<'_>) -> Result<GetBlocksMessage> {
    let version = r.read_u32()?;
    let count = r.read_count(32)?;
    let mut block_locator_hashes = Vec::with_capacity(count);
    for _ in 0..count {
        block_locator_hashes.push(r.read_hash()?);
    }
    Ok(GetBlocksMessage {
        version,
        block_locator_hashes,
        hash_stop: r.read_hash()?,
    })
}

// ============================================================================
// FRAMING
// ============================================================================

/// The fixed 24-byte header in front of every payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: [u8; 4],
    pub command: String,
    pub length: u32,
    pub checksum: [u8; 4],
}

impl FrameHeader {
    /// Parse and validate a header against the expected magic
    pub fn parse(magic: [u8; 4], bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let frame_magic: [u8; 4] = r.read_array()?;
        if frame_magic != magic {
            return Err(WalletError::InvalidFrame(format!(
                "magic {} does not match network magic {}",
                hex::encode(frame_magic),
                hex::encode(magic)
            )));
        }

        let raw_command: [u8; COMMAND_SIZE] = r.read_array()?;
        let end = raw_command.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
        if raw_command[end..].iter().any(|&b| b != 0)
            || !raw_command[..end].iter().all(|b| b.is_ascii_graphic())
        {
            return Err(WalletError::InvalidFrame(format!(
                "command field {} is not NUL-padded ASCII",
                hex::encode(raw_command)
            )));
        }
        let command = String::from_utf8_lossy(&raw_command[..end]).into_owned();

        let length = r.read_u32()?;
        if length as usize > MAX_PAYLOAD_SIZE {
            return Err(WalletError::InvalidFrame(format!(
                "{} payload of {} bytes exceeds the limit",
                command, length
            )));
        }

        Ok(Self {
            magic: frame_magic,
            command,
            length,
            checksum: r.read_array()?,
        })
    }
}

/// Wrap a message in its frame header
pub fn encode_frame(magic: [u8; 4], message: &Message) -> Vec<u8> {
    let payload = message.encode_payload();
    let command = message.command().as_bytes();

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&magic);
    let mut padded = [0u8; COMMAND_SIZE];
    let len = command.len().min(COMMAND_SIZE);
    padded[..len].copy_from_slice(&command[..len]);
    frame.extend_from_slice(&padded);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(&payload));
    frame.extend_from_slice(&payload);
    frame
}

/// Try to take one frame off the front of `buffer`.
///
/// Returns `Ok(None)` until the header and the whole payload are buffered;
/// otherwise the decoded message and the number of bytes it occupied.
/// Bad magic or checksum means the stream can no longer be trusted.
pub fn decode_frame(magic: [u8; 4], buffer: &[u8]) -> Result<Option<(Message, usize)>> {
    if buffer.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
    header_bytes.copy_from_slice(&buffer[..FRAME_HEADER_SIZE]);
    let header = FrameHeader::parse(magic, &header_bytes)?;

    let frame_len = FRAME_HEADER_SIZE + header.length as usize;
    if buffer.len() < frame_len {
        return Ok(None);
    }

    let payload = &buffer[FRAME_HEADER_SIZE..frame_len];
    if checksum(payload) != header.checksum {
        return Err(WalletError::InvalidFrame(format!(
            "checksum mismatch on {} payload",
            header.command
        )));
    }

    let message = Message::decode(&header.command, payload)?;
    Ok(Some((message, frame_len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION_PAYLOAD: [u8; 85] = [
        0x9C, 0x7C, 0x00, 0x00,
        0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0xE6, 0x15, 0x10, 0x4D, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x20, 0x8D,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x20, 0x8D,
        0xDD, 0x9D, 0x20, 0x2C, 0x3A, 0xB4, 0x57, 0x13,
        0x00,
        0x55, 0x81, 0x01, 0x00,
    ];

    fn old_version() -> VersionMessage {
        VersionMessage {
            version: 31900,
            services: 1,
            timestamp: 1292899814,
            addr_recv: None,
            addr_from: None,
            nonce: 1393780771635895773,
            user_agent: String::new(),
            start_height: 98645,
            relay: true,
        }
    }

    #[test]
    fn test_version_serialize_vector() {
        let payload = Message::Version(old_version()).encode_payload();
        assert_eq!(payload, VERSION_PAYLOAD.to_vec());
    }

    #[test]
    fn test_version_deserialize_vector() {
        match Message::decode("version", &VERSION_PAYLOAD).unwrap() {
            Message::Version(version) => assert_eq!(version, old_version()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_version_relay_written_for_bloom_capable_versions() {
        let mut version = old_version();
        version.version = PROTOCOL_VERSION;
        version.relay = false;
        let payload = Message::Version(version.clone()).encode_payload();
        assert_eq!(payload.len(), 86);
        assert_eq!(payload[85], 0);
        assert_eq!(Message::decode("version", &payload).unwrap(), Message::Version(version));
    }

    #[test]
    fn test_version_with_real_addresses() {
        let mut version = old_version();
        let addr: SocketAddr = "119.72.192.83:56296".parse().unwrap();
        version.addr_recv = Some(NetworkAddress::from_socket_addr(addr, 1));
        let payload = Message::Version(version.clone()).encode_payload();
        assert_eq!(&payload[20 + 8..20 + 24], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 119, 72, 192, 83]);
        assert_eq!(&payload[20 + 24..20 + 26], &[0xdb, 0xe8]);
        match Message::decode("version", &payload).unwrap() {
            Message::Version(decoded) => {
                assert_eq!(decoded.addr_recv.unwrap().to_socket_addr(), addr);
                assert_eq!(decoded.addr_from, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_version_missing_trailing_fields() {
        // version, services, timestamp only
        let payload = &VERSION_PAYLOAD[..20];
        match Message::decode("version", payload).unwrap() {
            Message::Version(version) => {
                assert_eq!(version.addr_recv, None);
                assert_eq!(version.addr_from, None);
                assert!(version.relay);
                assert_eq!(version.start_height, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_version_truncated_field_is_malformed() {
        assert!(matches!(
            Message::decode("version", &VERSION_PAYLOAD[..30]),
            Err(WalletError::MalformedMessage(_))
        ));
        assert!(matches!(
            Message::decode("version", &VERSION_PAYLOAD[..10]),
            Err(WalletError::MalformedMessage(_))
        ));
    }

    fn sample_inventory() -> InvMessage {
        let mut first = [0u8; 32];
        first[0] = 0x01;
        first[31] = 0x02;
        let mut second = [0u8; 32];
        second[0] = 0x03;
        second[31] = 0x04;
        InvMessage {
            inventory: vec![
                InventoryVector { inv_type: InventoryType::Tx, hash: first },
                InventoryVector { inv_type: InventoryType::Block, hash: second },
            ],
        }
    }

    #[test]
    fn test_inv_serialize_vector() {
        let payload = Message::Inv(sample_inventory()).encode_payload();
        assert_eq!(payload.len(), 1 + 2 * 36);
        assert_eq!(payload[0], 0x02);
        assert_eq!(&payload[1..5], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(payload[5], 0x01);
        assert_eq!(payload[36], 0x02);
        assert_eq!(&payload[37..41], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(payload[41], 0x03);
        assert_eq!(payload[72], 0x04);
    }

    #[test]
    fn test_inv_deserialize_preserves_order() {
        let payload = Message::Inv(sample_inventory()).encode_payload();
        let decoded = Message::decode("inv", &payload).unwrap();
        assert_eq!(decoded, Message::Inv(sample_inventory()));
        // getdata shares the encoding
        let getdata = Message::decode("getdata", &payload).unwrap();
        assert_eq!(getdata, Message::GetData(sample_inventory()));
    }

    #[test]
    fn test_inv_count_exceeding_payload() {
        let mut payload = Message::Inv(sample_inventory()).encode_payload();
        payload[0] = 0x03;
        assert!(matches!(Message::decode("inv", &payload), Err(WalletError::MalformedMessage(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut payload = 7u64.to_le_bytes().to_vec();
        payload.push(0);
        assert!(matches!(Message::decode("ping", &payload), Err(WalletError::MalformedMessage(_))));
    }

    #[test]
    fn test_unknown_inventory_type_kept() {
        let mut payload = vec![0x01];
        payload.extend_from_slice(&0x4000_0001u32.to_le_bytes());
        payload.extend_from_slice(&[9; 32]);
        match Message::decode("inv", &payload).unwrap() {
            Message::Inv(inv) => assert_eq!(inv.inventory[0].inv_type, InventoryType::Other(0x4000_0001)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_getblocks_layout() {
        let message = Message::GetBlocks(GetBlocksMessage {
            version: PROTOCOL_VERSION as u32,
            block_locator_hashes: vec![[1; 32], [2; 32]],
            hash_stop: [0; 32],
        });
        let payload = message.encode_payload();
        assert_eq!(payload.len(), 4 + 1 + 64 + 32);
        assert_eq!(payload[4], 2);
        assert_eq!(Message::decode("getblocks", &payload).unwrap(), message);
    }

    #[test]
    fn test_frame_round_trip_and_header() {
        let frame = encode_frame(Network::Testnet.magic(), &Message::Verack);
        assert_eq!(
            frame,
            vec![
                0x0b, 0x11, 0x09, 0x07, 0x76, 0x65, 0x72, 0x61, 0x63, 0x6b, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x5d, 0xf6, 0xe0, 0xe2,
            ]
        );
        let (message, used) = decode_frame(Network::Testnet.magic(), &frame).unwrap().unwrap();
        assert_eq!(message, Message::Verack);
        assert_eq!(used, 24);
    }

    #[test]
    fn test_frame_waits_for_complete_payload() {
        let frame = encode_frame(Network::Testnet.magic(), &Message::Ping(PingMessage { nonce: 42 }));
        let magic = Network::Testnet.magic();
        for cut in [0, 10, 23, 24, 31] {
            assert!(decode_frame(magic, &frame[..cut]).unwrap().is_none(), "cut {}", cut);
        }
        let mut buffer = frame.clone();
        buffer.extend_from_slice(&frame[..5]);
        let (message, used) = decode_frame(magic, &buffer).unwrap().unwrap();
        assert_eq!(message, Message::Ping(PingMessage { nonce: 42 }));
        assert_eq!(used, frame.len());
    }

    #[test]
    fn test_frame_bad_checksum() {
        let mut frame = encode_frame(Network::Testnet.magic(), &Message::Ping(PingMessage { nonce: 42 }));
        let last = frame.len() - 1;
        frame[last] ^= 1;
        assert!(matches!(
            decode_frame(Network::Testnet.magic(), &frame),
            Err(WalletError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_frame_wrong_network() {
        let frame = encode_frame(Network::Mainnet.magic(), &Message::Verack);
        assert!(matches!(
            decode_frame(Network::Testnet.magic(), &frame),
            Err(WalletError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_frame_garbage_command() {
        let mut frame = encode_frame(Network::Testnet.magic(), &Message::Verack);
        frame[11] = b'x';
        assert!(matches!(
            decode_frame(Network::Testnet.magic(), &frame),
            Err(WalletError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_oversized_length_rejected_before_buffering() {
        let mut frame = encode_frame(Network::Testnet.magic(), &Message::Verack);
        frame[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_frame(Network::Testnet.magic(), &frame),
            Err(WalletError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_unknown_command_kept_verbatim() {
        let message = Message::decode("wtxidrelay", &[1, 2]).unwrap();
        assert_eq!(message.command(), "wtxidrelay");
        let frame = encode_frame(Network::Testnet.magic(), &message);
        let (decoded, _) = decode_frame(Network::Testnet.magic(), &frame).unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_genesis_merkleblock_decodes() {
        let payload = hex::decode(concat!(
            "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd",
            "7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4adae5494dffff001d1aa4ae18",
            "01000000013ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a0100"
        ))
        .unwrap();
        match Message::decode("merkleblock", &payload).unwrap() {
            Message::MerkleBlock(merkle) => {
                assert_eq!(merkle.total_transactions, 1);
                assert_eq!(merkle.hashes, vec![merkle.header.merkle_root]);
                assert_eq!(merkle.flags, vec![0x00]);
                assert_eq!(
                    crate::hash::to_display_hex(&block_hash(&merkle.header)),
                    Network::Testnet.genesis_hash()
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reject_decodes() {
        let mut payload = Vec::new();
        write_var_str(&mut payload, "tx");
        payload.push(0x42);
        write_var_str(&mut payload, "insufficient fee");
        payload.extend_from_slice(&[7; 32]);
        match Message::decode("reject", &payload).unwrap() {
            Message::Reject(reject) => {
                assert_eq!(reject.message, "tx");
                assert_eq!(reject.code, 0x42);
                assert_eq!(reject.reason, "insufficient fee");
                assert_eq!(reject.data, vec![7; 32]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_merkleblock_json_is_tagged() {
        let message = Message::MerkleBlock(MerkleBlockMessage {
            header: BlockHeader {
                version: 1,
                prev_block_hash: [0; 32],
                merkle_root: [1; 32],
                timestamp: 0,
                bits: 0,
                nonce: 0,
            },
            total_transactions: 1,
            hashes: vec![[1; 32]],
            flags: vec![0],
        });
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"command\":\"merkleblock\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}
