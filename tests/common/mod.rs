//! Shared fixtures: recorded testnet traffic and in-memory transports
#![allow(dead_code)]

use spv_wallet::*;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

/// Peer `version` (70002, height 1, /Satoshi:0.11.0/), `verack`, `ping`
pub const HANDSHAKES: &[&str] = &[
    "0b11090776657273696f6e0000000000660000001120d9de7211010001000000000000002f764156",
    "00000000010000000000000000000000000000000000ffff7748c053dbe801000000000000000000",
    "0000000000000000ffff00000000479dc78a2cb2d117634f102f5361746f7368693a302e31312e30",
    "2f0100000001",
    "0b11090776657261636b000000000000000000005df6e0e2",
    "0b11090770696e670000000000000000080000003b7bb8b4714402130da2acee",
];

/// Testnet genesis and block 1 as merkleblocks matching nothing
pub const BLOCKS: &[&str] = &[
    "0b1109076d65726b6c65626c6f636b0077000000d7bae3f801000000000000000000000000000000",
    "00000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3",
    "888a51323a9fb8aa4b1e5e4adae5494dffff001d1aa4ae1801000000013ba3edfd7a7b12b27ac72c",
    "3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a0100",
    "0b1109076d65726b6c65626c6f636b00770000006cd4d0390100000043497fd7f826957108f4a30f",
    "d9cec3aeba79972084e90ead01ea330900000000bac8b0fa927c0ac8234287e33c5f74d38d354820",
    "e24756ad709d7038fc5f31f020e7494dffff001d03e4b6720100000001bac8b0fa927c0ac8234287",
    "e33c5f74d38d354820e24756ad709d7038fc5f31f00100",
];

pub const GENESIS_HASH: &str = "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943";
pub const BLOCK_1_HASH: &str = "00000000b873e79784647a6c82962c70d228557d24a747ea4d1b8bbe878e1206";

/// A valid testnet address nobody in the tests owns
pub const FOREIGN_ADDRESS: &str = "n2eMqTT929pb1RDNuqEnxdaLau1rxy3efi";

fn decode_hex(lines: &[&str]) -> Vec<u8> {
    hex::decode(lines.concat()).expect("fixture hex")
}

pub fn handshakes() -> Vec<u8> {
    decode_hex(HANDSHAKES)
}

pub fn blocks() -> Vec<u8> {
    decode_hex(BLOCKS)
}

pub fn handshakes_and_blocks() -> Vec<u8> {
    let mut bytes = handshakes();
    bytes.extend(blocks());
    bytes
}

pub fn frame(message: &Message) -> Vec<u8> {
    encode_frame(Network::Testnet.magic(), message)
}

/// A `version` as a remote node would send it
pub fn peer_version(version: i32, start_height: i32) -> Message {
    Message::Version(spv_wallet::message::VersionMessage {
        version,
        services: 1 | NODE_BLOOM,
        timestamp: 1_700_000_000,
        addr_recv: None,
        addr_from: None,
        nonce: 0x0102_0304_0506_0708,
        user_agent: "/Satoshi:0.21.0/".to_string(),
        start_height,
        relay: true,
    })
}

/// Peer `version` at `start_height` followed by `verack`
pub fn peer_handshake(start_height: i32) -> Vec<u8> {
    let mut bytes = frame(&peer_version(70015, start_height));
    bytes.extend(frame(&Message::Verack));
    bytes
}

/// Split a captured byte stream back into messages
pub fn decode_all(mut bytes: &[u8]) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some((message, used)) = decode_frame(Network::Testnet.magic(), bytes).expect("valid frames") {
        messages.push(message);
        bytes = &bytes[used..];
    }
    assert!(bytes.is_empty(), "{} stray bytes", bytes.len());
    messages
}

/// What to do once the scripted input runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    Eof,
    Stall,
}

/// Plays back recorded bytes and captures everything written
pub struct ReplayTransport {
    input: VecDeque<u8>,
    max_read: usize,
    exhausted: Exhausted,
    pub written: Rc<RefCell<Vec<u8>>>,
    pub closed: Rc<RefCell<bool>>,
}

impl ReplayTransport {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: input.into(),
            max_read: usize::MAX,
            exhausted: Exhausted::Eof,
            written: Rc::new(RefCell::new(Vec::new())),
            closed: Rc::new(RefCell::new(false)),
        }
    }

    /// Deliver at most `max_read` bytes per read
    pub fn chunked(mut self, max_read: usize) -> Self {
        self.max_read = max_read;
        self
    }

    /// Report a read timeout instead of EOF at the end of the input
    pub fn stalling(mut self) -> Self {
        self.exhausted = Exhausted::Stall;
        self
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        decode_all(&self.written.borrow())
    }
}

impl Read for ReplayTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input.is_empty() {
            return match self.exhausted {
                Exhausted::Eof => Ok(0),
                Exhausted::Stall => Err(io::Error::new(io::ErrorKind::WouldBlock, "no data")),
            };
        }
        let n = buf.len().min(self.max_read).min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ReplayTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // accept a few bytes at a time to exercise the write loop
        let n = buf.len().min(7);
        self.written.borrow_mut().extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for ReplayTransport {
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        *self.closed.borrow_mut() = true;
    }
}

/// Hands out one scripted stream per connection, in order
#[derive(Default)]
pub struct ReplayConnector {
    streams: RefCell<VecDeque<Vec<u8>>>,
    pub connections: RefCell<Vec<(String, u16)>>,
    pub written: Rc<RefCell<Vec<Rc<RefCell<Vec<u8>>>>>>,
}

impl ReplayConnector {
    pub fn new(streams: Vec<Vec<u8>>) -> Self {
        Self {
            streams: RefCell::new(streams.into()),
            ..Default::default()
        }
    }

    /// Messages the wallet sent on connection `index`
    pub fn sent_on(&self, index: usize) -> Vec<Message> {
        decode_all(&self.written.borrow()[index].borrow())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.borrow().len()
    }
}

impl Connector for ReplayConnector {
    type Transport = ReplayTransport;

    fn connect(&self, host: &str, port: u16) -> Result<ReplayTransport> {
        self.connections.borrow_mut().push((host.to_string(), port));
        let stream = self
            .streams
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| WalletError::Connection(format!("connection to {host}:{port} refused")))?;
        let transport = ReplayTransport::new(stream);
        self.written.borrow_mut().push(transport.written.clone());
        Ok(transport)
    }
}

/// Testnet config pointed at a fake peer, files under `dir`
pub fn test_config(dir: &std::path::Path) -> WalletConfig {
    WalletConfig {
        peer: Some("peer.invalid".to_string()),
        keys_file: dir.join("keys"),
        data_file: dir.join("data"),
        timeout_secs: 10,
        ..WalletConfig::default()
    }
}
