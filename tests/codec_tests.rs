//! Wire codec, Base58 and merkle verification against recorded testnet traffic

mod common;

use common::*;
use spv_wallet::merkle::extract_matches;
use spv_wallet::message::*;
use spv_wallet::*;

#[test]
fn test_recorded_handshake_decodes() {
    let messages = decode_all(&handshakes());
    assert_eq!(messages.len(), 3);

    match &messages[0] {
        Message::Version(version) => {
            assert_eq!(version.version, 70002);
            assert_eq!(version.services, 1);
            assert_eq!(version.user_agent, "/Satoshi:0.11.0/");
            assert_eq!(version.start_height, 1);
            assert!(version.relay);
            let addr_recv = version.addr_recv.expect("peer filled in our address");
            assert_eq!(addr_recv.to_socket_addr().to_string(), "119.72.192.83:56296");
            assert_eq!(version.addr_from, None);
        }
        other => panic!("expected version, got {:?}", other),
    }
    assert_eq!(messages[1], Message::Verack);
    assert_eq!(messages[2], Message::Ping(PingMessage { nonce: 0xeeac_a20d_1302_4471 }));
}

#[test]
fn test_recorded_frames_reencode_identically() {
    // the peer's version carries an address we normalize to None; skip it
    let recorded = handshakes_and_blocks();
    let after_version = &recorded[24 + 102..];
    let mut reencoded = Vec::new();
    for message in decode_all(after_version) {
        reencoded.extend(frame(&message));
    }
    assert_eq!(reencoded, after_version);
}

#[test]
fn test_recorded_merkleblocks_verify() {
    let messages = decode_all(&blocks());
    let expected = [GENESIS_HASH, BLOCK_1_HASH];
    assert_eq!(messages.len(), expected.len());

    for (message, hash) in messages.iter().zip(expected) {
        let Message::MerkleBlock(merkleblock) = message else {
            panic!("expected merkleblock, got {:?}", message);
        };
        assert_eq!(to_display_hex(&block_hash(&merkleblock.header)), hash);

        let proof = extract_matches(merkleblock.total_transactions, &merkleblock.hashes, &merkleblock.flags).unwrap();
        assert_eq!(proof.root, merkleblock.header.merkle_root);
        assert!(proof.matched.is_empty());
    }
}

#[test]
fn test_stream_split_at_every_offset() {
    let stream = handshakes_and_blocks();
    let expected = decode_all(&stream);
    let magic = Network::Testnet.magic();

    for split in 0..stream.len() {
        let mut buffer = stream[..split].to_vec();
        let mut decoded = Vec::new();
        while let Some((message, used)) = decode_frame(magic, &buffer).unwrap() {
            decoded.push(message);
            buffer.drain(..used);
        }
        buffer.extend_from_slice(&stream[split..]);
        while let Some((message, used)) = decode_frame(magic, &buffer).unwrap() {
            decoded.push(message);
            buffer.drain(..used);
        }
        assert_eq!(decoded, expected, "split at {}", split);
        assert!(buffer.is_empty());
    }
}

#[test]
fn test_corrupted_payload_fails_checksum() {
    let mut stream = handshakes();
    // inside the version payload's user agent
    stream[24 + 90] ^= 0x20;
    assert!(matches!(
        decode_frame(Network::Testnet.magic(), &stream),
        Err(WalletError::InvalidFrame(_))
    ));
}

#[test]
fn test_base58_known_vectors() {
    let vectors = [
        ("", ""),
        ("61", "2g"),
        ("626262", "a3gV"),
        ("636363", "aPEr"),
        ("572e4794", "3EFU7m"),
        ("10c8511e", "Rt5zm"),
        ("516b6fcd0f", "ABnLTmg"),
        ("bf4f89001e670274dd", "3SEo3LWLoPntC"),
        ("ecac89cad93923c02321", "EJDM8drfXA6uyA"),
        ("00000000000000000000", "1111111111"),
        (
            "000111d38e5fc9071ffcd20b4a763cc9ae4f252bb4e48fd66a835e252ada93ff480d6dd43dc62a641155a5",
            "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz",
        ),
    ];
    for (bytes, text) in vectors {
        let bytes = hex::decode(bytes).unwrap();
        assert_eq!(base58::encode(&bytes), text);
        assert_eq!(base58::decode(text).unwrap(), bytes);
    }
}

#[test]
fn test_base58_check_address() {
    let burn = "1111111111111111111114oLvT2";
    assert_eq!(base58::encode_check(0x00, &[0; 20]), burn);
    assert_eq!(base58::decode_check(burn).unwrap(), (0x00, vec![0; 20]));

    let payload = [0x5au8; 20];
    let ours = base58::encode_check(0x6f, &payload);
    assert!(ours.starts_with('m') || ours.starts_with('n'));
    assert_eq!(base58::decode_check(&ours).unwrap(), (0x6f, payload.to_vec()));
}

#[test]
fn test_base58_rejects_foreign_characters() {
    for bad in ["0", "O", "I", "l", "abc!"] {
        assert!(matches!(base58::decode(bad), Err(WalletError::InvalidCharacter(_))), "{}", bad);
    }
}

#[test]
fn test_filterload_frame_round_trips() {
    let mut filter = BloomFilter::new(2, 0.0001, 0xdead_beef, BLOOM_UPDATE_ALL);
    filter.insert(&[0x11; 20]);
    filter.insert(&[0x22; 33]);
    let bytes = frame(&Message::FilterLoad(filter.clone()));

    let (decoded, used) = decode_frame(Network::Testnet.magic(), &bytes).unwrap().unwrap();
    assert_eq!(used, bytes.len());
    match decoded {
        Message::FilterLoad(loaded) => {
            assert!(loaded.contains(&[0x11; 20]));
            assert!(loaded.contains(&[0x22; 33]));
            assert_eq!(loaded, filter);
        }
        other => panic!("expected filterload, got {:?}", other),
    }
}

#[test]
fn test_filterload_outside_bloom_limits_is_malformed() {
    // empty bitfield, one hash function
    let empty = [0u8, 1, 0, 0, 0, 0, 0, 0, 0, 0];
    assert!(matches!(
        Message::decode("filterload", &empty),
        Err(WalletError::MalformedMessage(_))
    ));

    // one byte of bits, 51 hash functions
    let mut greedy = vec![1u8, 0xff];
    greedy.extend_from_slice(&(MAX_HASH_FUNCS + 1).to_le_bytes());
    greedy.extend_from_slice(&[0, 0, 0, 0, BLOOM_UPDATE_NONE]);
    assert!(matches!(
        Message::decode("filterload", &greedy),
        Err(WalletError::MalformedMessage(_))
    ));

    // oversized bitfield
    let mut oversized = vec![0xfd];
    oversized.extend_from_slice(&((MAX_BLOOM_FILTER_SIZE + 1) as u16).to_le_bytes());
    oversized.extend(std::iter::repeat(0u8).take(MAX_BLOOM_FILTER_SIZE + 1));
    oversized.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, BLOOM_UPDATE_NONE]);
    assert!(matches!(
        Message::decode("filterload", &oversized),
        Err(WalletError::MalformedMessage(_))
    ));
}
