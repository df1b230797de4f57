//! Transaction encoding, txids, P2PKH scripts and spend construction

use crate::constants::*;
use crate::encode::{encode_varint, write_var_bytes, ByteReader};
use crate::error::{Result, WalletError};
use crate::hash::double_sha256;
use crate::key::{KeyCapability, Keypair};
use crate::types::*;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_PUSHDATA1: u8 = 0x4c;

/// Smallest possible encoded input: outpoint, empty script, sequence
const MIN_INPUT_SIZE: usize = 32 + 4 + 1 + 4;
/// Smallest possible encoded output: value, empty script
const MIN_OUTPUT_SIZE: usize = 8 + 1;

/// Standard (non-witness) serialization
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut data = Vec::new();

    data.extend_from_slice(&tx.version.to_le_bytes());

    data.extend_from_slice(&encode_varint(tx.inputs.len() as u64));
    for input in &tx.inputs {
        data.extend_from_slice(&input.prevout.hash);
        data.extend_from_slice(&input.prevout.index.to_le_bytes());
        write_var_bytes(&mut data, &input.script_sig);
        data.extend_from_slice(&input.sequence.to_le_bytes());
    }

    data.extend_from_slice(&encode_varint(tx.outputs.len() as u64));
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        write_var_bytes(&mut data, &output.script_pubkey);
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());
    data
}

/// Read one transaction. Witness-serialized transactions (BIP144) are
/// accepted; their witness stacks are skipped since the txid excludes them.
pub fn deserialize_transaction(reader: &mut ByteReader<'_>) -> Result<Transaction> {
    let version = reader.read_i32()?;

    let mut input_count = reader.read_count(MIN_INPUT_SIZE)?;
    let mut has_witness = false;
    if input_count == 0 && reader.remaining() > 0 {
        // 0x00 marker followed by a non-zero flag byte
        let flag = reader.read_u8()?;
        if flag == 0 {
            return Err(WalletError::MalformedMessage("invalid witness flag".to_string()));
        }
        has_witness = true;
        input_count = reader.read_count(MIN_INPUT_SIZE)?;
    }

    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let hash = reader.read_hash()?;
        let index = reader.read_u32()?;
        let script_sig = reader.read_var_bytes()?.to_vec();
        let sequence = reader.read_u32()?;
        inputs.push(TransactionInput {
            prevout: OutPoint { hash, index },
            script_sig,
            sequence,
        });
    }

    let output_count = reader.read_count(MIN_OUTPUT_SIZE)?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let value = reader.read_i64()?;
        let script_pubkey = reader.read_var_bytes()?.to_vec();
        outputs.push(TransactionOutput { value, script_pubkey });
    }

    if has_witness {
        for _ in 0..inputs.len() {
            let items = reader.read_count(1)?;
            for _ in 0..items {
                reader.read_var_bytes()?;
            }
        }
    }

    let lock_time = reader.read_u32()?;

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

/// Transaction id in internal byte order
pub fn txid(tx: &Transaction) -> Hash {
    double_sha256(&serialize_transaction(tx))
}

/// OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
pub fn p2pkh_script(pubkey_hash: &PubkeyHash) -> ByteString {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// The pubkey hash paid by a P2PKH script, if it is one
pub fn extract_p2pkh(script: &[u8]) -> Option<PubkeyHash> {
    if script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        Some(hash)
    } else {
        None
    }
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    if data.len() < OP_PUSHDATA1 as usize {
        script.push(data.len() as u8);
    } else {
        script.push(OP_PUSHDATA1);
        script.push(data.len() as u8);
    }
    script.extend_from_slice(data);
}

/// Legacy SIGHASH_ALL digest for `input_index`, with `script_code` standing
/// in for that input's scriptSig and all other scriptSigs emptied.
pub fn signature_hash(tx: &Transaction, input_index: usize, script_code: &[u8]) -> Result<Hash> {
    if input_index >= tx.inputs.len() {
        return Err(WalletError::Key(format!(
            "input {} out of range for a transaction with {} inputs",
            input_index,
            tx.inputs.len()
        )));
    }

    let mut copy = tx.clone();
    for (i, input) in copy.inputs.iter_mut().enumerate() {
        input.script_sig = if i == input_index {
            script_code.to_vec()
        } else {
            Vec::new()
        };
    }

    let mut data = serialize_transaction(&copy);
    data.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
    Ok(double_sha256(&data))
}

/// Pick outputs, oldest first, until `target` is covered.
/// Returns the chosen outputs and their total, or None if funds are short.
pub fn select_coins(utxos: &[Utxo], target: u64) -> Option<(Vec<Utxo>, u64)> {
    let mut chosen = Vec::new();
    let mut total = 0u64;
    for utxo in utxos {
        if total >= target {
            break;
        }
        chosen.push(utxo.clone());
        total += utxo.value;
    }
    if total >= target {
        Some((chosen, total))
    } else {
        None
    }
}

/// Spend request handed to [`build_spend`]
pub struct SpendRequest<'a> {
    pub utxos: &'a [Utxo],
    pub destination: PubkeyHash,
    pub amount: u64,
    pub fee: u64,
    pub change: PubkeyHash,
}

/// Build and sign a P2PKH spend from outputs owned by `keypair`.
///
/// Change below one satoshi is not emitted; everything left over after
/// `amount` and `fee` goes back to `change`.
pub fn build_spend<K: KeyCapability + ?Sized>(
    request: &SpendRequest<'_>,
    keys: &K,
    keypair: &Keypair,
) -> Result<Transaction> {
    let needed = request
        .amount
        .checked_add(request.fee)
        .filter(|n| *n <= MAX_MONEY)
        .ok_or_else(|| WalletError::InvalidAmount(format!("{} + {}", request.amount, request.fee)))?;

    let available: u64 = request.utxos.iter().map(|u| u.value).sum();
    let (chosen, total) = select_coins(request.utxos, needed).ok_or(WalletError::InsufficientFunds {
        needed,
        available,
    })?;

    let mut tx = Transaction {
        version: 1,
        inputs: chosen
            .iter()
            .map(|utxo| TransactionInput {
                prevout: utxo.outpoint,
                script_sig: Vec::new(),
                sequence: SEQUENCE_FINAL,
            })
            .collect(),
        outputs: vec![TransactionOutput {
            value: request.amount as i64,
            script_pubkey: p2pkh_script(&request.destination),
        }],
        lock_time: 0,
    };

    let change = total - needed;
    if change > 0 {
        tx.outputs.push(TransactionOutput {
            value: change as i64,
            script_pubkey: p2pkh_script(&request.change),
        });
    }

    let mut script_sigs = Vec::with_capacity(chosen.len());
    for (index, utxo) in chosen.iter().enumerate() {
        let digest = signature_hash(&tx, index, &utxo.script_pubkey)?;
        let mut signature = keys.sign(keypair, &digest)?;
        signature.push(SIGHASH_ALL as u8);

        let mut script_sig = Vec::with_capacity(signature.len() + keypair.public.len() + 2);
        push_data(&mut script_sig, &signature);
        push_data(&mut script_sig, &keypair.public);
        script_sigs.push(script_sig);
    }
    for (input, script_sig) in tx.inputs.iter_mut().zip(script_sigs) {
        input.script_sig = script_sig;
    }

    Ok(tx)
}
