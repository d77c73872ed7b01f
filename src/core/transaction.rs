// Transaction data structures and the per-input signing protocol

use crate::core::{Hash256, hash160, sha256, Serializable, CodecError};
use crate::core::serialize::{write_varint, write_var_bytes, read_var_bytes, read_length, read_array};
use crate::error::{LedgerError, Result};
use secp256k1::{Secp256k1, SecretKey, PublicKey, Message, ecdsa::Signature};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;

/// Output index carried by the single input of a coinbase transaction
pub const COINBASE_OUTPUT_INDEX: i32 = -1;

/// Transactions referenced by the inputs of a transaction, keyed by id
pub type ReferencedTxs = HashMap<Hash256, Transaction>;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction holding the spent output
    pub txid: Hash256,
    /// Index of the output in that transaction, -1 for coinbase
    pub vout: i32,
    /// Compact `r || s` signature
    pub signature: Vec<u8>,
    /// Spender public key as `x || y`; arbitrary payload for coinbase
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `txid:vout`
    pub fn new(txid: Hash256, vout: i32, pub_key: Vec<u8>) -> Self {
        Self {
            txid,
            vout,
            signature: Vec::new(),
            pub_key,
        }
    }

    /// Create a coinbase input carrying an arbitrary payload
    pub fn coinbase(data: Vec<u8>) -> Self {
        Self {
            txid: Hash256::zero(),
            vout: COINBASE_OUTPUT_INDEX,
            signature: Vec::new(),
            pub_key: data,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.txid.is_zero() && self.vout == COINBASE_OUTPUT_INDEX
    }

    /// Whether this input's public key hashes to `locking_hash`
    pub fn uses_key(&self, locking_hash: &[u8]) -> bool {
        hash160(&self.pub_key).as_slice() == locking_hash
    }
}

impl Serializable for TxInput {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.txid.as_bytes());
        buf.extend_from_slice(&self.vout.to_le_bytes());
        write_var_bytes(buf, &self.signature);
        write_var_bytes(buf, &self.pub_key);
    }

    fn read_from(reader: &mut Cursor<&[u8]>) -> std::result::Result<Self, CodecError> {
        let txid = Hash256::new(read_array(reader)?);
        let vout = i32::from_le_bytes(read_array(reader)?);
        let signature = read_var_bytes(reader)?;
        let pub_key = read_var_bytes(reader)?;
        Ok(Self {
            txid,
            vout,
            signature,
            pub_key,
        })
    }
}

/// Transaction output - an amount locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    /// Locking hash: RIPEMD160(SHA256(public key))
    pub pub_key_hash: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, pub_key_hash: Vec<u8>) -> Self {
        Self {
            value,
            pub_key_hash,
        }
    }

    pub fn is_locked_with_key(&self, locking_hash: &[u8]) -> bool {
        self.pub_key_hash == locking_hash
    }
}

impl Serializable for TxOutput {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(buf, &self.pub_key_hash);
    }

    fn read_from(reader: &mut Cursor<&[u8]>) -> std::result::Result<Self, CodecError> {
        let value = u64::from_le_bytes(read_array(reader)?);
        let pub_key_hash = read_var_bytes(reader)?;
        Ok(Self {
            value,
            pub_key_hash,
        })
    }
}

/// The still-unspent outputs of one transaction, each kept with its
/// original output index so selections address the real output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxOutputs {
    pub outputs: Vec<(u32, TxOutput)>,
}

impl TxOutputs {
    /// All outputs of a freshly created transaction
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            outputs: tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, out)| (index as u32, out.clone()))
                .collect(),
        }
    }

    pub fn push(&mut self, index: u32, output: TxOutput) {
        self.outputs.push((index, output));
    }

    /// Drop the output with the given original index; returns whether it was present
    pub fn remove(&mut self, index: u32) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|(i, _)| *i != index);
        self.outputs.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl Serializable for TxOutputs {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.outputs.len() as u64);
        for (index, output) in &self.outputs {
            write_varint(buf, *index as u64);
            output.write_to(buf);
        }
    }

    fn read_from(reader: &mut Cursor<&[u8]>) -> std::result::Result<Self, CodecError> {
        let count = read_length(reader)?;
        let mut outputs = Vec::with_capacity(count);
        for _ in 0..count {
            let index = crate::core::read_varint(reader)? as u32;
            outputs.push((index, TxOutput::read_from(reader)?));
        }
        Ok(Self { outputs })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Hash of the transaction's encoding with this field cleared
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a transaction and compute its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Create a coinbase transaction paying `reward` to `locking_hash`
    pub fn coinbase(locking_hash: &[u8], data: Vec<u8>, reward: u64) -> Self {
        Self::new(
            vec![TxInput::coinbase(data)],
            vec![TxOutput::new(reward, locking_hash.to_vec())],
        )
    }

    /// Exactly one input with an empty reference and index -1
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// H(encode(tx with id cleared))
    pub fn hash(&self) -> Hash256 {
        let mut copy = self.clone();
        copy.id = Hash256::zero();
        sha256(&copy.serialize())
    }

    /// Sum of output values, `None` on overflow
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.value))
    }

    /// Copy with every input's signature and public key cleared
    pub fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: self.id,
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput::new(input.txid, input.vout, Vec::new()))
                .collect(),
            outputs: self.outputs.clone(),
        }
    }

    /// Sign every input against the output it spends. The id is
    /// recomputed afterwards so that it commits to the signatures.
    pub fn sign(&mut self, secret_key: &SecretKey, prev_txs: &ReferencedTxs) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let secp = Secp256k1::signing_only();
        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let locking_hash = referenced_output(&self.inputs[index], prev_txs)
                .ok_or_else(|| {
                    LedgerError::NotFound(format!(
                        "output {}:{} referenced by transaction {}",
                        self.inputs[index].txid, self.inputs[index].vout, self.id
                    ))
                })?
                .pub_key_hash
                .clone();

            let digest = signing_digest(&mut trimmed, index, &locking_hash);
            let message = Message::from_digest(digest.0);
            let signature = secp.sign_ecdsa(&message, secret_key);
            self.inputs[index].signature = signature.serialize_compact().to_vec();
        }

        self.id = self.hash();
        Ok(())
    }

    /// Check every input's signature; coinbase transactions always verify.
    /// Input and output totals are not compared.
    pub fn verify(&self, prev_txs: &ReferencedTxs) -> bool {
        if self.is_coinbase() {
            return true;
        }

        let secp = Secp256k1::verification_only();
        let mut trimmed = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let Some(prev_output) = referenced_output(input, prev_txs) else {
                log::warn!("Transaction {} spends unknown output {}:{}", self.id, input.txid, input.vout);
                return false;
            };

            if !input.uses_key(&prev_output.pub_key_hash) {
                return false;
            }

            let digest = signing_digest(&mut trimmed, index, &prev_output.pub_key_hash);
            let message = Message::from_digest(digest.0);

            let (Some(signature), Some(public_key)) = (
                decode_signature(&input.signature),
                decode_public_key(&input.pub_key),
            ) else {
                return false;
            };

            if secp.verify_ecdsa(&message, &signature, &public_key).is_err() {
                return false;
            }
        }

        true
    }
}

/// Temporarily place the referenced locking hash in the signed input and hash the copy
fn signing_digest(trimmed: &mut Transaction, index: usize, locking_hash: &[u8]) -> Hash256 {
    trimmed.inputs[index].pub_key = locking_hash.to_vec();
    let digest = trimmed.hash();
    trimmed.inputs[index].pub_key.clear();
    digest
}

fn referenced_output<'a>(input: &TxInput, prev_txs: &'a ReferencedTxs) -> Option<&'a TxOutput> {
    let index = usize::try_from(input.vout).ok()?;
    prev_txs.get(&input.txid)?.outputs.get(index)
}

/// Public key as the fixed-width `x || y` pair (32 bytes each)
pub fn encode_public_key(public_key: &PublicKey) -> Vec<u8> {
    public_key.serialize_uncompressed()[1..].to_vec()
}

/// Rebuild a public key from `x || y`; both halves must be exactly 32 bytes
pub fn decode_public_key(bytes: &[u8]) -> Option<PublicKey> {
    if bytes.len() != 64 {
        return None;
    }
    let mut uncompressed = [0u8; 65];
    uncompressed[0] = 0x04;
    uncompressed[1..].copy_from_slice(bytes);
    PublicKey::from_slice(&uncompressed).ok()
}

/// Split a stored `r || s` signature; both halves must be exactly 32 bytes
fn decode_signature(bytes: &[u8]) -> Option<Signature> {
    if bytes.len() != 64 {
        return None;
    }
    Signature::from_compact(bytes).ok()
}

impl Serializable for Transaction {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.id.as_bytes());

        write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(buf);
        }

        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(buf);
        }
    }

    fn read_from(reader: &mut Cursor<&[u8]>) -> std::result::Result<Self, CodecError> {
        let id = Hash256::new(read_array(reader)?);

        let input_count = read_length(reader)?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(reader)?);
        }

        let output_count = read_length(reader)?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(reader)?);
        }

        Ok(Self {
            id,
            inputs,
            outputs,
        })
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {}:", i)?;
            writeln!(f, "       TXID:      {}", input.txid)?;
            writeln!(f, "       Out:       {}", input.vout)?;
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.pub_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {}:", i)?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", hex::encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    struct Key {
        secret: SecretKey,
        pub_key: Vec<u8>,
        locking_hash: Vec<u8>,
    }

    fn key() -> Key {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut OsRng);
        let pub_key = encode_public_key(&public);
        let locking_hash = hash160(&pub_key).to_vec();
        Key { secret, pub_key, locking_hash }
    }

    /// A funding coinbase for `owner` plus an unsigned spend of its output
    fn funded_spend(owner: &Key, to: &[u8]) -> (ReferencedTxs, Transaction) {
        let funding = Transaction::coinbase(&owner.locking_hash, b"reward".to_vec(), 100);
        let spend = Transaction::new(
            vec![TxInput::new(funding.id, 0, owner.pub_key.clone())],
            vec![
                TxOutput::new(40, to.to_vec()),
                TxOutput::new(60, owner.locking_hash.clone()),
            ],
        );
        let mut prev = ReferencedTxs::new();
        prev.insert(funding.id, funding);
        (prev, spend)
    }

    #[test]
    fn test_coinbase_input() {
        let input = TxInput::coinbase(vec![1, 2, 3]);
        assert!(input.is_coinbase());
        assert_eq!(input.txid, Hash256::zero());
        assert_eq!(input.vout, -1);
    }

    #[test]
    fn test_is_coinbase_requires_single_input() {
        let tx = Transaction::new(
            vec![TxInput::coinbase(vec![1]), TxInput::coinbase(vec![2])],
            vec![TxOutput::new(1, vec![9])],
        );
        assert!(!tx.is_coinbase());

        let tx = Transaction::new(
            vec![TxInput::new(Hash256::zero(), 0, vec![])],
            vec![TxOutput::new(1, vec![9])],
        );
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn test_coinbase_always_verifies() {
        let tx = Transaction::coinbase(&[7u8; 20], b"note".to_vec(), 100);
        assert!(tx.is_coinbase());
        assert!(tx.verify(&ReferencedTxs::new()));
    }

    #[test]
    fn test_transaction_serialization() {
        let owner = key();
        let (prev, mut tx) = funded_spend(&owner, &[1u8; 20]);
        tx.sign(&owner.secret, &prev).unwrap();

        let decoded = Transaction::deserialize(&tx.serialize()).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn test_outputs_keep_original_indices() {
        let tx = Transaction::coinbase(&[1u8; 20], vec![], 5);
        let mut outs = TxOutputs::from_transaction(&tx);
        outs.push(3, TxOutput::new(9, vec![2u8; 20]));
        assert!(outs.remove(0));
        assert!(!outs.remove(0));

        let decoded = TxOutputs::deserialize(&outs.serialize()).unwrap();
        assert_eq!(decoded.outputs, vec![(3, TxOutput::new(9, vec![2u8; 20]))]);
    }

    #[test]
    fn test_txid_ignores_id_field() {
        let mut tx = Transaction::coinbase(&[1u8; 20], b"x".to_vec(), 50);
        let id = tx.id;
        tx.id = Hash256::new([9u8; 32]);
        assert_eq!(tx.hash(), id);
    }

    #[test]
    fn test_sign_and_verify() {
        let owner = key();
        let (prev, mut tx) = funded_spend(&owner, &[1u8; 20]);
        tx.sign(&owner.secret, &prev).unwrap();

        assert_eq!(tx.inputs[0].signature.len(), 64);
        assert_eq!(tx.id, tx.hash());
        assert!(tx.verify(&prev));
    }

    #[test]
    fn test_sign_missing_reference_fails() {
        let owner = key();
        let (_, mut tx) = funded_spend(&owner, &[1u8; 20]);
        let result = tx.sign(&owner.secret, &ReferencedTxs::new());
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_tampering_breaks_verification() {
        let owner = key();
        let (prev, mut tx) = funded_spend(&owner, &[1u8; 20]);
        tx.sign(&owner.secret, &prev).unwrap();

        let mut bad_sig = tx.clone();
        bad_sig.inputs[0].signature[10] ^= 0x01;
        assert!(!bad_sig.verify(&prev));

        let mut bad_value = tx.clone();
        bad_value.outputs[0].value = 41;
        assert!(!bad_value.verify(&prev));

        let mut bad_lock = tx.clone();
        bad_lock.outputs[0].pub_key_hash = vec![2u8; 20];
        assert!(!bad_lock.verify(&prev));

        let mut bad_ref = tx.clone();
        bad_ref.inputs[0].vout = 1;
        assert!(!bad_ref.verify(&prev));
    }

    #[test]
    fn test_foreign_key_cannot_spend() {
        let owner = key();
        let thief = key();
        let (prev, mut tx) = funded_spend(&owner, &thief.locking_hash);
        tx.inputs[0].pub_key = thief.pub_key.clone();
        tx.sign(&thief.secret, &prev).unwrap();
        assert!(!tx.verify(&prev));
    }

    #[test]
    fn test_malformed_key_lengths_rejected() {
        assert!(decode_public_key(&[4u8; 63]).is_none());
        assert!(decode_signature(&[1u8; 70]).is_none());
    }
}
