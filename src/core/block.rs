// Block data structures

use crate::core::{Hash256, Transaction, Serializable, CodecError, merkle_root};
use crate::core::serialize::{write_varint, read_length, read_array};
use crate::consensus::{CancelToken, ProofOfWork};
use crate::error::{LedgerError, Result};
use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

/// A sealed block. Immutable once mined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Unix timestamp (seconds) at creation
    pub timestamp: i64,
    /// Sealing hash found by proof-of-work
    pub hash: Hash256,
    pub transactions: Vec<Transaction>,
    /// Zero for the genesis block
    pub prev_hash: Hash256,
    pub nonce: u64,
    pub height: u64,
}

impl Block {
    /// Seal a new block on top of `prev_hash`
    pub fn create(
        transactions: Vec<Transaction>,
        prev_hash: Hash256,
        height: u64,
        pow: &ProofOfWork,
    ) -> Result<Self> {
        Self::create_cancellable(transactions, prev_hash, height, pow, &CancelToken::new())
    }

    /// Seal a new block, giving up with `Cancelled` once `cancel` fires
    pub fn create_cancellable(
        transactions: Vec<Transaction>,
        prev_hash: Hash256,
        height: u64,
        pow: &ProofOfWork,
        cancel: &CancelToken,
    ) -> Result<Self> {
        if transactions.is_empty() {
            return Err(LedgerError::EmptyBlock);
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let mut block = Self {
            timestamp,
            hash: Hash256::zero(),
            transactions,
            prev_hash,
            nonce: 0,
            height,
        };

        let result = pow.run(&block, cancel).ok_or(LedgerError::Cancelled)?;
        log::debug!(
            "Sealed block at height {} after {} attempts ({:.1} H/s)",
            height,
            result.attempts,
            result.hash_rate()
        );

        block.nonce = result.nonce;
        block.hash = result.hash;
        Ok(block)
    }

    /// The genesis block holds only the given coinbase transaction
    pub fn genesis(coinbase: Transaction, pow: &ProofOfWork) -> Result<Self> {
        Self::create(vec![coinbase], Hash256::zero(), 0, pow)
    }

    /// Merkle root over the canonical encodings of the transactions
    pub fn hash_transactions(&self) -> Hash256 {
        let encoded: Vec<Vec<u8>> = self.transactions.iter().map(|tx| tx.serialize()).collect();
        merkle_root(&encoded).unwrap_or_default()
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_zero()
    }
}

impl Serializable for Block {
    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());

        write_varint(buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.write_to(buf);
        }
    }

    fn read_from(reader: &mut Cursor<&[u8]>) -> std::result::Result<Self, CodecError> {
        let timestamp = i64::from_le_bytes(read_array(reader)?);
        let hash = Hash256::new(read_array(reader)?);
        let prev_hash = Hash256::new(read_array(reader)?);
        let nonce = u64::from_le_bytes(read_array(reader)?);
        let height = u64::from_le_bytes(read_array(reader)?);

        let tx_count = read_length(reader)?;
        let mut transactions = Vec::with_capacity(tx_count);
        for _ in 0..tx_count {
            transactions.push(Transaction::read_from(reader)?);
        }

        Ok(Self {
            timestamp,
            hash,
            transactions,
            prev_hash,
            nonce,
            height,
        })
    }
}
