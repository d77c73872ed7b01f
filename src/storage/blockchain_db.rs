// Chain store: blocks keyed by hash plus the tip pointer, in sled

use crate::core::{Block, Hash256, ReferencedTxs, Serializable, Transaction};
use crate::error::{LedgerError, Result};
use crate::storage::abort;
use sled::transaction::TransactionResult;
use sled::Db;

/// Singleton key holding the tip block's hash
const TIP_KEY: &[u8] = b"lh";

/// Append-only block store. Blocks are reachable only by hash and
/// through the backward `prev_hash` links.
#[derive(Clone)]
pub struct BlockchainDB {
    db: Db,
}

impl BlockchainDB {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Store a block and advance the tip if it is strictly higher than the
    /// current tip. Storing a known hash is a no-op.
    /// Returns whether the tip moved to this block.
    pub fn add_block(&self, block: &Block) -> Result<bool> {
        let key = Self::block_key(&block.hash);
        let encoded = block.serialize();

        let result: TransactionResult<bool, LedgerError> = self.db.transaction(|tx_db| {
            if tx_db.get(key.as_slice())?.is_some() {
                return Ok(false);
            }

            tx_db.insert(key.as_slice(), encoded.as_slice())?;

            let advance = match tx_db.get(TIP_KEY)? {
                None => true,
                Some(tip) => {
                    let tip_hash = Hash256::from_slice(&tip)
                        .map_err(|e| abort(LedgerError::CorruptStore(e)))?;
                    let tip_bytes = tx_db
                        .get(Self::block_key(&tip_hash).as_slice())?
                        .ok_or_else(|| {
                            abort(LedgerError::CorruptStore(format!("tip block {} missing", tip_hash)))
                        })?;
                    let tip_block = Block::deserialize(&tip_bytes).map_err(|e| abort(e.into()))?;
                    block.height > tip_block.height
                }
            };

            if advance {
                tx_db.insert(TIP_KEY, block.hash.as_bytes().as_slice())?;
            }
            Ok(advance)
        });

        let advanced = result.map_err(crate::storage::from_tx_error)?;
        if advanced {
            log::info!("New tip {} at height {}", block.hash, block.height);
        } else {
            log::debug!("Block {} stored without moving the tip", block.hash);
        }
        Ok(advanced)
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        match self.db.get(Self::block_key(hash))? {
            Some(data) => Ok(Block::deserialize(&data)?),
            None => Err(LedgerError::NotFound(format!("block {}", hash))),
        }
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.db.contains_key(Self::block_key(hash))?)
    }

    /// Get the chain tip (best block hash)
    pub fn get_tip(&self) -> Result<Option<Hash256>> {
        match self.db.get(TIP_KEY)? {
            Some(data) => Hash256::from_slice(&data)
                .map(Some)
                .map_err(LedgerError::CorruptStore),
            None => Ok(None),
        }
    }

    /// Tip hash, `NotFound` when no chain exists yet
    pub fn tip(&self) -> Result<Hash256> {
        self.get_tip()?
            .ok_or_else(|| LedgerError::NotFound("no existing blockchain".to_string()))
    }

    /// Height of the tip block
    pub fn get_best_height(&self) -> Result<u64> {
        Ok(self.get_block(&self.tip()?)?.height)
    }

    /// Hashes from tip to genesis
    pub fn get_block_hashes(&self) -> Result<Vec<Hash256>> {
        self.iter()?.map(|block| block.map(|b| b.hash)).collect()
    }

    /// Fresh iterator from the current tip back to genesis
    pub fn iter(&self) -> Result<ChainIterator> {
        Ok(ChainIterator {
            chain: self.clone(),
            next: self.get_tip()?,
        })
    }

    /// Scan the chain for a transaction
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        for block in self.iter()? {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(LedgerError::NotFound(format!("transaction {}", id)))
    }

    /// Transactions referenced by the inputs of `tx`
    pub fn referenced_transactions(&self, tx: &Transaction) -> Result<ReferencedTxs> {
        let mut prev_txs = ReferencedTxs::new();
        if tx.is_coinbase() {
            return Ok(prev_txs);
        }
        for input in &tx.inputs {
            if !prev_txs.contains_key(&input.txid) {
                let prev = self.find_transaction(&input.txid)?;
                prev_txs.insert(prev.id, prev);
            }
        }
        Ok(prev_txs)
    }

    // Helper: create key for block storage
    fn block_key(hash: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'b'); // 'b' for block
        key.extend_from_slice(hash.as_bytes());
        key
    }
}

/// Walks `prev_hash` links from a starting block to genesis,
/// holding one block at a time
pub struct ChainIterator {
    chain: BlockchainDB,
    next: Option<Hash256>,
}

impl Iterator for ChainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match self.chain.get_block(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.next = Some(block.prev_hash);
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
