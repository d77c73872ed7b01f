//! Ledger context: owns the chain store, the UTXO index and the
//! proof-of-work engine, and serializes every write to the
//! `{tip pointer, UTXO index}` pair through a single writer guard.
//!
//! Reads (lookups, balances, transaction building) go straight to the
//! store and rely on its per-operation snapshots. Writes take the guard,
//! so a mining worker and an inbound block handler never interleave an
//! `add_block` with another block's index update.

use crate::config::LedgerConfig;
use crate::consensus::{BlockValidator, CancelToken, ProofOfWork, ValidationError};
use crate::core::{Block, Hash256, Transaction};
use crate::error::{LedgerError, Result};
use crate::storage::{BlockchainDB, OutPoint, Storage, UtxoSet};
use crate::wallet::{KeyPair, TransactionBuilder};
use secp256k1::SecretKey;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Coinbase payload of the genesis block
pub const GENESIS_DATA: &[u8] = b"First Transaction from Genesis";

#[derive(Default)]
struct WriterState {
    /// Set when a write hit store corruption; cleared by a successful reindex.
    /// Mirrored by a marker in the store so a restart stays halted.
    halted: bool,
}

pub struct Ledger {
    storage: Storage,
    pow: ProofOfWork,
    validator: BlockValidator,
    block_reward: u64,
    writer: Mutex<WriterState>,
}

impl Ledger {
    pub fn with_storage(storage: Storage, config: &LedgerConfig) -> Result<Self> {
        config.validate()?;
        let pow = ProofOfWork::new(config.difficulty)?;
        Ok(Self {
            storage,
            validator: BlockValidator::new(pow.clone(), config.block_reward),
            pow,
            block_reward: config.block_reward,
            writer: Mutex::new(WriterState::default()),
        })
    }

    /// Create a new chain whose genesis coinbase pays `genesis_to`
    pub fn init(config: &LedgerConfig, genesis_to: &[u8]) -> Result<Self> {
        let ledger = Self::with_storage(Storage::new(config.db_path())?, config)?;
        ledger.create_genesis(genesis_to)?;
        Ok(ledger)
    }

    /// Open an existing chain
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let ledger = Self::with_storage(Storage::new(config.db_path())?, config)?;
        ledger.chain().tip()?;
        if let Some(reason) = ledger.storage.halted_reason()? {
            log::warn!("Ledger writes are halted ({}); run a reindex", reason);
        }
        Ok(ledger)
    }

    /// Mine and store the genesis block, then build the index from it
    pub fn create_genesis(&self, genesis_to: &[u8]) -> Result<Block> {
        let mut state = self.lock_writer();
        self.ensure_writable(&state)?;

        if self.chain().get_tip()?.is_some() {
            return Err(LedgerError::Config("blockchain already exists".to_string()));
        }

        let coinbase = Transaction::coinbase(genesis_to, GENESIS_DATA.to_vec(), self.block_reward);
        let genesis = Block::genesis(coinbase, &self.pow)?;

        let result = self
            .chain()
            .add_block(&genesis)
            .and_then(|_| self.utxo_set().reindex(self.chain()));
        self.halt_on_fatal(&mut state, result)?;

        log::info!("Genesis block {} created", genesis.hash);
        Ok(genesis)
    }

    pub fn chain(&self) -> &BlockchainDB {
        &self.storage.blockchain
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.storage.utxo_set
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    pub fn get_best_height(&self) -> Result<u64> {
        self.chain().get_best_height()
    }

    /// Whether writes are refused until a reindex; an unreadable marker counts as halted
    pub fn is_halted(&self) -> bool {
        self.lock_writer().halted || !matches!(self.storage.halted_reason(), Ok(None))
    }

    /// Sign `tx` with `secret_key` against the outputs it spends
    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        let prev_txs = self.chain().referenced_transactions(tx)?;
        tx.sign(secret_key, &prev_txs)
    }

    /// Verify `tx` against the chain; spending an unknown transaction fails verification
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        let prev_txs = match self.chain().referenced_transactions(tx) {
            Ok(prev_txs) => prev_txs,
            Err(LedgerError::NotFound(what)) => {
                log::warn!("Transaction {} references missing {}", tx.id, what);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        Ok(tx.verify(&prev_txs))
    }

    /// Build and sign a payment from the UTXO index
    pub fn new_transaction(&self, sender: &KeyPair, recipient: &[u8], amount: u64) -> Result<Transaction> {
        TransactionBuilder::new(self.chain(), self.utxo_set()).build(sender, recipient, amount)
    }

    /// Mine `txs` on top of the current tip, paying the reward to `miner`
    pub fn mine_block(&self, txs: Vec<Transaction>, miner: &[u8]) -> Result<Block> {
        self.mine_block_cancellable(txs, miner, &CancelToken::new())
    }

    pub fn mine_block_cancellable(
        &self,
        txs: Vec<Transaction>,
        miner: &[u8],
        cancel: &CancelToken,
    ) -> Result<Block> {
        let (transactions, prev_hash, height) = self.candidate(txs, miner)?;
        let block = Block::create_cancellable(transactions, prev_hash, height, &self.pow, cancel)?;
        self.commit_mined(block)
    }

    /// Run the nonce search on a blocking worker. Must be called from
    /// within a tokio runtime.
    pub fn spawn_mining(self: &Arc<Self>, txs: Vec<Transaction>, miner: Vec<u8>) -> Result<MiningJob> {
        let (transactions, prev_hash, height) = self.candidate(txs, &miner)?;
        let cancel = CancelToken::new();

        let ledger = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || -> Result<Block> {
            let block = Block::create_cancellable(transactions, prev_hash, height, &ledger.pow, &token)?;
            ledger.commit_mined(block)
        });

        log::info!("Mining job started at height {}", height);
        Ok(MiningJob { height, cancel, handle })
    }

    /// Validate a block received from elsewhere and append it.
    /// Returns whether it became the new tip.
    pub fn accept_block(&self, block: &Block) -> Result<bool> {
        self.validator.validate_block(block)?;

        if !block.is_genesis() {
            let parent = match self.chain().get_block(&block.prev_hash) {
                Ok(parent) => parent,
                Err(LedgerError::NotFound(_)) => return Err(ValidationError::UnknownParent.into()),
                Err(e) => return Err(e),
            };
            self.validator.validate_height(block, &parent)?;
        }

        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            if !self.verify_transaction(tx)? {
                return Err(LedgerError::VerificationFailed(tx.id));
            }
        }

        self.commit_block(block)
    }

    /// `add_block` followed, if the tip moved, by the matching index
    /// maintenance, as one step under the writer guard
    pub fn commit_block(&self, block: &Block) -> Result<bool> {
        let mut state = self.lock_writer();
        self.ensure_writable(&state)?;

        let result = self.commit_locked(block);
        self.halt_on_fatal(&mut state, result)
    }

    /// Commit a block sealed here; `Superseded` if a competing block took the
    /// tip while the nonce search ran
    fn commit_mined(&self, block: Block) -> Result<Block> {
        if !self.commit_block(&block)? {
            log::warn!(
                "Mined block {} at height {} is not on the active chain",
                block.hash,
                block.height
            );
            return Err(LedgerError::Superseded(block.hash));
        }
        Ok(block)
    }

    fn commit_locked(&self, block: &Block) -> Result<bool> {
        let old_tip = self.chain().get_tip()?;
        let extends_tip = match old_tip {
            Some(tip) => block.prev_hash == tip,
            None => block.is_genesis(),
        };

        if extends_tip && !self.chain().has_block(&block.hash)? {
            self.check_spendable(&block.transactions)?;
        }

        if !self.chain().add_block(block)? {
            return Ok(false);
        }

        if extends_tip {
            self.utxo_set().update(block)?;
        } else {
            log::warn!(
                "Tip switched to block {} on another branch, rebuilding UTXO index",
                block.hash
            );
            self.utxo_set().reindex(self.chain())?;
        }
        Ok(true)
    }

    /// Rebuild the UTXO index from the chain; clears a halted state
    pub fn reindex(&self) -> Result<usize> {
        let mut state = self.lock_writer();
        let count = self.utxo_set().reindex(self.chain())?;
        let was_halted = self.storage.halted_reason()?.is_some();
        self.storage.clear_halted()?;
        if state.halted || was_halted {
            log::info!("Ledger writes resumed after reindex");
        }
        state.halted = false;
        Ok(count)
    }

    /// Verified transactions plus a coinbase, with the tip they extend
    fn candidate(&self, txs: Vec<Transaction>, miner: &[u8]) -> Result<(Vec<Transaction>, Hash256, u64)> {
        for tx in &txs {
            if tx.is_coinbase() || !self.verify_transaction(tx)? {
                log::warn!("Rejecting transaction {}", tx.id);
                return Err(LedgerError::VerificationFailed(tx.id));
            }
        }

        let tip = self.chain().tip()?;
        let height = self.chain().get_block(&tip)?.height + 1;

        let note = format!("Reward to {} at height {}", hex::encode(miner), height);
        let mut transactions = Vec::with_capacity(txs.len() + 1);
        transactions.push(Transaction::coinbase(miner, note.into_bytes(), self.block_reward));
        transactions.extend(txs);

        self.check_spendable(&transactions)?;
        Ok((transactions, tip, height))
    }

    /// Every input must claim an output that is unspent at the tip, or one
    /// created earlier in the same block, and no output may be claimed twice
    fn check_spendable(&self, txs: &[Transaction]) -> Result<()> {
        let mut claimed = HashSet::new();
        let mut created: HashMap<Hash256, usize> = HashMap::new();

        for tx in txs {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let vout = u32::try_from(input.vout)
                        .map_err(|_| LedgerError::VerificationFailed(tx.id))?;
                    let available = match created.get(&input.txid) {
                        Some(count) => (vout as usize) < *count,
                        None => self
                            .utxo_set()
                            .get(&input.txid)?
                            .is_some_and(|outs| outs.outputs.iter().any(|(i, _)| *i == vout)),
                    };

                    if !available || !claimed.insert(OutPoint::new(input.txid, vout)) {
                        log::warn!("Transaction {} spends unavailable output {}:{}", tx.id, input.txid, vout);
                        return Err(LedgerError::VerificationFailed(tx.id));
                    }
                }
            }
            created.insert(tx.id, tx.outputs.len());
        }
        Ok(())
    }

    fn lock_writer(&self) -> MutexGuard<'_, WriterState> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_writable(&self, state: &WriterState) -> Result<()> {
        if state.halted || self.storage.halted_reason()?.is_some() {
            return Err(LedgerError::CorruptStore(
                "ledger halted after store corruption; reindex required".to_string(),
            ));
        }
        Ok(())
    }

    fn halt_on_fatal<T>(&self, state: &mut WriterState, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                log::error!("Halting ledger writes: {}", e);
                state.halted = true;
                if let Err(marker) = self.storage.mark_halted(&e.to_string()) {
                    log::error!("Could not persist halted marker: {}", marker);
                }
            }
        }
        result
    }
}

/// A nonce search running on a blocking worker
pub struct MiningJob {
    height: u64,
    cancel: CancelToken,
    handle: JoinHandle<Result<Block>>,
}

impl MiningJob {
    /// Height of the block being mined
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that outlives `wait`, for cancelling from another task
    pub fn canceller(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Abort the search when a block at this height or above arrived from elsewhere
    pub fn cancel_if_superseded(&self, incoming_height: u64) -> bool {
        if incoming_height >= self.height {
            log::info!(
                "Block at height {} supersedes mining job at height {}",
                incoming_height,
                self.height
            );
            self.cancel();
            return true;
        }
        false
    }

    /// Wait for the worker; `Cancelled` if the search was aborted
    pub async fn wait(self) -> Result<Block> {
        self.handle
            .await
            .map_err(|e| LedgerError::Worker(e.to_string()))?
    }
}
