// UTXO (Unspent Transaction Output) index derived from the chain

use crate::core::{Block, Hash256, Serializable, TxOutput, TxOutputs};
use crate::error::{LedgerError, Result};
use crate::storage::{BlockchainDB, abort, from_tx_error};
use sled::transaction::TransactionResult;
use sled::Db;
use std::collections::{HashMap, HashSet};

/// Key prefix separating UTXO entries from block records
const UTXO_PREFIX: &[u8] = b"utxo-";

/// UTXO identifier - transaction hash + output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// Index from transaction id to that transaction's unspent outputs.
/// A cache fully determined by the chain; `reindex` rebuilds it.
#[derive(Clone)]
pub struct UtxoSet {
    db: Db,
}

impl UtxoSet {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Replace the whole index with the unspent outputs found by replaying
    /// the chain from tip to genesis. Returns the number of entries.
    pub fn reindex(&self, chain: &BlockchainDB) -> Result<usize> {
        log::info!("Reindexing UTXO set");

        let mut unspent: HashMap<Hash256, TxOutputs> = HashMap::new();
        let mut spent: HashMap<Hash256, HashSet<u32>> = HashMap::new();

        for block in chain.iter()? {
            let block = block?;

            // Inputs first: an output spent later in the same block is not unspent
            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                for input in &tx.inputs {
                    if let Ok(vout) = u32::try_from(input.vout) {
                        spent.entry(input.txid).or_default().insert(vout);
                    }
                }
            }

            for tx in &block.transactions {
                let spent_outs = spent.get(&tx.id);
                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = index as u32;
                    if spent_outs.is_some_and(|s| s.contains(&index)) {
                        continue;
                    }
                    unspent.entry(tx.id).or_default().push(index, output.clone());
                }
            }
        }

        let mut batch = sled::Batch::default();
        for key in self.db.scan_prefix(UTXO_PREFIX).keys() {
            batch.remove(key?);
        }
        for (txid, outs) in &unspent {
            batch.insert(Self::utxo_key(txid), outs.serialize());
        }
        self.db.apply_batch(batch)?;

        log::info!("UTXO set reindexed: {} transactions", unspent.len());
        Ok(unspent.len())
    }

    /// Apply one newly appended tip block: drop the outputs its inputs spend,
    /// then add every output it creates. Must run exactly once per block that
    /// advanced the tip.
    pub fn update(&self, block: &Block) -> Result<()> {
        let result: TransactionResult<(), LedgerError> = self.db.transaction(|tx_db| {
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        let key = Self::utxo_key(&input.txid);
                        let stale = || {
                            abort(LedgerError::CorruptStore(format!(
                                "UTXO index has no unspent output {}:{}; reindex required",
                                input.txid, input.vout
                            )))
                        };

                        let data = tx_db.get(key.as_slice())?.ok_or_else(stale)?;
                        let mut outs = TxOutputs::deserialize(&data).map_err(|e| abort(e.into()))?;
                        let vout = u32::try_from(input.vout).map_err(|_| stale())?;
                        if !outs.remove(vout) {
                            return Err(stale());
                        }

                        if outs.is_empty() {
                            tx_db.remove(key.as_slice())?;
                        } else {
                            tx_db.insert(key.as_slice(), outs.serialize())?;
                        }
                    }
                }

                let outs = TxOutputs::from_transaction(tx);
                tx_db.insert(Self::utxo_key(&tx.id), outs.serialize())?;
            }
            Ok(())
        });

        result.map_err(from_tx_error)?;
        log::debug!("UTXO set updated with block {}", block.hash);
        Ok(())
    }

    /// Greedily collect outputs locked to `locking_hash`, in storage order,
    /// until their total reaches `amount`.
    pub fn find_spendable_outputs(&self, locking_hash: &[u8], amount: u64) -> Result<(u64, Vec<OutPoint>)> {
        let mut accumulated = 0u64;
        let mut selected = Vec::new();

        'scan: for (txid, outs) in self.entries() {
            let (txid, outs) = (txid?, outs?);
            for (index, output) in outs.outputs {
                if accumulated >= amount {
                    break 'scan;
                }
                if output.is_locked_with_key(locking_hash) {
                    accumulated = accumulated.checked_add(output.value).ok_or_else(|| {
                        LedgerError::ValueOverflow(format!("spendable outputs of {}", hex::encode(locking_hash)))
                    })?;
                    selected.push(OutPoint::new(txid, index));
                }
            }
        }

        Ok((accumulated, selected))
    }

    /// Every unspent output locked to `locking_hash`
    pub fn find_unspent_outputs(&self, locking_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let mut found = Vec::new();
        for (_, outs) in self.entries() {
            found.extend(
                outs?
                    .outputs
                    .into_iter()
                    .map(|(_, output)| output)
                    .filter(|output| output.is_locked_with_key(locking_hash)),
            );
        }
        Ok(found)
    }

    /// Sum of unspent outputs locked to `locking_hash`
    pub fn get_balance(&self, locking_hash: &[u8]) -> Result<u64> {
        self.find_unspent_outputs(locking_hash)?
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.value))
            .ok_or_else(|| LedgerError::ValueOverflow(format!("balance of {}", hex::encode(locking_hash))))
    }

    /// Unspent outputs of one transaction, if any remain
    pub fn get(&self, txid: &Hash256) -> Result<Option<TxOutputs>> {
        match self.db.get(Self::utxo_key(txid))? {
            Some(data) => Ok(Some(TxOutputs::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> Result<usize> {
        let mut count = 0;
        for key in self.db.scan_prefix(UTXO_PREFIX).keys() {
            key?;
            count += 1;
        }
        Ok(count)
    }

    /// Decoded index entries in key order
    fn entries(&self) -> impl Iterator<Item = (Result<Hash256>, Result<TxOutputs>)> + '_ {
        self.db.scan_prefix(UTXO_PREFIX).map(|item| match item {
            Ok((key, value)) => (
                Hash256::from_slice(&key[UTXO_PREFIX.len()..]).map_err(LedgerError::CorruptStore),
                TxOutputs::deserialize(&value).map_err(LedgerError::from),
            ),
            Err(e) => (Err(e.into()), Err(LedgerError::CorruptStore("scan aborted".into()))),
        })
    }

    fn utxo_key(txid: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(UTXO_PREFIX.len() + 32);
        key.extend_from_slice(UTXO_PREFIX);
        key.extend_from_slice(txid.as_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ProofOfWork;
    use crate::core::{Transaction, TxInput};
    use crate::storage::Storage;

    const ALICE: [u8; 20] = [0xa1; 20];
    const BOB: [u8; 20] = [0xb0; 20];
    const MINER: [u8; 20] = [0xcc; 20];

    fn pow() -> ProofOfWork {
        ProofOfWork::new(8).unwrap()
    }

    /// Unsigned spend: the index does not check signatures
    fn spend(from: &Transaction, vout: i32, outputs: Vec<TxOutput>) -> Transaction {
        Transaction::new(vec![TxInput::new(from.id, vout, vec![])], outputs)
    }

    fn append(storage: &Storage, txs: Vec<Transaction>) -> Block {
        let tip = storage.blockchain.get_tip().unwrap();
        let block = match tip {
            Some(hash) => {
                let height = storage.blockchain.get_block(&hash).unwrap().height + 1;
                Block::create(txs, hash, height, &pow()).unwrap()
            }
            None => Block::create(txs, Hash256::zero(), 0, &pow()).unwrap(),
        };
        assert!(storage.blockchain.add_block(&block).unwrap());
        block
    }

    fn snapshot(utxo: &UtxoSet) -> Vec<(Hash256, TxOutputs)> {
        utxo.entries().map(|(k, v)| (k.unwrap(), v.unwrap())).collect()
    }

    #[test]
    fn test_reindex_genesis() {
        let storage = Storage::memory().unwrap();
        let coinbase = Transaction::coinbase(&ALICE, b"genesis".to_vec(), 100);
        append(&storage, vec![coinbase]);

        assert_eq!(storage.utxo_set.reindex(&storage.blockchain).unwrap(), 1);
        assert_eq!(storage.utxo_set.count_transactions().unwrap(), 1);
        let outs = storage.utxo_set.find_unspent_outputs(&ALICE).unwrap();
        assert_eq!(outs, vec![TxOutput::new(100, ALICE.to_vec())]);
    }

    #[test]
    fn test_reindex_excludes_spent_outputs() {
        let storage = Storage::memory().unwrap();
        let funding = Transaction::coinbase(&ALICE, b"genesis".to_vec(), 100);
        append(&storage, vec![funding.clone()]);
        let pay = spend(&funding, 0, vec![
            TxOutput::new(40, BOB.to_vec()),
            TxOutput::new(60, ALICE.to_vec()),
        ]);
        append(&storage, vec![Transaction::coinbase(&MINER, b"h1".to_vec(), 100), pay.clone()]);

        storage.utxo_set.reindex(&storage.blockchain).unwrap();

        assert!(storage.utxo_set.get(&funding.id).unwrap().is_none());
        assert_eq!(storage.utxo_set.get_balance(&ALICE).unwrap(), 60);
        assert_eq!(storage.utxo_set.get_balance(&BOB).unwrap(), 40);
        assert_eq!(storage.utxo_set.count_transactions().unwrap(), 2);
    }

    #[test]
    fn test_update_matches_reindex() {
        let storage = Storage::memory().unwrap();
        let funding = Transaction::coinbase(&ALICE, b"genesis".to_vec(), 100);
        append(&storage, vec![funding.clone()]);
        storage.utxo_set.reindex(&storage.blockchain).unwrap();

        let pay = spend(&funding, 0, vec![
            TxOutput::new(40, BOB.to_vec()),
            TxOutput::new(60, ALICE.to_vec()),
        ]);
        let block = append(&storage, vec![Transaction::coinbase(&MINER, b"h1".to_vec(), 100), pay.clone()]);
        storage.utxo_set.update(&block).unwrap();

        // Bob spends his output; Alice's change keeps its original index
        let bob_spend = spend(&pay, 0, vec![TxOutput::new(40, MINER.to_vec())]);
        let block = append(&storage, vec![Transaction::coinbase(&MINER, b"h2".to_vec(), 100), bob_spend]);
        storage.utxo_set.update(&block).unwrap();

        let incremental = snapshot(&storage.utxo_set);
        storage.utxo_set.reindex(&storage.blockchain).unwrap();
        assert_eq!(incremental, snapshot(&storage.utxo_set));

        let remaining = storage.utxo_set.get(&pay.id).unwrap().unwrap();
        assert_eq!(remaining.outputs, vec![(1, TxOutput::new(60, ALICE.to_vec()))]);
    }

    #[test]
    fn test_update_twice_is_detected() {
        let storage = Storage::memory().unwrap();
        let funding = Transaction::coinbase(&ALICE, b"genesis".to_vec(), 100);
        append(&storage, vec![funding.clone()]);
        storage.utxo_set.reindex(&storage.blockchain).unwrap();

        let pay = spend(&funding, 0, vec![TxOutput::new(100, BOB.to_vec())]);
        let block = append(&storage, vec![pay]);
        storage.utxo_set.update(&block).unwrap();

        let err = storage.utxo_set.update(&block).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_find_spendable_outputs_stops_early() {
        let storage = Storage::memory().unwrap();
        let a = Transaction::coinbase(&ALICE, b"a".to_vec(), 30);
        let b = Transaction::coinbase(&ALICE, b"b".to_vec(), 30);
        let c = Transaction::coinbase(&ALICE, b"c".to_vec(), 30);
        let other = Transaction::coinbase(&BOB, b"d".to_vec(), 500);
        append(&storage, vec![a, b, c, other]);
        storage.utxo_set.reindex(&storage.blockchain).unwrap();

        let (accumulated, selected) = storage.utxo_set.find_spendable_outputs(&ALICE, 50).unwrap();
        assert_eq!(accumulated, 60);
        assert_eq!(selected.len(), 2);

        let (accumulated, selected) = storage.utxo_set.find_spendable_outputs(&ALICE, 1000).unwrap();
        assert_eq!(accumulated, 90);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_reindex_replaces_stale_entries() {
        let storage = Storage::memory().unwrap();
        let funding = Transaction::coinbase(&ALICE, b"genesis".to_vec(), 100);
        append(&storage, vec![funding]);

        let bogus = Transaction::coinbase(&BOB, b"never mined".to_vec(), 7);
        let block = Block::create(vec![bogus], Hash256::zero(), 0, &pow()).unwrap();
        storage.utxo_set.update(&block).unwrap();
        assert_eq!(storage.utxo_set.count_transactions().unwrap(), 1);

        storage.utxo_set.reindex(&storage.blockchain).unwrap();
        assert_eq!(storage.utxo_set.get_balance(&BOB).unwrap(), 0);
        assert_eq!(storage.utxo_set.get_balance(&ALICE).unwrap(), 100);
    }

    #[test]
    fn test_oversized_values_report_overflow() {
        let storage = Storage::memory().unwrap();
        let small = Transaction::coinbase(&ALICE, b"a".to_vec(), 100);
        // no prefix of the three sums reaches u64::MAX before overflowing
        let half = Transaction::coinbase(&ALICE, b"b".to_vec(), 1 << 63);
        let other_half = Transaction::coinbase(&ALICE, b"c".to_vec(), 1 << 63);
        append(&storage, vec![small, half, other_half]);
        storage.utxo_set.reindex(&storage.blockchain).unwrap();

        let err = storage.utxo_set.get_balance(&ALICE).unwrap_err();
        assert!(matches!(err, LedgerError::ValueOverflow(_)));
        assert!(!err.is_fatal());

        let err = storage.utxo_set.find_spendable_outputs(&ALICE, u64::MAX).unwrap_err();
        assert!(matches!(err, LedgerError::ValueOverflow(_)));
        assert_eq!(storage.utxo_set.get_balance(&BOB).unwrap(), 0);
    }
}
