// Transaction builder

use crate::core::{Transaction, TxInput, TxOutput};
use crate::error::{LedgerError, Result};
use crate::storage::{BlockchainDB, UtxoSet};
use crate::wallet::KeyPair;

/// Builds signed payments from the UTXO index
pub struct TransactionBuilder<'a> {
    chain: &'a BlockchainDB,
    utxo_set: &'a UtxoSet,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(chain: &'a BlockchainDB, utxo_set: &'a UtxoSet) -> Self {
        Self { chain, utxo_set }
    }

    /// Pay `amount` from `sender` to the owner of `recipient`, returning any
    /// excess to the sender as change, and sign every input
    pub fn build(&self, sender: &KeyPair, recipient: &[u8], amount: u64) -> Result<Transaction> {
        let sender_hash = sender.locking_hash();
        let (accumulated, selected) = self.utxo_set.find_spendable_outputs(&sender_hash, amount)?;

        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                available: accumulated,
                requested: amount,
            });
        }

        let pub_key = sender.public_key_bytes();
        let inputs = selected
            .iter()
            .map(|outpoint| {
                let vout = i32::try_from(outpoint.vout).map_err(|_| {
                    LedgerError::CorruptStore(format!("output index {} out of range", outpoint.vout))
                })?;
                Ok(TxInput::new(outpoint.txid, vout, pub_key.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut outputs = vec![TxOutput::new(amount, recipient.to_vec())];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, sender_hash));
        }

        let mut tx = Transaction::new(inputs, outputs);
        let prev_txs = self.chain.referenced_transactions(&tx)?;
        tx.sign(&sender.secret_key, &prev_txs)?;

        log::debug!(
            "Built transaction {} spending {} outputs ({} of {})",
            tx.id,
            tx.inputs.len(),
            amount,
            accumulated
        );
        Ok(tx)
    }
}
