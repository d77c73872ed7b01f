// Minimal UTXO ledger engine: chain store, UTXO index, transactions and proof-of-work

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod ledger;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use crate::cli::{Cli, CliHandler};
pub use crate::config::LedgerConfig;
pub use crate::consensus::{BlockValidator, CancelToken, ProofOfWork, ValidationError};
pub use crate::core::{Block, Hash256, Transaction, TxInput, TxOutput, TxOutputs};
pub use crate::error::{LedgerError, Result};
pub use crate::ledger::{Ledger, MiningJob};
pub use crate::storage::{BlockchainDB, OutPoint, Storage, UtxoSet};
pub use crate::wallet::{Address, KeyPair, Keystore};
