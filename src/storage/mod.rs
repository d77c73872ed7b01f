// Storage layer: chain store and UTXO index sharing one sled database

mod blockchain_db;
mod utxo_set;

pub use blockchain_db::{BlockchainDB, ChainIterator};
pub use utxo_set::{OutPoint, UtxoSet};

use crate::error::{LedgerError, Result};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Wait before the single retry of a locked store
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Open the store, retrying exactly once if its lock is held,
/// e.g. left behind by an unclean shutdown
pub fn open_db<P: AsRef<Path>>(path: P) -> Result<sled::Db> {
    let path = path.as_ref();
    match sled::open(path) {
        Ok(db) => Ok(db),
        Err(e) if is_lock_error(&e) => {
            log::warn!("Store at {} is locked ({}), retrying once", path.display(), e);
            thread::sleep(LOCK_RETRY_DELAY);
            sled::open(path).map_err(|e| {
                log::error!("Could not unlock store at {}: {}", path.display(), e);
                LedgerError::CorruptStore(format!("failed to open database: {}", e))
            })
        }
        Err(e) => Err(LedgerError::CorruptStore(format!("failed to open database: {}", e))),
    }
}

pub(crate) fn abort(err: LedgerError) -> ConflictableTransactionError<LedgerError> {
    ConflictableTransactionError::Abort(err)
}

pub(crate) fn from_tx_error(err: TransactionError<LedgerError>) -> LedgerError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    }
}

fn is_lock_error(err: &sled::Error) -> bool {
    match err {
        sled::Error::Io(io) => {
            io.kind() == std::io::ErrorKind::WouldBlock
                || io.to_string().to_lowercase().contains("lock")
        }
        _ => false,
    }
}

/// Marker present while ledger writes are halted; value is the reason
const HALTED_KEY: &[u8] = b"halted";

/// Storage manager - combines the chain store and the UTXO index
#[derive(Clone)]
pub struct Storage {
    pub blockchain: BlockchainDB,
    pub utxo_set: UtxoSet,
    db: sled::Db,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_db(open_db(path)?))
    }

    /// Create an in-memory storage (for testing)
    pub fn memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db))
    }

    /// Wrap an already opened store
    pub fn from_db(db: sled::Db) -> Self {
        Self {
            blockchain: BlockchainDB::new(db.clone()),
            utxo_set: UtxoSet::new(db.clone()),
            db,
        }
    }

    /// Persist the halted marker so it survives a restart
    pub fn mark_halted(&self, reason: &str) -> Result<()> {
        self.db.insert(HALTED_KEY, reason.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// Reason recorded by `mark_halted`, if writes are halted
    pub fn halted_reason(&self) -> Result<Option<String>> {
        Ok(self
            .db
            .get(HALTED_KEY)?
            .map(|reason| String::from_utf8_lossy(&reason).into_owned()))
    }

    pub fn clear_halted(&self) -> Result<()> {
        self.db.remove(HALTED_KEY)?;
        self.db.flush()?;
        Ok(())
    }
}
