// Error types for the ledger engine

use crate::consensus::ValidationError;
use crate::core::{CodecError, Hash256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Block or transaction lookup miss
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient funds: have {available}, need {requested}")]
    InsufficientFunds { available: u64, requested: u64 },

    /// Summing output values exceeded the value range
    #[error("value overflow: {0}")]
    ValueOverflow(String),

    /// A mined block was stored but a competing block holds the tip
    #[error("mined block {0} was superseded and is not on the active chain")]
    Superseded(Hash256),

    #[error("signature verification failed for transaction {0}")]
    VerificationFailed(Hash256),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Undecodable persisted record or failed storage transaction.
    /// The ledger refuses further writes until a reindex succeeds.
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    #[error("cannot seal a block without transactions")]
    EmptyBlock,

    #[error("invalid block: {0}")]
    InvalidBlock(#[from] ValidationError),

    #[error("mining cancelled")]
    Cancelled,

    #[error("mining worker failed: {0}")]
    Worker(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// Only store corruption requires administrator intervention
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::CorruptStore(_))
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::CorruptStore(format!("storage failure: {}", err))
    }
}

impl From<CodecError> for LedgerError {
    fn from(err: CodecError) -> Self {
        LedgerError::CorruptStore(format!("undecodable record: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
