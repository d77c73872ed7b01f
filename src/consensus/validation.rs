// Context-free block validation

use crate::consensus::pow::ProofOfWork;
use crate::core::Block;
use thiserror::Error;

/// Validation error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid proof of work")]
    InvalidProofOfWork,
    #[error("Block has no transactions")]
    NoTransactions,
    #[error("Missing coinbase transaction")]
    MissingCoinbase,
    #[error("Coinbase not in first position")]
    CoinbaseNotFirst,
    #[error("Transaction id does not match its content")]
    InvalidTransactionId,
    #[error("Genesis block must have height 0")]
    InvalidGenesisHeight,
    #[error("Block height {found} does not follow parent height {parent}")]
    InvalidHeight { parent: u64, found: u64 },
    #[error("Parent block is unknown")]
    UnknownParent,
    #[error("Coinbase pays {found}, reward is {limit}")]
    ExcessiveReward { limit: u64, found: u64 },
    #[error("Coinbase output values overflow")]
    RewardOverflow,
}

/// Block validator
pub struct BlockValidator {
    pow: ProofOfWork,
    block_reward: u64,
}

impl BlockValidator {
    pub fn new(pow: ProofOfWork, block_reward: u64) -> Self {
        Self { pow, block_reward }
    }

    /// Checks that need no chain context
    pub fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        if block.transactions.is_empty() {
            return Err(ValidationError::NoTransactions);
        }

        if !self.pow.validate(block) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        if !block.transactions[0].is_coinbase() {
            return Err(ValidationError::MissingCoinbase);
        }

        if block.transactions[1..].iter().any(|tx| tx.is_coinbase()) {
            return Err(ValidationError::CoinbaseNotFirst);
        }

        let paid = block.transactions[0]
            .total_output_value()
            .ok_or(ValidationError::RewardOverflow)?;
        if paid > self.block_reward {
            return Err(ValidationError::ExcessiveReward {
                limit: self.block_reward,
                found: paid,
            });
        }

        if block.transactions.iter().any(|tx| tx.hash() != tx.id) {
            return Err(ValidationError::InvalidTransactionId);
        }

        if block.is_genesis() && block.height != 0 {
            return Err(ValidationError::InvalidGenesisHeight);
        }

        Ok(())
    }

    /// Height must be exactly one above the parent's
    pub fn validate_height(&self, block: &Block, parent: &Block) -> Result<(), ValidationError> {
        if block.height != parent.height + 1 {
            return Err(ValidationError::InvalidHeight {
                parent: parent.height,
                found: block.height,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Hash256, Transaction};

    fn pow() -> ProofOfWork {
        ProofOfWork::new(8).unwrap()
    }

    fn coinbase(tag: u8) -> Transaction {
        Transaction::coinbase(&[tag; 20], vec![tag], 100)
    }

    #[test]
    fn test_valid_block() {
        let block = Block::genesis(coinbase(1), &pow()).unwrap();
        assert_eq!(BlockValidator::new(pow(), 100).validate_block(&block), Ok(()));
    }

    #[test]
    fn test_missing_coinbase() {
        let spend = Transaction::new(
            vec![crate::core::TxInput::new(Hash256::new([1; 32]), 0, vec![])],
            vec![crate::core::TxOutput::new(5, vec![1; 20])],
        );
        let block = Block::create(vec![spend], Hash256::zero(), 0, &pow()).unwrap();
        assert_eq!(
            BlockValidator::new(pow(), 100).validate_block(&block),
            Err(ValidationError::MissingCoinbase)
        );
    }

    #[test]
    fn test_second_coinbase_rejected() {
        let block = Block::create(vec![coinbase(1), coinbase(2)], Hash256::zero(), 0, &pow()).unwrap();
        assert_eq!(
            BlockValidator::new(pow(), 100).validate_block(&block),
            Err(ValidationError::CoinbaseNotFirst)
        );
    }

    #[test]
    fn test_forged_hash_rejected() {
        let mut block = Block::genesis(coinbase(1), &pow()).unwrap();
        block.hash = Hash256::zero();
        assert_eq!(
            BlockValidator::new(pow(), 100).validate_block(&block),
            Err(ValidationError::InvalidProofOfWork)
        );
    }

    #[test]
    fn test_height_linkage() {
        let validator = BlockValidator::new(pow(), 100);
        let parent = Block::genesis(coinbase(1), &pow()).unwrap();
        let child = Block::create(vec![coinbase(2)], parent.hash, 1, &pow()).unwrap();
        let orphan_height = Block::create(vec![coinbase(3)], parent.hash, 5, &pow()).unwrap();

        assert_eq!(validator.validate_height(&child, &parent), Ok(()));
        assert_eq!(
            validator.validate_height(&orphan_height, &parent),
            Err(ValidationError::InvalidHeight { parent: 0, found: 5 })
        );
    }

    #[test]
    fn test_coinbase_above_reward_rejected() {
        let greedy = Transaction::coinbase(&[1; 20], vec![1], 101);
        let block = Block::genesis(greedy, &pow()).unwrap();
        assert_eq!(
            BlockValidator::new(pow(), 100).validate_block(&block),
            Err(ValidationError::ExcessiveReward { limit: 100, found: 101 })
        );

        let split = Transaction::new(
            vec![crate::core::TxInput::coinbase(vec![2])],
            vec![
                crate::core::TxOutput::new(u64::MAX, vec![1; 20]),
                crate::core::TxOutput::new(1, vec![1; 20]),
            ],
        );
        let block = Block::genesis(split, &pow()).unwrap();
        assert_eq!(
            BlockValidator::new(pow(), 100).validate_block(&block),
            Err(ValidationError::RewardOverflow)
        );
    }
}
