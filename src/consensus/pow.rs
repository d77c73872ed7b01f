// Proof of Work implementation

use crate::core::{Block, Hash256, sha256};
use crate::error::{LedgerError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Protocol difficulty: number of leading zero bits a sealing hash needs
pub const DIFFICULTY: u32 = 18;

/// How many nonces are tried between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Shared flag used to abort a running nonce search
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Proof-of-work engine for a fixed difficulty
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    difficulty: u32,
    /// 2^(256 - difficulty) as a big-endian 256-bit integer
    target: Hash256,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Result<Self> {
        if !(1..=255).contains(&difficulty) {
            return Err(LedgerError::Config(format!(
                "difficulty must be between 1 and 255, got {}",
                difficulty
            )));
        }

        let exponent = 256 - difficulty;
        let mut target = [0u8; 32];
        target[31 - (exponent / 8) as usize] = 1u8 << (exponent % 8);

        Ok(Self {
            difficulty,
            target: Hash256::new(target),
        })
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn target(&self) -> Hash256 {
        self.target
    }

    /// prev_hash || merkle_root || be64(nonce) || be64(difficulty)
    pub fn sealing_input(&self, prev_hash: &Hash256, merkle_root: &Hash256, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(80);
        data.extend_from_slice(prev_hash.as_bytes());
        data.extend_from_slice(merkle_root.as_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&(self.difficulty as u64).to_be_bytes());
        data
    }

    /// H(sealing_input(block, nonce))
    pub fn seal_hash(&self, block: &Block, nonce: u64) -> Hash256 {
        sha256(&self.sealing_input(&block.prev_hash, &block.hash_transactions(), nonce))
    }

    /// Hash read as a big-endian integer is strictly below the target
    #[inline]
    pub fn meets_target(&self, hash: &Hash256) -> bool {
        hash < &self.target
    }

    /// Search nonces upward from zero until a hash meets the target.
    /// Returns `None` if `cancel` fires first.
    pub fn run(&self, block: &Block, cancel: &CancelToken) -> Option<MiningResult> {
        let start_time = Instant::now();
        let merkle_root = block.hash_transactions();
        let mut attempts = 0u64;

        for nonce in 0..=u64::MAX {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                log::info!("Mining at height {} cancelled after {} attempts", block.height, attempts);
                return None;
            }

            let hash = sha256(&self.sealing_input(&block.prev_hash, &merkle_root, nonce));
            attempts += 1;

            if self.meets_target(&hash) {
                return Some(MiningResult {
                    nonce,
                    hash,
                    attempts,
                    duration: start_time.elapsed(),
                });
            }

            if attempts % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!("Mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }

        None
    }

    /// Recompute the sealing hash; it must equal the stored hash and meet the target
    pub fn validate(&self, block: &Block) -> bool {
        let hash = self.seal_hash(block, block.nonce);
        hash == block.hash && self.meets_target(&hash)
    }
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    pub nonce: u64,
    pub hash: Hash256,
    pub attempts: u64,
    pub duration: Duration,
}

impl MiningResult {
    /// Hashes per second
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}
