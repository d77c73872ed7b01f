// Node configuration

use crate::consensus::DIFFICULTY;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Coins paid by each coinbase transaction
pub const BLOCK_REWARD: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding block stores and keystores
    pub data_dir: PathBuf,
    /// Distinguishes several nodes sharing one data directory
    pub node_id: String,
    pub difficulty: u32,
    pub block_reward: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tmp"),
            node_id: "3000".to_string(),
            difficulty: DIFFICULTY,
            block_reward: BLOCK_REWARD,
        }
    }
}

impl LedgerConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `NODE_ID` taken from the environment when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(node_id) = std::env::var("NODE_ID") {
            if !node_id.is_empty() {
                config.node_id = node_id;
            }
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=255).contains(&self.difficulty) {
            return Err(LedgerError::Config(format!(
                "difficulty must be between 1 and 255, got {}",
                self.difficulty
            )));
        }
        if self.node_id.is_empty() {
            return Err(LedgerError::Config("node_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("blocks_{}", self.node_id))
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallets_{}.json", self.node_id))
    }
}
