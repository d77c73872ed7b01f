// CLI commands

use crate::config::LedgerConfig;
use crate::core::{Block, Serializable, Transaction};
use crate::error::Result;
use crate::ledger::Ledger;
use crate::wallet::{Address, Keystore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "utxo-ledger")]
#[command(about = "Minimal UTXO ledger node", long_about = None)]
pub struct Cli {
    /// JSON config file (defaults plus NODE_ID from the environment when absent)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a blockchain and send the genesis reward to ADDRESS
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Get the balance of ADDRESS
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT of coins from FROM to TO
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine a block with the transaction on this node
        #[arg(long)]
        mine: bool,
    },

    /// Print all the blocks of the chain
    #[command(name = "printchain")]
    PrintChain,

    /// Generate a new key pair and save it to the keystore
    #[command(name = "createwallet")]
    CreateWallet,

    /// List the addresses in the keystore
    #[command(name = "listaddresses")]
    ListAddresses,

    /// Rebuild the UTXO index from the chain
    #[command(name = "reindexutxo")]
    ReindexUtxo,
}

/// Outcome of a `send`
pub enum SendOutcome {
    Mined(Block),
    /// Signed transaction for an external relay
    Signed(Transaction),
}

/// CLI handler
pub struct CliHandler {
    config: LedgerConfig,
    keystore: Keystore,
}

impl CliHandler {
    pub fn new(config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let keystore = Keystore::load(config.wallet_path())?;
        Ok(Self { config, keystore })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Handle CLI command
    pub async fn handle(&mut self, cli: Cli) -> Result<()> {
        match cli.command {
            Commands::CreateBlockchain { address } => {
                let genesis = self.create_blockchain(&address)?;
                println!("Genesis block {} created", genesis.hash);
                println!("Done!");
            }
            Commands::GetBalance { address } => {
                let balance = self.get_balance(&address)?;
                println!("Balance of '{}': {}", address, balance);
            }
            Commands::Send { from, to, amount, mine } => match self.send(&from, &to, amount, mine).await? {
                SendOutcome::Mined(block) => {
                    println!("Mined block {} at height {}", block.hash, block.height);
                    println!("Success!");
                }
                SendOutcome::Signed(tx) => {
                    println!("{}", hex::encode(tx.serialize()));
                }
            },
            Commands::PrintChain => self.print_chain()?,
            Commands::CreateWallet => {
                let address = self.create_wallet()?;
                println!("New address is: {}", address);
            }
            Commands::ListAddresses => {
                for address in self.keystore.list_addresses() {
                    println!("{}", address);
                }
            }
            Commands::ReindexUtxo => {
                let count = self.reindex_utxo()?;
                println!("Done! There are {} transactions in the UTXO set.", count);
            }
        }
        Ok(())
    }

    pub fn create_blockchain(&self, address: &str) -> Result<Block> {
        let locking_hash = Address(address.to_string()).locking_hash()?;
        let ledger = Ledger::init(&self.config, &locking_hash)?;
        let tip = ledger.chain().tip()?;
        ledger.chain().get_block(&tip)
    }

    pub fn get_balance(&self, address: &str) -> Result<u64> {
        let locking_hash = Address(address.to_string()).locking_hash()?;
        let ledger = Ledger::open(&self.config)?;
        ledger.utxo_set().get_balance(&locking_hash)
    }

    /// Build and sign a payment; with `mine`, seal it into a block paying the
    /// reward to the sender. Ctrl-C aborts the nonce search.
    pub async fn send(&self, from: &str, to: &str, amount: u64, mine: bool) -> Result<SendOutcome> {
        let recipient = Address(to.to_string()).locking_hash()?;
        let sender = self.keystore.get_keypair(&Address(from.to_string()))?;

        let ledger = Arc::new(Ledger::open(&self.config)?);
        let tx = ledger.new_transaction(sender, &recipient, amount)?;
        log::info!("Created transaction {}", tx.id);

        if !mine {
            return Ok(SendOutcome::Signed(tx));
        }

        let job = ledger.spawn_mining(vec![tx], sender.locking_hash())?;
        let cancel = job.canceller();
        let wait = job.wait();
        tokio::pin!(wait);

        tokio::select! {
            result = &mut wait => result.map(SendOutcome::Mined),
            _ = tokio::signal::ctrl_c() => {
                log::warn!("Interrupted, cancelling mining");
                cancel.cancel();
                wait.await.map(SendOutcome::Mined)
            }
        }
    }

    pub fn create_wallet(&mut self) -> Result<Address> {
        let address = self.keystore.new_address();
        self.keystore.save(self.config.wallet_path())?;
        Ok(address)
    }

    pub fn reindex_utxo(&self) -> Result<usize> {
        Ledger::open(&self.config)?.reindex()
    }

    fn print_chain(&self) -> Result<()> {
        let ledger = Ledger::open(&self.config)?;
        for block in ledger.chain().iter()? {
            let block = block?;
            println!("============ Block {} ============", block.hash);
            println!("Height: {}", block.height);
            println!("Prev. block: {}", block.prev_hash);
            println!("Timestamp: {}", block.timestamp);
            println!("Nonce: {}", block.nonce);
            println!("PoW: {}", ledger.pow().validate(&block));
            for tx in &block.transactions {
                println!("{}", tx);
            }
            println!();
        }
        Ok(())
    }
}

/// Resolve the configuration the CLI runs with
pub fn load_config(path: Option<&PathBuf>) -> Result<LedgerConfig> {
    match path {
        Some(path) => LedgerConfig::load(path),
        None => {
            let config = LedgerConfig::from_env();
            config.validate()?;
            Ok(config)
        }
    }
}
