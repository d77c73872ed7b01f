// UTXO ledger node - CLI

use clap::Parser;
use utxo_ledger::cli::load_config;
use utxo_ledger::{Cli, CliHandler};

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("Using data directory {}", config.data_dir.display());

    let mut handler = match CliHandler::new(config) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error initializing: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = handler.handle(cli).await {
        if e.is_fatal() {
            eprintln!("Error: {} (run `reindexutxo` to rebuild the index)", e);
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}
