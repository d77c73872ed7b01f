// Wallet: keys, addresses and transaction building

mod keystore;
mod tx_builder;

pub use keystore::{Keystore, Address, KeyPair};
pub use tx_builder::TransactionBuilder;
