// Key management and address encoding

use crate::core::{encode_public_key, hash160, hash256};
use crate::error::{LedgerError, Result};
use secp256k1::{Secp256k1, SecretKey, PublicKey};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::path::Path;
use std::fs;
use serde::{Serialize, Deserialize};

/// Address version byte
const VERSION: u8 = 0x00;
const CHECKSUM_LENGTH: usize = 4;
const LOCKING_HASH_LENGTH: usize = 20;

/// Base58Check address: version || locking hash || checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Encode a locking hash as an address
    pub fn from_locking_hash(locking_hash: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(1 + locking_hash.len() + CHECKSUM_LENGTH);
        payload.push(VERSION);
        payload.extend_from_slice(locking_hash);
        let checksum = checksum(&payload);
        payload.extend_from_slice(&checksum);
        Self(bs58::encode(payload).into_string())
    }

    /// Get address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the locking hash, checking length and checksum
    pub fn locking_hash(&self) -> Result<Vec<u8>> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", self.0, e)))?;

        if bytes.len() != 1 + LOCKING_HASH_LENGTH + CHECKSUM_LENGTH {
            return Err(LedgerError::InvalidAddress(format!(
                "{}: wrong length {}",
                self.0,
                bytes.len()
            )));
        }

        let (payload, actual) = bytes.split_at(bytes.len() - CHECKSUM_LENGTH);
        if checksum(payload) != actual {
            return Err(LedgerError::InvalidAddress(format!("{}: checksum mismatch", self.0)));
        }

        Ok(payload[1..].to_vec())
    }

    /// Whether the string is a well-formed address
    pub fn validate(address: &str) -> bool {
        Address(address.to_string()).locking_hash().is_ok()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First four bytes of the double SHA256
fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let hash = hash256(payload);
    let mut out = [0u8; CHECKSUM_LENGTH];
    out.copy_from_slice(&hash.as_bytes()[..CHECKSUM_LENGTH]);
    out
}

/// Serializable key pair (for storage)
#[derive(Serialize, Deserialize)]
struct SerializableKeyPair {
    secret_key_bytes: [u8; 32],
    address: Address,
}

/// Key pair
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| LedgerError::Config(format!("Invalid secret key: {}", e)))?;
        let public_key = secret_key.public_key(&secp);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    fn to_serializable(&self) -> SerializableKeyPair {
        SerializableKeyPair {
            secret_key_bytes: self.secret_key.secret_bytes(),
            address: self.address(),
        }
    }

    /// Public key as `x || y`
    pub fn public_key_bytes(&self) -> Vec<u8> {
        encode_public_key(&self.public_key)
    }

    /// RIPEMD160(SHA256(x || y))
    pub fn locking_hash(&self) -> Vec<u8> {
        hash160(&self.public_key_bytes()).to_vec()
    }

    pub fn address(&self) -> Address {
        Address::from_locking_hash(&self.locking_hash())
    }
}

/// Keystore - manages multiple key pairs
#[derive(Default)]
pub struct Keystore {
    keys: HashMap<Address, KeyPair>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new address
    pub fn new_address(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address();
        self.keys.insert(address.clone(), keypair);
        address
    }

    /// Get key pair for address
    pub fn get_keypair(&self, address: &Address) -> Result<&KeyPair> {
        self.keys
            .get(address)
            .ok_or_else(|| LedgerError::NotFound(format!("key for address {}", address)))
    }

    /// All addresses, sorted
    pub fn list_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.keys.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Save keystore to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serializable: Vec<SerializableKeyPair> = self.keys
            .values()
            .map(KeyPair::to_serializable)
            .collect();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&serializable)?)?;
        Ok(())
    }

    /// Load keystore from file; a missing file yields an empty keystore
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No keystore at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let json = fs::read_to_string(path)?;
        let stored: Vec<SerializableKeyPair> = serde_json::from_str(&json)?;

        let mut keys = HashMap::new();
        for entry in stored {
            let kp = KeyPair::from_secret_bytes(&entry.secret_key_bytes)?;
            if kp.address() != entry.address {
                return Err(LedgerError::InvalidAddress(format!(
                    "{} does not match its stored key",
                    entry.address
                )));
            }
            keys.insert(entry.address, kp);
        }

        Ok(Self { keys })
    }
}
