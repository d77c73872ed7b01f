// Basic types for the ledger

use std::fmt;

/// 256-bit hash type (32 bytes)
/// Used for block hashes, transaction IDs, and Merkle roots.
/// Read as a big-endian unsigned integer when compared against a PoW target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Create a new Hash256 from a byte array
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Hash256 from a slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, String> {
        if slice.len() != 32 {
            return Err(format!("Invalid hash length: expected 32, got {}", slice.len()));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Get the hash as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The empty hash: genesis prev hash, coinbase input reference, cleared tx id
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Number of leading zero bits
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0;
        for byte in &self.0 {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| format!("Invalid hex string: {}", e))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_zero() {
        let zero = Hash256::zero();
        assert_eq!(zero.as_bytes(), &[0u8; 32]);
        assert!(zero.is_zero());
        assert_eq!(zero.leading_zeros(), 256);
    }

    #[test]
    fn test_hash256_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x12;
        bytes[31] = 0xff;
        let hash = Hash256::new(bytes);
        let hex = hash.to_hex();
        assert!(hex.starts_with("12"));
        assert_eq!(Hash256::from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(Hash256::from_slice(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_ordering_is_big_endian() {
        let mut low = [0u8; 32];
        low[31] = 0xff;
        let mut high = [0u8; 32];
        high[0] = 0x01;
        assert!(Hash256::new(low) < Hash256::new(high));
        assert_eq!(Hash256::new(high).leading_zeros(), 7);
    }
}
