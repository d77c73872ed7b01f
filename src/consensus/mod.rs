// Consensus: proof-of-work sealing and block validation

pub mod pow;
pub mod validation;

pub use pow::{CancelToken, MiningResult, ProofOfWork, DIFFICULTY};
pub use validation::{BlockValidator, ValidationError};
