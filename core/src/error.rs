use thiserror::Error;

use crate::types::Hash;

/// Every failure the ledger, miner, and node surface as a typed value.
/// Duplicate mempool submissions are a silent no-op, not an error.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed json: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("malformed hex: {0}")]
    MalformedHex(#[from] hex::FromHexError),

    #[error("forged tx: recovered signer does not match the sender")]
    Forged,

    #[error("bad tx nonce: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },

    #[error("insufficient balance: need {cost}, have {balance}")]
    InsufficientBalance { cost: u64, balance: u64 },

    #[error("bad block number: expected {expected}, got {got}")]
    BadBlockNumber { expected: u64, got: u64 },

    #[error("bad parent hash: expected {expected}, got {got}")]
    BadParent { expected: Hash, got: Hash },

    #[error("block hash does not meet the proof-of-work target")]
    BadPow,

    #[error("mining empty blocks is not allowed")]
    EmptyBlock,

    #[error("mining cancelled")]
    Cancelled,
}
