use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ChainError;
use crate::transaction::SignedTx;
use crate::types::{Address, Hash};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub parent: Hash,
    pub number: u64,
    pub nonce: u32, // varied during the PoW search
    pub time: u64,  // unix seconds
    pub miner: Address,
}

/// A block with at least one TX. An empty payload is invalid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub payload: Vec<SignedTx>,
}

impl Block {
    pub fn new(
        parent: Hash,
        number: u64,
        nonce: u32,
        time: u64,
        miner: Address,
        payload: Vec<SignedTx>,
    ) -> Self {
        Block {
            header: BlockHeader {
                parent,
                number,
                nonce,
                time,
                miner,
            },
            payload,
        }
    }

    /// Content hash: sha256 over the canonical JSON encoding (struct fields
    /// in declaration order, no whitespace). Mining, validation, and replay
    /// all hash these exact bytes.
    pub fn hash(&self) -> Result<Hash, ChainError> {
        let encoded = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&encoded);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(Hash(out))
    }
}

/// PoW target: the first three hash bytes are zero and the fourth is not.
pub fn is_valid_block_hash(hash: &Hash) -> bool {
    hash.0[0] == 0 && hash.0[1] == 0 && hash.0[2] == 0 && hash.0[3] != 0
}

/// One line of the on-disk block log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockFs {
    pub hash: Hash,
    pub block: Block,
}
