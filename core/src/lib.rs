pub mod block;
pub mod config;
pub mod consensus;
pub mod error;
pub mod genesis;
pub mod state;
pub mod transaction;
pub mod types;

// Explicit re-exports to avoid ambiguous glob re-exports
pub use block::{Block, BlockFs, BlockHeader, is_valid_block_hash};
pub use error::ChainError;
pub use genesis::Genesis;
pub use state::State;
pub use transaction::{SignedTx, Tx};
pub use types::{Address, Hash, Sig, keccak256};
