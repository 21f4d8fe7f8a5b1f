use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::block::{Block, is_valid_block_hash};
use crate::error::ChainError;
use crate::transaction::SignedTx;
use crate::types::{Address, Hash};

/// Inputs for one proof-of-work attempt. Carries value copies only; mining
/// neither reads nor mutates ledger state.
#[derive(Debug, Clone)]
pub struct PendingBlock {
    pub parent: Hash,
    pub number: u64,
    pub miner: Address,
    pub time: u64,
    pub txs: Vec<SignedTx>,
}

impl PendingBlock {
    pub fn new(parent: Hash, number: u64, miner: Address, txs: Vec<SignedTx>) -> Self {
        PendingBlock {
            parent,
            number,
            miner,
            time: chrono::Utc::now().timestamp() as u64,
            txs,
        }
    }
}

/// Search random 32-bit nonces until the block content hash meets the PoW
/// target. CPU-bound and blocking; callers run it on a dedicated worker
/// (spawn_blocking). There is no attempt cap; cancellation is checked at
/// the top of every iteration.
pub fn mine(cancel: &CancellationToken, pending: PendingBlock) -> Result<Block, ChainError> {
    if pending.txs.is_empty() {
        return Err(ChainError::EmptyBlock);
    }

    let start = std::time::Instant::now();
    let mut block = Block::new(
        pending.parent,
        pending.number,
        0,
        pending.time,
        pending.miner,
        pending.txs,
    );
    let mut attempt: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            info!(
                "mining height {} cancelled after {} attempts",
                block.header.number, attempt
            );
            return Err(ChainError::Cancelled);
        }

        attempt += 1;
        block.header.nonce = rand::random::<u32>();

        let hash = block.hash()?;
        if is_valid_block_hash(&hash) {
            info!(
                "mined block {} at height {}: nonce {}, {} txs, {} attempts in {:?}",
                hash,
                block.header.number,
                block.header.nonce,
                block.payload.len(),
                attempt,
                start.elapsed()
            );
            return Ok(block);
        }

        if attempt % 1_000_000 == 0 {
            debug!(
                "mining height {}: {} attempts so far",
                block.header.number, attempt
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{SECP, Tx};
    use secp256k1::SecretKey;

    fn one_signed_tx() -> (SignedTx, Address) {
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let from = Address::from_pubkey(&secret.public_key(&SECP));
        let tx = Tx {
            from,
            to: Address([0x22; 20]),
            value: 1,
            nonce: 1,
            time: 1_700_000_000,
            data: String::new(),
        };
        (SignedTx::sign(tx, &secret).unwrap(), from)
    }

    #[test]
    fn empty_payload_is_rejected() {
        let pending = PendingBlock::new(Hash::zero(), 0, Address::default(), vec![]);
        match mine(&CancellationToken::new(), pending) {
            Err(ChainError::EmptyBlock) => {}
            other => panic!("expected empty block error, got {other:?}"),
        }
    }

    #[test]
    fn cancellation_is_observed_immediately() {
        let (signed, miner) = one_signed_tx();
        let pending = PendingBlock::new(Hash::zero(), 0, miner, vec![signed]);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let start = std::time::Instant::now();
        match mine(&cancel, pending) {
            Err(ChainError::Cancelled) => {}
            other => panic!("expected cancelled, got {other:?}"),
        }
        // observed within one loop iteration, i.e. effectively at once
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    // Real PoW at the fixed difficulty; takes minutes. Run with
    // `cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn mine_finds_a_valid_hash() {
        let (signed, miner) = one_signed_tx();
        let parent = Hash([0xab; 32]);
        let pending = PendingBlock::new(parent, 4, miner, vec![signed.clone()]);

        let block = mine(&CancellationToken::new(), pending).unwrap();
        assert!(is_valid_block_hash(&block.hash().unwrap()));
        assert_eq!(block.header.parent, parent);
        assert_eq!(block.header.number, 4);
        assert_eq!(block.header.miner, miner);
        assert_eq!(block.payload, vec![signed]);
    }
}
