use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tinychain_core::Block;
use tinychain_core::config::MINING_INTERVAL_SECS;
use tinychain_core::consensus;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::Node;

/// Supervises proof-of-work attempts. Idle until a tick finds a non-empty
/// mempool; a peer block arriving on `synced_blocks` archives its TXs and
/// cancels the attempt in flight.
pub async fn run_miner(
    node: Arc<Node>,
    mut synced_blocks: mpsc::Receiver<Block>,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval(Duration::from_secs(MINING_INTERVAL_SECS));
    let mut current_attempt: Option<CancellationToken> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(attempt) = current_attempt.take() {
                    attempt.cancel();
                }
                info!("miner supervisor stopped");
                return;
            }

            _ = ticker.tick() => {
                let Some(pending) = node.start_mining_attempt() else {
                    continue;
                };
                let attempt = shutdown.child_token();
                current_attempt = Some(attempt.clone());
                info!(
                    "starting mining attempt: height {}, {} txs",
                    pending.number,
                    pending.txs.len()
                );
                spawn_mining_attempt(node.clone(), pending, attempt);
            }

            Some(block) = synced_blocks.recv() => {
                // already applied to state by the sync path
                node.remove_mined_txs(&block);
                if let Some(attempt) = current_attempt.take() {
                    info!(
                        "peer block {} arrived, cancelling local attempt",
                        block.header.number
                    );
                    attempt.cancel();
                }
            }
        }
    }
}

fn spawn_mining_attempt(
    node: Arc<Node>,
    pending: consensus::PendingBlock,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mined = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || consensus::mine(&cancel, pending)
        })
        .await;

        match mined {
            Ok(Ok(block)) => match node.add_block(block.clone()) {
                Ok(hash) => {
                    node.remove_mined_txs(&block);
                    info!("mined block {} accepted at height {}", hash, block.header.number);
                }
                Err(err) => {
                    // lost the race against a synced peer block; the TXs
                    // stay in the mempool for the next tick
                    error!("discarding mined block: {}", err);
                }
            },
            Ok(Err(err)) => info!("mining attempt ended: {}", err),
            Err(err) => error!("mining worker failed: {}", err),
        }
        node.set_is_mining(false);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::SecretKey;
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tinychain_core::config::{BLOCK_REWARD, TX_FEE};
    use tinychain_core::state::{database_dir, genesis_path};
    use tinychain_core::transaction::{SECP, SignedTx, Tx};
    use tinychain_core::{Address, Hash};

    fn keypair(fill: u8) -> (SecretKey, Address) {
        let secret = SecretKey::from_slice(&[fill; 32]).unwrap();
        (secret, Address::from_pubkey(&secret.public_key(&SECP)))
    }

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tinychain_miner_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn write_test_genesis(data_dir: &Path, funded: &[(Address, u64)]) {
        fs::create_dir_all(database_dir(data_dir)).unwrap();
        let balances: HashMap<String, u64> = funded
            .iter()
            .map(|(account, value)| (account.to_string(), *value))
            .collect();
        let genesis = serde_json::json!({
            "genesis_time": "2024-01-01T00:00:00Z",
            "chain_id": "tinychain-test",
            "balances": balances,
        });
        fs::write(genesis_path(data_dir), genesis.to_string()).unwrap();
    }

    fn signed_transfer(
        secret: &SecretKey,
        from: Address,
        to: Address,
        value: u64,
        nonce: u64,
    ) -> SignedTx {
        SignedTx::sign(
            Tx {
                from,
                to,
                value,
                nonce,
                time: 1_700_000_000 + nonce,
                data: String::new(),
            },
            secret,
        )
        .unwrap()
    }

    async fn wait_until(what: &str, timeout: Duration, mut check: impl FnMut() -> bool) {
        let deadline = time::Instant::now() + timeout;
        while !check() {
            if time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            time::sleep(Duration::from_millis(100)).await;
        }
    }

    // End-to-end mining at the real PoW difficulty; takes minutes. Run
    // with `cargo test -- --ignored`.
    #[tokio::test(flavor = "multi_thread")]
    #[ignore]
    async fn ticker_mines_pending_txs_into_a_block() {
        let (secret, sender) = keypair(0x11);
        let (_, receiver) = keypair(0x22);
        let (_, miner) = keypair(0x33);

        let dir = test_data_dir("mine_e2e");
        write_test_genesis(&dir, &[(sender, 1_000_000)]);
        let node = Node::new(&dir, "127.0.0.1", 8090, miner, None).unwrap();

        let shutdown = CancellationToken::new();
        let synced_rx = node.synced_blocks_rx.lock().take().unwrap();
        tokio::spawn(run_miner(node.clone(), synced_rx, shutdown.clone()));

        let signed = signed_transfer(&secret, sender, receiver, 1, 1);
        node.add_pending_tx(signed, "test").unwrap();

        {
            let node = node.clone();
            wait_until("block 0 to be mined", Duration::from_secs(1800), move || {
                node.chain_status().2
            })
            .await;
        }

        let (_, balances) = node.balances_snapshot();
        assert_eq!(balances.get(&receiver).copied().unwrap_or(0), 1);
        assert_eq!(
            balances.get(&sender).copied().unwrap_or(0),
            1_000_000 - 1 - TX_FEE
        );
        assert_eq!(
            balances.get(&miner).copied().unwrap_or(0),
            BLOCK_REWARD + TX_FEE
        );
        assert_eq!(node.mempool_len(), 0);
        shutdown.cancel();
    }

    // The §2-style mining race: a peer block carrying one of the two
    // pending TXs lands mid-attempt. Real PoW; takes minutes.
    #[tokio::test(flavor = "multi_thread")]
    #[ignore]
    async fn peer_block_cancels_mining_and_leaves_remaining_txs() {
        let (secret, sender) = keypair(0x11);
        let (_, receiver) = keypair(0x22);
        let (_, local_miner) = keypair(0x33);
        let (_, peer_miner) = keypair(0x44);

        let dir = test_data_dir("race");
        write_test_genesis(&dir, &[(sender, 1_000_000)]);
        let node = Node::new(&dir, "127.0.0.1", 8091, local_miner, None).unwrap();

        let tx1 = signed_transfer(&secret, sender, receiver, 1, 1);
        let tx2 = signed_transfer(&secret, sender, receiver, 1, 2);

        // pre-mine the competing peer block (tx1 only) before the local
        // supervisor starts, so the race is deterministic
        let peer_pending = tinychain_core::consensus::PendingBlock::new(
            Hash::zero(),
            0,
            peer_miner,
            vec![tx1.clone()],
        );
        let peer_block =
            tinychain_core::consensus::mine(&CancellationToken::new(), peer_pending).unwrap();

        let shutdown = CancellationToken::new();
        let synced_rx = node.synced_blocks_rx.lock().take().unwrap();
        tokio::spawn(run_miner(node.clone(), synced_rx, shutdown.clone()));

        node.add_pending_tx(tx1.clone(), "test").unwrap();
        node.add_pending_tx(tx2.clone(), "test").unwrap();

        {
            let node = node.clone();
            wait_until("mining to start", Duration::from_secs(30), move || {
                node.is_mining()
            })
            .await;
        }

        // the sync path: apply, then forward on the channel
        node.add_block(peer_block.clone()).unwrap();
        node.remove_mined_txs(&peer_block);
        node.notify_synced_block(peer_block).await;

        {
            let node = node.clone();
            wait_until("mining to cancel", Duration::from_secs(2), move || {
                !node.is_mining()
            })
            .await;
        }
        assert_eq!(node.mempool_len(), 1);
        assert_eq!(node.mempool_snapshot()[0], tx2);

        // the next ticks mine tx2 alone at height 1
        {
            let node = node.clone();
            wait_until("block 1 to be mined", Duration::from_secs(1800), move || {
                node.chain_status().1 == 1 && !node.is_mining()
            })
            .await;
        }

        let (_, balances) = node.balances_snapshot();
        assert_eq!(balances.get(&receiver).copied().unwrap_or(0), 2);
        assert_eq!(
            balances.get(&sender).copied().unwrap_or(0),
            1_000_000 - 2 * (1 + TX_FEE)
        );
        assert_eq!(
            balances.get(&peer_miner).copied().unwrap_or(0),
            BLOCK_REWARD + TX_FEE
        );
        assert_eq!(
            balances.get(&local_miner).copied().unwrap_or(0),
            BLOCK_REWARD + TX_FEE
        );
        assert_eq!(node.mempool_len(), 0);
        shutdown.cancel();
    }
}
