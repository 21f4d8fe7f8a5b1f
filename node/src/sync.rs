use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tinychain_core::config::SYNC_INTERVAL_SECS;
use tokio_util::sync::CancellationToken;

use crate::server::{StatusRes, SyncRes};
use crate::{Node, PeerNode};

/// Poll every known peer on a fixed cadence: register ourselves, pull the
/// blocks we are missing, and adopt peers we have not seen. Per-peer
/// failures are logged and never abort the tick.
pub async fn run_sync(node: Arc<Node>, shutdown: CancellationToken) {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(SYNC_INTERVAL_SECS));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("sync loop stopped");
                return;
            }
            _ = ticker.tick() => do_sync(&node, &client).await,
        }
    }
}

async fn do_sync(node: &Arc<Node>, client: &reqwest::Client) {
    for (addr, peer) in node.known_peers_snapshot() {
        if let Err(err) = sync_with_peer(node, client, &peer).await {
            error!("sync with peer {} failed: {}", addr, err);
        }
    }
}

async fn sync_with_peer(
    node: &Arc<Node>,
    client: &reqwest::Client,
    peer: &PeerNode,
) -> anyhow::Result<()> {
    let status = query_peer_status(client, peer).await?;
    join_known_peers(node, client, peer).await?;
    sync_blocks(node, client, peer, &status).await?;
    sync_known_peers(node, &status);
    Ok(())
}

async fn query_peer_status(
    client: &reqwest::Client,
    peer: &PeerNode,
) -> anyhow::Result<StatusRes> {
    let url = format!("http://{}/node/status", peer.tcp_address());
    let status = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(status)
}

/// Announce ourselves once per peer; `connected` remembers registration.
async fn join_known_peers(
    node: &Arc<Node>,
    client: &reqwest::Client,
    peer: &PeerNode,
) -> anyhow::Result<()> {
    if peer.connected {
        return Ok(());
    }

    let info = node.info();
    let url = format!(
        "http://{}/node/peer?ip={}&port={}&miner={}",
        peer.tcp_address(),
        info.ip,
        info.port,
        info.account
    );
    client.get(&url).send().await?.error_for_status()?;

    node.mark_peer_connected(&peer.tcp_address());
    info!("registered with peer {}", peer.tcp_address());
    Ok(())
}

/// Pull and apply every block the peer has that we do not, forwarding each
/// applied block to the miner supervisor so in-flight work is cancelled.
async fn sync_blocks(
    node: &Arc<Node>,
    client: &reqwest::Client,
    peer: &PeerNode,
    status: &StatusRes,
) -> anyhow::Result<()> {
    let (local_hash, local_number, has_blocks) = node.chain_status();

    // A node without any block yet syncs from the zero hash; afterwards
    // only a strictly higher peer height is worth fetching.
    let peer_is_ahead = if has_blocks {
        status.block_number > local_number
    } else {
        !status.block_hash.is_zero()
    };
    if !peer_is_ahead {
        return Ok(());
    }

    let url = format!(
        "http://{}/node/sync?fromBlock={}",
        peer.tcp_address(),
        local_hash.to_hex()
    );
    let res: SyncRes = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    if res.blocks.is_empty() {
        return Ok(());
    }
    info!(
        "found {} new blocks from peer {}",
        res.blocks.len(),
        peer.tcp_address()
    );

    for block in res.blocks {
        let hash = node.add_block(block.clone())?;
        node.remove_mined_txs(&block);
        node.notify_synced_block(block).await;
        info!("applied peer block {}", hash);
    }
    Ok(())
}

fn sync_known_peers(node: &Arc<Node>, status: &StatusRes) {
    for (addr, peer) in &status.peers_known {
        if !node.is_known_peer(addr) {
            // we still have to register with the adopted peer ourselves
            let mut peer = peer.clone();
            peer.connected = false;
            node.add_peer(peer);
        }
    }
}
