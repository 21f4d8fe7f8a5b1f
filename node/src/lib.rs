pub mod miner;
pub mod server;
pub mod sync;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tinychain_core::{Address, Block, ChainError, Hash, SignedTx, State};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::server::StatusRes;

pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// A peer as announced over `/node/peer` and gossiped in `/node/status`.
/// `connected` means we have registered ourselves with it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PeerNode {
    pub ip: String,
    pub port: u16,
    pub is_bootstrap: bool,
    pub account: Address,
    pub connected: bool,
}

impl PeerNode {
    pub fn new(ip: &str, port: u16, is_bootstrap: bool, account: Address, connected: bool) -> Self {
        PeerNode {
            ip: ip.to_string(),
            port,
            is_bootstrap,
            account,
            connected,
        }
    }

    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Everything mutable lives behind one logical lock, held for the duration
/// of each public node operation and never across an await point.
struct NodeInner {
    state: State,
    pending_state: State,
    known_peers: HashMap<String, PeerNode>,
    pending_txs: HashMap<String, SignedTx>,
    archived_txs: HashMap<String, SignedTx>,
    is_mining: bool,
}

pub struct Node {
    info: PeerNode,
    data_dir: PathBuf,
    inner: Mutex<NodeInner>,
    // Written by sync, read by the miner supervisor; cancels in-flight PoW.
    synced_blocks_tx: mpsc::Sender<Block>,
    synced_blocks_rx: Mutex<Option<mpsc::Receiver<Block>>>,
    // Fan-out of freshly admitted TXs, reserved for future broadcast use.
    pending_txs_tx: mpsc::Sender<SignedTx>,
    #[allow(dead_code)]
    pending_txs_rx: Mutex<Option<mpsc::Receiver<SignedTx>>>,
}

impl Node {
    /// Load state from disk and assemble a stopped node. `run` starts the
    /// HTTP server, the sync loop, and the miner supervisor.
    pub fn new(
        data_dir: &Path,
        ip: &str,
        port: u16,
        miner: Address,
        bootstrap: Option<PeerNode>,
    ) -> Result<Arc<Self>, ChainError> {
        let state = State::open(data_dir)?;
        let pending_state = state.copy();

        let info = PeerNode::new(ip, port, bootstrap.is_none(), miner, true);

        let mut known_peers = HashMap::new();
        if let Some(peer) = bootstrap {
            if peer.tcp_address() != info.tcp_address() {
                known_peers.insert(peer.tcp_address(), peer);
            }
        }

        let (synced_blocks_tx, synced_blocks_rx) = mpsc::channel(1);
        let (pending_txs_tx, pending_txs_rx) = mpsc::channel(128);

        Ok(Arc::new(Node {
            info,
            data_dir: data_dir.to_path_buf(),
            inner: Mutex::new(NodeInner {
                state,
                pending_state,
                known_peers,
                pending_txs: HashMap::new(),
                archived_txs: HashMap::new(),
                is_mining: false,
            }),
            synced_blocks_tx,
            synced_blocks_rx: Mutex::new(Some(synced_blocks_rx)),
            pending_txs_tx,
            pending_txs_rx: Mutex::new(Some(pending_txs_rx)),
        }))
    }

    pub fn info(&self) -> &PeerNode {
        &self.info
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Serve until the shutdown token fires. TLS serves operator-provided
    /// PEMs from `<dataDir>/tls/`; certificate acquisition is external.
    pub async fn run(
        self: Arc<Self>,
        shutdown: CancellationToken,
        ssl_disabled: bool,
        ssl_email: Option<String>,
    ) -> anyhow::Result<()> {
        info!(
            "node {} listening on {} (miner account {})",
            self.info.ip,
            self.info.tcp_address(),
            self.info.account
        );

        tokio::spawn(sync::run_sync(self.clone(), shutdown.clone()));

        let synced_blocks = self
            .synced_blocks_rx
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("node is already running"))?;
        tokio::spawn(miner::run_miner(self.clone(), synced_blocks, shutdown.clone()));

        let routes = server::routes(self.clone());
        let addr: SocketAddr = ([0, 0, 0, 0], self.info.port).into();

        if ssl_disabled {
            let (_, serving) = warp::serve(routes)
                .try_bind_with_graceful_shutdown(addr, shutdown.cancelled_owned())?;
            serving.await;
        } else {
            if let Some(email) = ssl_email {
                info!("TLS contact for external certificate tooling: {}", email);
            }
            let cert = self.data_dir.join("tls").join("cert.pem");
            let key = self.data_dir.join("tls").join("key.pem");
            if !cert.exists() || !key.exists() {
                warn!(
                    "no TLS material under {}; provision cert.pem/key.pem or pass --disable-ssl",
                    self.data_dir.join("tls").display()
                );
            }
            let (_, serving) = warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .bind_with_graceful_shutdown(addr, shutdown.cancelled_owned());
            serving.await;
        }

        info!("http server stopped");
        Ok(())
    }

    /// Admit a TX to the mempool after validating it against the pending
    /// state. A TX already pending or archived is a silent no-op.
    pub fn add_pending_tx(&self, tx: SignedTx, from_peer: &str) -> Result<(), ChainError> {
        let key = tx.hash()?.to_hex();

        let mut inner = self.inner.lock();
        if inner.pending_txs.contains_key(&key) || inner.archived_txs.contains_key(&key) {
            return Ok(());
        }

        inner.pending_state.apply_tx(&tx)?;
        info!(
            "added pending tx {} from {} ({} -> {}, value {})",
            key, from_peer, tx.tx.from, tx.tx.to, tx.tx.value
        );
        inner.pending_txs.insert(key, tx.clone());
        drop(inner);

        // best effort; the channel is a fan-out, not a dependency
        let _ = self.pending_txs_tx.try_send(tx);
        Ok(())
    }

    /// Apply a block to the authoritative state and rebuild the pending
    /// state from a fresh copy.
    pub fn add_block(&self, block: Block) -> Result<Hash, ChainError> {
        let mut inner = self.inner.lock();
        let hash = inner.state.add_block(block)?;
        inner.pending_state = inner.state.copy();
        Ok(hash)
    }

    /// Move every TX of `block` found in the mempool to the archive so it
    /// can never be admitted again.
    pub fn remove_mined_txs(&self, block: &Block) {
        let mut inner = self.inner.lock();
        for signed in &block.payload {
            let Ok(hash) = signed.hash() else { continue };
            let key = hash.to_hex();
            if let Some(tx) = inner.pending_txs.remove(&key) {
                info!("archiving mined tx {}", key);
                inner.archived_txs.insert(key, tx);
            }
        }
    }

    /// Forward a peer block that has already been applied to state; the
    /// miner supervisor reads this to cancel in-flight work.
    pub async fn notify_synced_block(&self, block: Block) {
        let _ = self.synced_blocks_tx.send(block).await;
    }

    pub fn add_peer(&self, peer: PeerNode) {
        if peer.tcp_address() == self.info.tcp_address() {
            return;
        }
        let mut inner = self.inner.lock();
        let addr = peer.tcp_address();
        if !inner.known_peers.contains_key(&addr) {
            info!("new peer {}", addr);
            inner.known_peers.insert(addr, peer);
        }
    }

    pub fn remove_peer(&self, addr: &str) {
        self.inner.lock().known_peers.remove(addr);
    }

    pub fn is_known_peer(&self, addr: &str) -> bool {
        addr == self.info.tcp_address() || self.inner.lock().known_peers.contains_key(addr)
    }

    pub fn mark_peer_connected(&self, addr: &str) {
        if let Some(peer) = self.inner.lock().known_peers.get_mut(addr) {
            peer.connected = true;
        }
    }

    pub fn known_peers_snapshot(&self) -> HashMap<String, PeerNode> {
        self.inner.lock().known_peers.clone()
    }

    pub fn latest_block_hash(&self) -> Hash {
        self.inner.lock().state.latest_block_hash()
    }

    /// (latest hash, latest number, has any block) in one critical section.
    pub fn chain_status(&self) -> (Hash, u64, bool) {
        let inner = self.inner.lock();
        (
            inner.state.latest_block_hash(),
            inner.state.latest_block().header.number,
            inner.state.has_genesis_block(),
        )
    }

    pub fn balances_snapshot(&self) -> (Hash, HashMap<Address, u64>) {
        let inner = self.inner.lock();
        (
            inner.state.latest_block_hash(),
            inner.state.balances().clone(),
        )
    }

    pub fn status_res(&self) -> StatusRes {
        let inner = self.inner.lock();
        StatusRes {
            block_hash: inner.state.latest_block_hash(),
            block_number: inner.state.latest_block().header.number,
            peers_known: inner.known_peers.clone(),
        }
    }

    pub fn mempool_len(&self) -> usize {
        self.inner.lock().pending_txs.len()
    }

    pub fn mempool_snapshot(&self) -> Vec<SignedTx> {
        self.inner.lock().pending_txs.values().cloned().collect()
    }

    pub fn is_mining(&self) -> bool {
        self.inner.lock().is_mining
    }

    pub fn set_is_mining(&self, mining: bool) {
        self.inner.lock().is_mining = mining;
    }

    /// Atomically snapshot the mempool and chain tip for one PoW attempt,
    /// flipping `is_mining`. None if already mining or nothing to mine.
    pub fn start_mining_attempt(&self) -> Option<tinychain_core::consensus::PendingBlock> {
        let mut inner = self.inner.lock();
        if inner.is_mining || inner.pending_txs.is_empty() {
            return None;
        }

        let txs: Vec<SignedTx> = inner.pending_txs.values().cloned().collect();
        let pending = tinychain_core::consensus::PendingBlock::new(
            inner.state.latest_block_hash(),
            inner.state.next_block_number(),
            self.info.account,
            txs,
        );
        inner.is_mining = true;
        Some(pending)
    }
}
