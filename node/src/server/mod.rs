use std::collections::HashMap;
use std::sync::Arc;

use log::error;
use serde::{Deserialize, Serialize};
use tinychain_core::{Address, Block, Hash, SignedTx, state};
use warp::Filter;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus, json, with_status};

use crate::{Node, PeerNode};

#[derive(Serialize, Deserialize, Debug)]
pub struct BalancesRes {
    pub block_hash: Hash,
    pub balances: HashMap<Address, u64>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TxAddRes {
    pub block_hash: Hash,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StatusRes {
    pub block_hash: Hash,
    pub block_number: u64,
    pub peers_known: HashMap<String, PeerNode>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SyncRes {
    pub blocks: Vec<Block>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AddPeerRes {
    pub success: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrRes {
    pub error: String,
}

#[derive(Deserialize)]
struct SyncQuery {
    #[serde(rename = "fromBlock")]
    from_block: String,
}

#[derive(Deserialize)]
struct AddPeerQuery {
    ip: String,
    port: u16,
    miner: Address,
}

fn reply_ok<T: Serialize>(value: &T) -> WithStatus<Json> {
    with_status(json(value), StatusCode::OK)
}

fn reply_err(err: impl std::fmt::Display) -> WithStatus<Json> {
    let error = err.to_string();
    error!("request failed: {error}");
    with_status(
        json(&ErrRes { error }),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

/// The node's whole HTTP surface as one filter, so tests can drive it
/// through `warp::test` without binding a socket.
pub fn routes(
    node: Arc<Node>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let node_filter = {
        let node = node.clone();
        warp::any().map(move || node.clone())
    };

    // GET /balances/list - balances at the latest block
    let balances = warp::path!("balances" / "list")
        .and(warp::get())
        .and(node_filter.clone())
        .map(|node: Arc<Node>| {
            let (block_hash, balances) = node.balances_snapshot();
            reply_ok(&BalancesRes {
                block_hash,
                balances,
            })
        });

    // POST /tx/add - admit a pre-signed TX to the mempool
    let tx_add = warp::path!("tx" / "add")
        .and(warp::post())
        .and(warp::body::json())
        .and(node_filter.clone())
        .map(|tx: SignedTx, node: Arc<Node>| {
            match node.add_pending_tx(tx, "http") {
                Ok(()) => reply_ok(&TxAddRes {
                    block_hash: node.latest_block_hash(),
                }),
                Err(err) => reply_err(err),
            }
        });

    // GET /node/status - chain tip and known peers
    let status = warp::path!("node" / "status")
        .and(warp::get())
        .and(node_filter.clone())
        .map(|node: Arc<Node>| reply_ok(&node.status_res()));

    // GET /node/sync?fromBlock=<hex> - every block strictly after that hash
    let sync = warp::path!("node" / "sync")
        .and(warp::get())
        .and(warp::query::<SyncQuery>())
        .and(node_filter.clone())
        .map(|query: SyncQuery, node: Arc<Node>| {
            let from = match Hash::from_hex(&query.from_block) {
                Ok(hash) => hash,
                Err(err) => return reply_err(err),
            };
            match state::blocks_after(node.data_dir(), from) {
                Ok(blocks) => reply_ok(&SyncRes { blocks }),
                Err(err) => reply_err(err),
            }
        });

    // GET /node/peer?ip=..&port=..&miner=.. - register the calling peer
    let add_peer = warp::path!("node" / "peer")
        .and(warp::get())
        .and(warp::query::<AddPeerQuery>())
        .and(node_filter.clone())
        .map(|query: AddPeerQuery, node: Arc<Node>| {
            let peer = PeerNode::new(&query.ip, query.port, false, query.miner, true);
            node.add_peer(peer);
            reply_ok(&AddPeerRes { success: true })
        });

    balances.or(tx_add).or(status).or(sync).or(add_peer)
}
