use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::block::{Block, BlockFs, is_valid_block_hash};
use crate::config::{BLOCK_REWARD, TX_FEE};
use crate::error::ChainError;
use crate::genesis::{Genesis, write_genesis_to_disk};
use crate::transaction::SignedTx;
use crate::types::{Address, Hash};

const DATABASE_DIR: &str = "database";
const GENESIS_FILE: &str = "genesis.json";
const BLOCKS_FILE: &str = "block.db";

pub fn database_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_DIR)
}

pub fn genesis_path(data_dir: &Path) -> PathBuf {
    database_dir(data_dir).join(GENESIS_FILE)
}

pub fn blocks_db_path(data_dir: &Path) -> PathBuf {
    database_dir(data_dir).join(BLOCKS_FILE)
}

/// Create the data directory skeleton on first start: a canonical genesis
/// file and an empty block log.
pub fn init_data_dir(data_dir: &Path) -> Result<(), ChainError> {
    fs::create_dir_all(database_dir(data_dir))?;

    let genesis = genesis_path(data_dir);
    if !genesis.exists() {
        write_genesis_to_disk(&genesis)?;
    }

    let blocks = blocks_db_path(data_dir);
    if !blocks.exists() {
        File::create(&blocks)?;
    }
    Ok(())
}

/// The authoritative ledger state: balances and per-account nonces derived
/// by replaying the append-only block log. The log is the source of truth;
/// everything in memory is reconstructible from it.
pub struct State {
    balances: HashMap<Address, u64>,
    account_nonces: HashMap<Address, u64>,
    latest_block: Block,
    latest_block_hash: Hash,
    has_genesis: bool,
    // None for read-only copies; exactly one writer owns the log.
    db_file: Option<File>,
}

impl State {
    /// Seed balances from genesis, then replay every log record through
    /// `apply_block`. Any parse, I/O, or validation failure aborts startup.
    pub fn open(data_dir: &Path) -> Result<Self, ChainError> {
        init_data_dir(data_dir)?;

        let genesis = Genesis::load(&genesis_path(data_dir))?;

        let db_file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(blocks_db_path(data_dir))?;

        let mut state = State {
            balances: genesis.balances,
            account_nonces: HashMap::new(),
            latest_block: Block::default(),
            latest_block_hash: Hash::zero(),
            has_genesis: false,
            db_file: None,
        };

        let mut replayed = 0u64;
        {
            let reader = BufReader::new(&db_file);
            for line in reader.lines() {
                let line = line?;
                // A blank tail line marks the end of the intact log.
                if line.trim().is_empty() {
                    break;
                }
                let record: BlockFs = serde_json::from_str(&line)?;
                state.apply_block(&record.block)?;
                replayed += 1;
            }
        }

        info!(
            "state loaded: {} blocks replayed, latest hash {}",
            replayed, state.latest_block_hash
        );
        state.db_file = Some(db_file);
        Ok(state)
    }

    pub fn latest_block(&self) -> &Block {
        &self.latest_block
    }

    pub fn latest_block_hash(&self) -> Hash {
        self.latest_block_hash
    }

    pub fn has_genesis_block(&self) -> bool {
        self.has_genesis
    }

    pub fn next_block_number(&self) -> u64 {
        if self.has_genesis {
            self.latest_block.header.number + 1
        } else {
            0
        }
    }

    pub fn balances(&self) -> &HashMap<Address, u64> {
        &self.balances
    }

    pub fn balance(&self, account: &Address) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// The nonce the next TX from `account` must carry.
    pub fn next_account_nonce(&self, account: &Address) -> u64 {
        self.account_nonces.get(account).copied().unwrap_or(0) + 1
    }

    /// Deep copy of balances, nonces, and chain metadata. The copy does not
    /// share the log handle and cannot persist blocks.
    pub fn copy(&self) -> State {
        State {
            balances: self.balances.clone(),
            account_nonces: self.account_nonces.clone(),
            latest_block: self.latest_block.clone(),
            latest_block_hash: self.latest_block_hash,
            has_genesis: self.has_genesis,
            db_file: None,
        }
    }

    /// Validate `block` against a pending copy; on success append the
    /// `{hash, block}` record to the log and adopt the copy. Any validation
    /// failure leaves state unchanged.
    pub fn add_block(&mut self, block: Block) -> Result<Hash, ChainError> {
        if self.db_file.is_none() {
            return Err(ChainError::Io(std::io::Error::other(
                "block log is not writable on a state copy",
            )));
        }

        let mut pending = self.copy();
        let hash = pending.apply_block(&block)?;

        let record = BlockFs { hash, block };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let file = self.db_file.as_mut().ok_or_else(|| {
            ChainError::Io(std::io::Error::other(
                "block log is not writable on a state copy",
            ))
        })?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        info!(
            "persisted block {} at height {}",
            hash, record.block.header.number
        );

        self.balances = pending.balances;
        self.account_nonces = pending.account_nonces;
        self.latest_block = pending.latest_block;
        self.latest_block_hash = pending.latest_block_hash;
        self.has_genesis = true;
        Ok(hash)
    }

    /// Sequential `add_block`; aborts on the first failure.
    pub fn add_blocks(&mut self, blocks: Vec<Block>) -> Result<(), ChainError> {
        for block in blocks {
            self.add_block(block)?;
        }
        Ok(())
    }

    /// Validate and apply one block directly to this state. Used by the log
    /// replay and by `add_block` through a pending copy.
    fn apply_block(&mut self, block: &Block) -> Result<Hash, ChainError> {
        if self.has_genesis {
            let expected = self.latest_block.header.number + 1;
            if block.header.number != expected {
                return Err(ChainError::BadBlockNumber {
                    expected,
                    got: block.header.number,
                });
            }
        }

        if self.has_genesis
            && self.latest_block.header.number > 0
            && block.header.parent != self.latest_block_hash
        {
            return Err(ChainError::BadParent {
                expected: self.latest_block_hash,
                got: block.header.parent,
            });
        }

        let hash = block.hash()?;
        if !is_valid_block_hash(&hash) {
            return Err(ChainError::BadPow);
        }

        let mut txs = block.payload.clone();
        txs.sort_by_key(|signed| signed.tx.time); // stable
        for signed in &txs {
            self.apply_tx(signed)?;
        }

        let reward = BLOCK_REWARD.saturating_add(block.payload.len() as u64 * TX_FEE);
        let miner_balance = self.balances.entry(block.header.miner).or_insert(0);
        *miner_balance = miner_balance.saturating_add(reward);

        self.latest_block = block.clone();
        self.latest_block_hash = hash;
        self.has_genesis = true;
        Ok(hash)
    }

    /// Validate and apply one TX. Exported so the node can pre-validate
    /// mempool candidates against a pending state copy.
    pub fn apply_tx(&mut self, signed: &SignedTx) -> Result<(), ChainError> {
        if !signed.is_authentic() {
            return Err(ChainError::Forged);
        }

        let expected = self.next_account_nonce(&signed.tx.from);
        if signed.tx.nonce != expected {
            return Err(ChainError::BadNonce {
                expected,
                got: signed.tx.nonce,
            });
        }

        let balance = self.balance(&signed.tx.from);
        let cost = signed.tx.value.saturating_add(TX_FEE);
        if cost > balance {
            return Err(ChainError::InsufficientBalance { cost, balance });
        }

        self.balances.insert(signed.tx.from, balance - cost);
        let to_balance = self.balances.entry(signed.tx.to).or_insert(0);
        *to_balance = to_balance.saturating_add(signed.tx.value);
        self.account_nonces.insert(signed.tx.from, signed.tx.nonce);
        Ok(())
    }

    /// Drop the log handle. Further `add_block` calls fail.
    pub fn close(&mut self) {
        self.db_file = None;
    }
}

/// Every block strictly after the record whose hash equals `from`, reading
/// the log with its own read-only handle. The zero hash selects the whole
/// chain.
pub fn blocks_after(data_dir: &Path, from: Hash) -> Result<Vec<Block>, ChainError> {
    let file = File::open(blocks_db_path(data_dir))?;
    let reader = BufReader::new(file);

    let mut collecting = from.is_zero();
    let mut blocks = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            break;
        }
        let record: BlockFs = serde_json::from_str(&line)?;
        if collecting {
            blocks.push(record.block);
        } else if record.hash == from {
            collecting = true;
        }
    }
    Ok(blocks)
}
