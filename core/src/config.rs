// Token economics and protocol timing for the tinychain network.

/// Reward credited to the miner of every block.
pub const BLOCK_REWARD: u64 = 100;

/// Flat fee paid by the sender of every TX, credited to the block miner.
pub const TX_FEE: u64 = 50;

/// Period of the mining ticker. A tick with a non-empty mempool starts a
/// proof-of-work attempt.
pub const MINING_INTERVAL_SECS: u64 = 10;

/// Period of the peer-polling sync ticker.
pub const SYNC_INTERVAL_SECS: u64 = 45;
