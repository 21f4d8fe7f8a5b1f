use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChainError;
use crate::types::Address;

/// Seeded on first start when no genesis file exists yet.
pub const DEFAULT_GENESIS_JSON: &str = r#"{
  "genesis_time": "2024-01-01T00:00:00.000000000Z",
  "chain_id": "tinychain-main",
  "balances": {
    "0x22ba1f80452e6220c7cc6ea2d1e3eeddac5f694a": 1000000
  }
}"#;

/// Initial balances of the chain. Unknown top-level fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    pub genesis_time: DateTime<Utc>,
    pub chain_id: String,
    pub balances: HashMap<Address, u64>,
}

impl Genesis {
    pub fn load(path: &Path) -> Result<Self, ChainError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

pub fn write_genesis_to_disk(path: &Path) -> Result<(), ChainError> {
    fs::write(path, DEFAULT_GENESIS_JSON)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_genesis_parses() {
        let genesis: Genesis = serde_json::from_str(DEFAULT_GENESIS_JSON).unwrap();
        assert_eq!(genesis.chain_id, "tinychain-main");
        assert_eq!(genesis.balances.values().sum::<u64>(), 1_000_000);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{
            "genesis_time": "2024-01-01T00:00:00Z",
            "chain_id": "test",
            "symbol": "TIN",
            "fork_blocks": {"frontier": 0},
            "balances": {"0x22ba1f80452e6220c7cc6ea2d1e3eeddac5f694a": 7}
        }"#;
        let genesis: Genesis = serde_json::from_str(json).unwrap();
        assert_eq!(genesis.balances.len(), 1);
        assert_eq!(genesis.balances.values().sum::<u64>(), 7);
    }
}
