use std::collections::HashMap;
use std::io::{self, Write as _};
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tinychain_config::Config;
use tinychain_core::{Address, Tx};

use crate::wallet;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new password-protected account in the keystore
    NewAccount {
        #[arg(long)]
        datadir: Option<PathBuf>,
    },

    /// Check the balance of an address against the configured node
    Balance { address: Address },

    /// Sign a transfer with a keystore key and broadcast it to the node
    Send {
        #[arg(long)]
        from: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        value: u64,
        #[arg(long, help = "Next nonce for the sender (first TX uses 1)")]
        nonce: u64,
        #[arg(long, default_value = "")]
        data: String,
        #[arg(long)]
        datadir: Option<PathBuf>,
    },

    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
pub enum ConfigCommands {
    View,
    Set { key: String, value: String },
    Init,
}

fn resolve_data_dir(datadir: Option<PathBuf>) -> PathBuf {
    datadir.unwrap_or_else(|| Config::load().data_dir_resolved())
}

fn prompt_password(confirm: bool) -> Result<String> {
    print!("Password: ");
    io::stdout().flush()?;
    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }

    if confirm {
        print!("Repeat password: ");
        io::stdout().flush()?;
        let mut again = String::new();
        io::stdin().read_line(&mut again)?;
        if password != again.trim_end_matches(['\r', '\n']) {
            return Err(anyhow!("passwords do not match"));
        }
    }
    Ok(password)
}

pub fn new_account(datadir: Option<PathBuf>) -> Result<()> {
    let data_dir = resolve_data_dir(datadir);
    let password = prompt_password(true)?;
    let address = wallet::new_account(&data_dir, &password)?;

    println!("New account created: {}", address);
    println!("Keystore: {}", wallet::keystore_dir(&data_dir).display());
    Ok(())
}

#[derive(Deserialize)]
struct BalancesRes {
    block_hash: String,
    balances: HashMap<Address, u64>,
}

pub fn get_balance(address: &Address) -> Result<()> {
    let cfg = Config::load();
    let url = format!("{}/balances/list", cfg.node_url);
    let res: BalancesRes = Client::new().get(&url).send()?.json()?;

    let balance = res.balances.get(address).copied().unwrap_or(0);
    println!(
        "Balance of {}: {} (at block {})",
        address, balance, res.block_hash
    );
    Ok(())
}

pub fn send_transaction(
    from: Address,
    to: Address,
    value: u64,
    nonce: u64,
    data: String,
    datadir: Option<PathBuf>,
) -> Result<()> {
    let data_dir = resolve_data_dir(datadir);
    let password = prompt_password(false)?;
    let wallet = wallet::load(&data_dir, &from, &password)?;

    let tx = Tx::new(from, to, value, nonce, &data);
    let signed = wallet.sign(tx)?;

    let cfg = Config::load();
    let url = format!("{}/tx/add", cfg.node_url);
    let res = Client::new().post(&url).json(&signed).send()?;

    let status = res.status();
    let body: Value = res.json().unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(anyhow!(
            "node rejected the transaction: {}",
            body["error"].as_str().unwrap_or("unknown error")
        ));
    }

    println!(
        "Transaction accepted (latest block {})",
        body["block_hash"].as_str().unwrap_or("?")
    );
    Ok(())
}
