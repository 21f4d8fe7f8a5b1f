use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use log::info;
use tinychain_config::Config;
use tinychain_core::{Address, State};
use tinychain_node::{DEFAULT_HTTP_PORT, Node, PeerNode};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "tinychain", version)]
#[command(about = "tinychain blockchain node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the node: state engine, miner, peer sync, and the HTTP API
    Run {
        #[arg(long)]
        datadir: Option<PathBuf>,

        #[arg(long, default_value = "127.0.0.1")]
        ip: String,

        #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
        port: u16,

        #[arg(long, help = "Account credited with mining rewards")]
        miner: Address,

        #[arg(long)]
        bootstrap_ip: Option<String>,

        #[arg(long)]
        bootstrap_port: Option<u16>,

        #[arg(long)]
        bootstrap_account: Option<Address>,

        #[arg(long, default_value_t = false)]
        disable_ssl: bool,

        #[arg(long, help = "Contact e-mail for external TLS certificate tooling")]
        ssl_email: Option<String>,
    },

    /// Inspect balances in the local data directory
    Balances {
        #[command(subcommand)]
        subcommand: BalancesCommands,
    },

    /// Print the node version
    Version,
}

#[derive(Subcommand)]
enum BalancesCommands {
    /// List all balances at the latest block
    List {
        #[arg(long)]
        datadir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            datadir,
            ip,
            port,
            miner,
            bootstrap_ip,
            bootstrap_port,
            bootstrap_account,
            disable_ssl,
            ssl_email,
        } => {
            run_node(
                datadir,
                ip,
                port,
                miner,
                bootstrap_ip,
                bootstrap_port,
                bootstrap_account,
                disable_ssl,
                ssl_email,
            )
            .await
        }
        Commands::Balances {
            subcommand: BalancesCommands::List { datadir },
        } => list_balances(datadir),
        Commands::Version => {
            println!("tinychain {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn resolve_data_dir(datadir: Option<PathBuf>) -> PathBuf {
    datadir.unwrap_or_else(|| Config::load().data_dir_resolved())
}

#[allow(clippy::too_many_arguments)]
async fn run_node(
    datadir: Option<PathBuf>,
    ip: String,
    port: u16,
    miner: Address,
    bootstrap_ip: Option<String>,
    bootstrap_port: Option<u16>,
    bootstrap_account: Option<Address>,
    disable_ssl: bool,
    ssl_email: Option<String>,
) -> Result<()> {
    let data_dir = resolve_data_dir(datadir);

    let bootstrap = match (bootstrap_ip, bootstrap_port, bootstrap_account) {
        (Some(ip), Some(port), Some(account)) => {
            Some(PeerNode::new(&ip, port, true, account, false))
        }
        (None, None, None) => None,
        _ => {
            return Err(anyhow!(
                "--bootstrap-ip, --bootstrap-port and --bootstrap-account must be given together"
            ));
        }
    };

    let node = Node::new(&data_dir, &ip, port, miner, bootstrap)?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    node.run(shutdown, disable_ssl, ssl_email).await
}

fn list_balances(datadir: Option<PathBuf>) -> Result<()> {
    let data_dir = resolve_data_dir(datadir);
    let state = State::open(&data_dir)?;

    println!("Balances at block {}:", state.latest_block_hash());
    let mut entries: Vec<_> = state.balances().iter().collect();
    entries.sort();
    for (account, balance) in entries {
        println!("  {}: {}", account, balance);
    }
    Ok(())
}
