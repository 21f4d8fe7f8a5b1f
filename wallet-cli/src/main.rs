mod commands;
mod wallet;

use clap::Parser;
use commands::{Commands, ConfigCommands};
use tinychain_config::Config;

#[derive(Parser)]
#[command(name = "tinychain-wallet")]
#[command(about = "tinychain CLI wallet", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::NewAccount { datadir } => commands::new_account(datadir),
        Commands::Balance { address } => commands::get_balance(&address),
        Commands::Send {
            from,
            to,
            value,
            nonce,
            data,
            datadir,
        } => commands::send_transaction(from, to, value, nonce, data, datadir),
        Commands::Config { subcommand } => {
            match subcommand {
                ConfigCommands::View => Config::load().view(),
                ConfigCommands::Set { key, value } => {
                    let mut cfg = Config::load();
                    cfg.set_value(&key, &value);
                }
                ConfigCommands::Init => Config::init_default(),
            }
            Ok(())
        }
    }
}
