//! bcwallet: SPV Bitcoin wallet command line.
//!
//! Usage:
//!   bcwallet generate <NAME>                  # new keypair under NAME
//!   bcwallet list                             # names and addresses
//!   bcwallet export <NAME>                    # WIF private key
//!   bcwallet balance                          # sync and show balances
//!   bcwallet send <NAME> <ADDRESS> <AMOUNT>   # pay AMOUNT BTC from NAME
//!   bcwallet block <HASH>                     # show a stored merkleblock

use anyhow::Context;
use clap::{Parser, Subcommand};
use spv_wallet::{
    format_amount, parse_amount, to_display_hex, JsonFileStore, Network, Secp256k1Keys, TcpConnector, Wallet,
    WalletConfig,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Minimal SPV Bitcoin wallet talking directly to one peer.
#[derive(Parser, Debug)]
#[command(name = "bcwallet", version, about = "Minimal SPV Bitcoin wallet")]
struct Cli {
    /// TOML configuration file; defaults apply when it is missing.
    #[arg(long, default_value = "bcwallet.toml", global = true)]
    config: PathBuf,

    /// Network to use (testnet or mainnet).
    #[arg(long, global = true)]
    network: Option<Network>,

    /// Peer host to connect to.
    #[arg(long, global = true)]
    peer: Option<String>,

    /// Peer port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// File holding the named keypairs.
    #[arg(long, global = true)]
    keys_file: Option<PathBuf>,

    /// File holding the synced chain state.
    #[arg(long, global = true)]
    data_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new address under NAME.
    Generate { name: String },

    /// List named addresses.
    List,

    /// Export the private key of NAME.
    Export { name: String },

    /// Sync with the peer and show balances.
    Balance,

    /// Send AMOUNT BTC from NAME to ADDRESS.
    Send {
        name: String,
        address: String,
        amount: String,
    },

    /// Show a stored merkleblock.
    Block { hash: String },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bcwallet: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<WalletConfig> {
    let mut config = WalletConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(network) = cli.network {
        config.network = network;
    }
    if let Some(peer) = &cli.peer {
        config.peer = Some(peer.clone());
    }
    if let Some(port) = cli.port {
        config.port = Some(port);
    }
    if let Some(keys_file) = &cli.keys_file {
        config.keys_file = keys_file.clone();
    }
    if let Some(data_file) = &cli.data_file {
        config.data_file = data_file.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let store = JsonFileStore::new(&config.keys_file, &config.data_file);
    let keys = Secp256k1Keys::new(config.network);
    let connector = TcpConnector::new(config.timeout());
    let mut wallet = Wallet::new(store, keys, connector, config);

    match cli.command {
        Command::Generate { name } => {
            let address = wallet.generate(&name)?;
            println!("new Bitcoin address \"{}\" generated: {}", name, address);
        }
        Command::List => {
            let addresses = wallet.list()?;
            if addresses.is_empty() {
                println!("No addresses available");
            }
            for (name, address) in addresses {
                println!("{}: {}", name, address);
            }
        }
        Command::Export { name } => {
            // fail on unknown names before prompting
            let wif = wallet.export(&name)?;
            if confirm(&format!(
                "Are you sure you want to export private key for \"{}\"? (yes/no): ",
                name
            ))? {
                println!("{}", wif);
            }
        }
        Command::Balance => {
            let balances = wallet.balance()?;
            if balances.is_empty() {
                println!("No addresses available");
            }
            for balance in balances {
                println!("{}: {} BTC", balance.name, format_amount(balance.satoshis));
            }
        }
        Command::Send { name, address, amount } => {
            let amount = parse_amount(&amount)?;
            let mut prompt_error = None;
            let sent = wallet.send(&name, &address, amount, |prepared| {
                let question = format!(
                    "Are you sure you want to send {} BTC (fee {} BTC) from \"{}\" to {}? (yes/no): ",
                    format_amount(prepared.amount),
                    format_amount(prepared.fee),
                    prepared.name,
                    prepared.destination
                );
                confirm(&question).unwrap_or_else(|e| {
                    prompt_error = Some(e);
                    false
                })
            })?;
            if let Some(e) = prompt_error {
                return Err(e);
            }
            match sent {
                Some(txid) => println!("transaction {} sent", to_display_hex(&txid)),
                None => println!("cancelled"),
            }
        }
        Command::Block { hash } => {
            println!("{}", wallet.block(&hash)?);
        }
    }
    Ok(())
}

/// Ask on stderr, read one line from stdin
fn confirm(question: &str) -> anyhow::Result<bool> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{}", question)?;
    stderr.flush()?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("reading confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y"))
}
