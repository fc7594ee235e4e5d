use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use concord_core::*;
use secp256k1::SecretKey;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "concord-cli")]
#[command(about = "Concord Core CLI - transaction tooling and local block execution")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the public key and address for a secret key
    Account {
        /// Secret key (hex, 32 bytes)
        #[arg(short, long)]
        secret: String,
    },

    /// Sign a transaction and print its wire bytes (hex)
    SignTx {
        /// Secret key of the acting account (hex, 32 bytes)
        #[arg(short, long)]
        secret: String,

        /// Transaction JSON: {"validator":0,"nonce":0,"payload":{"Transfer":{...}}}
        #[arg(short, long)]
        tx: String,
    },

    /// Decode wire bytes (hex) and print the transaction
    DecodeTx {
        #[arg(short, long)]
        bytes: String,
    },

    /// Run one block (prepare, process, finalize, commit) over a genesis config
    RunBlock {
        /// Node config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// File with one hex-encoded transaction per line
        #[arg(short, long)]
        txs: PathBuf,

        /// Proposer address (defaults to the first genesis validator)
        #[arg(short, long)]
        proposer: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Account { secret } => {
            init_tracing("warn");
            handle_account(secret)
        }
        Commands::SignTx { secret, tx } => {
            init_tracing("warn");
            handle_sign_tx(secret, tx)
        }
        Commands::DecodeTx { bytes } => {
            init_tracing("warn");
            handle_decode_tx(bytes)
        }
        Commands::RunBlock {
            config,
            txs,
            proposer,
        } => handle_run_block(config, txs, proposer),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// `RUST_LOG` wins over the configured default.
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_secret(secret: &str) -> anyhow::Result<SecretKey> {
    let raw = hex::decode(secret.trim()).context("secret key is not hex")?;
    SecretKey::from_slice(&raw).context("invalid secret key")
}

fn handle_account(secret: String) -> anyhow::Result<()> {
    let key = parse_secret(&secret)?;
    let pubkey = public_key_hex(&key);
    println!("Public Key: {}", pubkey);
    println!("Address: {}", address_from_pubkey(&pubkey)?);
    Ok(())
}

fn handle_sign_tx(secret: String, tx_json: String) -> anyhow::Result<()> {
    let key = parse_secret(&secret)?;
    let tx: Transaction = serde_json::from_str(&tx_json).context("invalid transaction JSON")?;
    let raw = tx.sign(&key)?.encode()?;
    println!("{}", hex::encode(&raw));
    Ok(())
}

fn handle_decode_tx(bytes: String) -> anyhow::Result<()> {
    let raw = hex::decode(bytes.trim()).context("transaction bytes are not hex")?;
    let tx = Transaction::decode(&raw)?;
    println!("Type: {}", tx.tx_type());
    println!("Hash: {}", Transaction::hash_of(&raw));
    println!("Signing Hash: {}", hex::encode(tx.signing_hash()?));
    println!("{}", serde_json::to_string_pretty(&tx)?);
    Ok(())
}

fn read_tx_file(path: &Path) -> anyhow::Result<Vec<Bytes>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(i, line)| {
            hex::decode(line)
                .map(Bytes::from)
                .with_context(|| format!("line {}: not hex", i + 1))
        })
        .collect()
}

fn handle_run_block(
    config_path: PathBuf,
    txs_path: PathBuf,
    proposer: Option<String>,
) -> anyhow::Result<()> {
    let config = NodeConfig::load(&config_path)?;
    init_tracing(&config.log_filter);

    let txs = read_tx_file(&txs_path)?;
    let app = App::from_config(&config)?;
    let proposer = match proposer {
        Some(p) => p,
        None => match config.genesis.accounts.iter().find(|a| a.power > 0) {
            Some(account) => address_from_pubkey(&account.pubkey)?,
            None => bail!("genesis has no validator to propose"),
        },
    };
    let height = app.info().last_height + 1;

    let prepared = app.prepare_proposal(PrepareProposalRequest {
        height,
        proposer: proposer.clone(),
        txs,
        max_tx_bytes: -1,
    });
    println!("Prepared: {} transaction(s)", prepared.txs.len());

    let processed = app.process_proposal(ProcessProposalRequest {
        height,
        proposer: proposer.clone(),
        txs: prepared.txs.clone(),
    });
    if !processed.is_accepted() {
        bail!("proposal rejected by validation");
    }

    let finalized = app.finalize_block(FinalizeBlockRequest {
        height,
        proposer,
        txs: prepared.txs,
        vote_code: processed.vote_code,
    })?;
    let committed = app.commit()?;

    println!("Vote Code: {}", VoteCode::try_from(processed.vote_code)?);
    println!("{}", serde_json::to_string_pretty(&finalized)?);
    println!("Height: {}", committed.height);
    println!("App Hash: {}", hex::encode(committed.app_hash));
    Ok(())
}
