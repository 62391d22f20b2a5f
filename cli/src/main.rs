// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CardVault CLI
//!
//! Entry point for the `cardvault` binary. Parses arguments, layers flags
//! over the config file, initializes logging, and runs one subcommand:
//!
//! - `provision` — seal a key under a PIN and print the card link
//! - `decode`    — show what a card link carries
//! - `encode`    — build a card link from its parts
//! - `balance`   — query a card's balance from the ledger
//! - `send`      — unlock a card and send ether
//! - `history`   — offline send against a simulated ledger
//! - `version`   — print build version information

mod cli;
mod logging;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};

use cardvault_protocol::bridge::OfflineTransport;
use cardvault_protocol::catalogue::StaticCatalogue;
use cardvault_protocol::codec::{self, id_to_text, CardCredential};
use cardvault_protocol::config::{WalletConfig, CIPHER_BLOB_VERSION};
use cardvault_protocol::ledger::{JsonRpcLedger, LedgerClient, MockLedger};
use cardvault_protocol::session::{JsonFileStore, MemoryStore, SnapshotStore};
use cardvault_protocol::tag::MemoryTag;
use cardvault_protocol::transaction::{
    format_ether, parse_ether, TransactionRecord, TransactionStatus, TxHash,
};
use cardvault_protocol::{CardWallet, Collaborators};

use cli::{CardVaultCli, Commands, GlobalArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CardVaultCli::parse();
    logging::init_logging(logging::DEFAULT_FILTER, cli.global.log_format);

    match cli.command {
        Commands::Provision(args) => provision(&cli.global, args).await,
        Commands::Decode(args) => decode(args),
        Commands::Encode(args) => encode(&cli.global, args),
        Commands::Balance(args) => balance(&cli.global, args).await,
        Commands::Send(args) => send(&cli.global, args).await,
        Commands::History(args) => history(&cli.global, args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Config file (or defaults) with flag and environment overrides applied.
fn load_config(global: &GlobalArgs) -> Result<WalletConfig> {
    let mut config = match &global.config {
        Some(path) => WalletConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => WalletConfig::default(),
    };
    if let Some(url) = &global.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(chain_id) = global.chain_id {
        config.chain_id = chain_id;
    }
    config.validate().context("invalid wallet configuration")?;
    Ok(config)
}

/// A wallet with no peer relay, no reader and an empty catalogue.
fn build_wallet(config: WalletConfig, ledger: Arc<dyn LedgerClient>) -> CardWallet {
    let store: Arc<dyn SnapshotStore> = match &config.snapshot_path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };
    CardWallet::new(
        config,
        Collaborators {
            ledger,
            store,
            transport: Arc::new(OfflineTransport),
            tag: Arc::new(MemoryTag::default()),
            catalogue: Arc::new(StaticCatalogue::new()),
        },
    )
}

fn rpc_ledger(config: &WalletConfig) -> Result<Arc<dyn LedgerClient>> {
    let ledger = JsonRpcLedger::new(config.rpc_url.clone())
        .with_context(|| format!("failed to build ledger client for {}", config.rpc_url))?;
    Ok(Arc::new(ledger))
}

fn parse_card(text: &str) -> Result<CardCredential> {
    codec::decode_card_url(text).context("card link is malformed")
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn provision(global: &GlobalArgs, args: cli::ProvisionArgs) -> Result<()> {
    let config = load_config(global)?;
    let wallet = build_wallet(config, Arc::new(MockLedger::new()));

    let credential = match &args.key {
        Some(key) => wallet.provision(key, &args.pin.pin, args.id).await,
        None => wallet.provision_generated(&args.pin.pin, args.id).await,
    }
    .context("failed to provision card")?;

    let address = credential
        .address()
        .address()
        .context("provisioned card has no resolvable address")?;
    tracing::info!(card_id = args.id, %address, "card provisioned");

    print_json(&json!({
        "id": credential.id(),
        "idText": id_to_text(credential.id()),
        "address": address.to_checksum(),
        "link": wallet.encode_card_url(&credential),
    }))
}

fn decode(args: cli::DecodeArgs) -> Result<()> {
    let credential = parse_card(&args.card)?;
    let address = credential.address();
    print_json(&json!({
        "id": credential.id(),
        "idText": id_to_text(credential.id()),
        "address": address.address().map(|a| a.to_checksum()),
        "cardAddress": address.payload_text(),
        "legacy": address.is_legacy(),
        "sealedKeyBytes": credential.encrypted_key().len(),
    }))
}

fn encode(global: &GlobalArgs, args: cli::EncodeArgs) -> Result<()> {
    let config = load_config(global)?;
    let payload = format!("{}:{}:{}", args.address, args.key, id_to_text(args.id));
    let credential = parse_card(&payload)?;
    println!(
        "{}",
        codec::encode_card_url(&config.card_base_url, &credential)
    );
    Ok(())
}

async fn balance(global: &GlobalArgs, args: cli::BalanceArgs) -> Result<()> {
    let config = load_config(global)?;
    let credential = parse_card(&args.card)?;
    let Some(address) = credential.address().address() else {
        bail!("card uses a legacy address that cannot be resolved");
    };

    let ledger = rpc_ledger(&config)?;
    let wei = ledger
        .get_balance(address)
        .await
        .with_context(|| format!("balance query to {} failed", config.rpc_url))?;

    print_json(&json!({
        "address": address.to_checksum(),
        "wei": wei.to_string(),
        "ether": format_ether(wei),
    }))
}

async fn send(global: &GlobalArgs, args: cli::SendArgs) -> Result<()> {
    let config = load_config(global)?;
    let credential = parse_card(&args.card)?;
    let ledger = rpc_ledger(&config)?;
    let wallet = build_wallet(config, ledger);
    wallet.set_card(credential).await;

    let mut updates = wallet.pipeline().subscribe();
    let hash = wallet
        .send(&args.to, &args.amount, &args.pin.pin)
        .await
        .context("send failed")?;
    println!("{hash}");

    if args.wait {
        let status = wait_for_final(&wallet, &mut updates, hash).await;
        println!("{status}");
    }
    wallet.shutdown().await;
    Ok(())
}

/// Simulated ledger, generated card, one transfer, then the history.
async fn history(global: &GlobalArgs, args: cli::HistoryArgs) -> Result<()> {
    let mut config = load_config(global)?;
    config.receipt_poll_interval_ms = 200;
    config.snapshot_path = None;

    let ledger = Arc::new(MockLedger::new());
    let wallet = build_wallet(config, ledger.clone());

    let credential = wallet
        .provision_generated(&args.pin.pin, 1)
        .await
        .context("failed to provision demo card")?;
    let address = credential
        .address()
        .address()
        .context("demo card has no address")?;
    let funded = parse_ether(&args.balance).context("invalid --balance")?;
    ledger.set_balance(address, funded);
    wallet.set_card(credential).await;

    let mut updates = wallet.pipeline().subscribe();
    let hash = wallet
        .send(&args.to, &args.amount, &args.pin.pin)
        .await
        .context("demo send failed")?;
    let status = wait_for_final(&wallet, &mut updates, hash).await;
    tracing::info!(%hash, %status, "demo transfer settled");

    let history = wallet.history(address);
    print_json(&serde_json::to_value(&history)?)?;
    wallet.shutdown().await;
    Ok(())
}

/// Waits until `hash` reaches a terminal status or its watcher gives up.
async fn wait_for_final(
    wallet: &CardWallet,
    updates: &mut broadcast::Receiver<TransactionRecord>,
    hash: TxHash,
) -> TransactionStatus {
    let config = wallet.config();
    let budget = config.receipt_poll_interval() * (config.max_receipt_poll_attempts + 1);

    let waited = tokio::time::timeout(budget, async {
        loop {
            match updates.recv().await {
                Ok(record) if record.hash == hash && record.status.is_terminal() => {
                    return record.status;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "transaction updates lagged");
                }
                Err(RecvError::Closed) => return TransactionStatus::Pending,
            }
        }
    })
    .await;

    match waited {
        Ok(status) => status,
        Err(_) => wallet
            .pipeline()
            .record(hash)
            .map_or(TransactionStatus::Pending, |r| r.status),
    }
}

/// Prints version information to stdout.
fn print_version() {
    println!("cardvault {}", env!("CARGO_PKG_VERSION"));
    println!("key blob  v{CIPHER_BLOB_VERSION}");
    println!("rustc     {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn global(config: Option<std::path::PathBuf>) -> GlobalArgs {
        GlobalArgs {
            config,
            rpc_url: None,
            chain_id: None,
            log_format: logging::LogFormat::Pretty,
        }
    }

    #[test]
    fn flags_override_the_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"chainId": 137, "rpcUrl": "http://node:8545"}}"#).unwrap();

        let mut args = global(Some(file.path().to_path_buf()));
        assert_eq!(load_config(&args).unwrap().chain_id, 137);

        args.chain_id = Some(10);
        let config = load_config(&args).unwrap();
        assert_eq!(config.chain_id, 10);
        assert_eq!(config.rpc_url, "http://node:8545");
    }

    #[test]
    fn invalid_override_is_rejected() {
        let mut args = global(None);
        args.chain_id = Some(0);
        assert!(load_config(&args).is_err());
    }
}
