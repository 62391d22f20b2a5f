//! # CLI Interface
//!
//! Argument structure for `cardvault`, via `clap` derive. Every flag that
//! configures the wallet also reads an environment variable, and layers
//! over the JSON config file named by `--config`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::logging::LogFormat;

/// CardVault: the NFC card is the wallet.
///
/// Provision cards, inspect card links, check balances and send from a
/// card with its PIN.
#[derive(Parser, Debug)]
#[command(
    name = "cardvault",
    about = "CardVault card wallet tool",
    version,
    propagate_version = true
)]
pub struct CardVaultCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to a JSON wallet config. Flags below override its values.
    #[arg(long, short = 'c', env = "CARDVAULT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Ledger JSON-RPC endpoint.
    #[arg(long, env = "CARDVAULT_RPC_URL", global = true)]
    pub rpc_url: Option<String>,

    /// EIP-155 chain id to sign for.
    #[arg(long, env = "CARDVAULT_CHAIN_ID", global = true)]
    pub chain_id: Option<u64>,

    /// Log output format.
    #[arg(
        long,
        value_enum,
        env = "CARDVAULT_LOG_FORMAT",
        default_value_t = LogFormat::Pretty,
        global = true
    )]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seal a private key under a PIN and print the card link to write.
    Provision(ProvisionArgs),
    /// Parse a card link or payload and print what it carries.
    Decode(DecodeArgs),
    /// Build a card link from its parts.
    Encode(EncodeArgs),
    /// Query the ledger balance of a card.
    Balance(BalanceArgs),
    /// Send ether from a card.
    Send(SendArgs),
    /// Run an offline send against a simulated ledger and print the history.
    History(HistoryArgs),
    /// Print version information and exit.
    Version,
}

/// PIN source shared by commands that open a card.
#[derive(Args, Debug)]
pub struct PinArg {
    /// Card PIN. Prefer the environment variable over the flag.
    #[arg(long, env = "CARDVAULT_PIN", hide_env_values = true)]
    pub pin: String,
}

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Numeric card id.
    #[arg(long)]
    pub id: u64,

    /// Hex private key to seal. A fresh key is generated when omitted.
    #[arg(long, env = "CARDVAULT_PRIVATE_KEY", hide_env_values = true)]
    pub key: Option<String>,

    #[command(flatten)]
    pub pin: PinArg,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Card link (`https://...#payload`) or bare `address:key:id` payload.
    pub card: String,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Card address: `0x` hex or card-alphabet text.
    #[arg(long)]
    pub address: String,

    /// Sealed key blob, standard base64.
    #[arg(long)]
    pub key: String,

    /// Numeric card id.
    #[arg(long)]
    pub id: u64,
}

#[derive(Args, Debug)]
pub struct BalanceArgs {
    /// Card link or payload.
    #[arg(long, env = "CARDVAULT_CARD")]
    pub card: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Card link or payload.
    #[arg(long, env = "CARDVAULT_CARD")]
    pub card: String,

    /// Recipient address.
    #[arg(long)]
    pub to: String,

    /// Amount in ether, e.g. `0.25`.
    #[arg(long)]
    pub amount: String,

    #[command(flatten)]
    pub pin: PinArg,

    /// Wait for the transaction to confirm, fail, or time out.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Starting balance of the simulated card, in ether.
    #[arg(long, default_value = "2")]
    pub balance: String,

    /// Amount to send, in ether.
    #[arg(long, default_value = "0.5")]
    pub amount: String,

    /// Recipient address.
    #[arg(long, default_value = "0x3535353535353535353535353535353535353535")]
    pub to: String,

    #[command(flatten)]
    pub pin: PinArg,
}
