//! keyfob - unseal your vault with a finger or a tag
//!
//! usage:
//!   keyfob init --key-shares 5         # initialize, seal shares behind factors
//!   keyfob unseal                      # submit shares, one factor at a time
//!   keyfob generate-root               # regenerate the root token
//!   keyfob enroll                      # register a new finger (fingerprint only)
//!
//! state lives in --data-dir (default: current directory): the key file,
//! the share record or tag manifest, and the software device backends.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

use keyfob::device::software::{SoftwareFinger, SoftwareTag};
use keyfob::{Coordinator, FingerVault, HttpSealedClient, ShareVault, TokenVault, UnsealOutcome};

/// which physical factor gates the shares
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum FactorKind {
    /// fingerprint sensor, shares in a flat record file
    Finger,
    /// proximity tag reader, shares chunked onto tag blocks
    Token,
}

#[derive(Parser)]
#[command(name = "keyfob")]
#[command(about = "physical-factor gated unseal key custody")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// vault address
    #[arg(long, default_value = "http://127.0.0.1:8200")]
    address: String,

    /// physical factor variant
    #[arg(long, value_enum, default_value = "finger")]
    factor: FactorKind,

    /// directory for the key file, record and device state
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize the vault and seal its shares behind physical factors
    Init {
        /// number of key shares (threshold equals this: all are required)
        #[arg(long, default_value_t = 5)]
        key_shares: u32,
    },

    /// submit shares until the vault unseals
    Unseal,

    /// regenerate the root token via the nonce/otp ceremony
    GenerateRoot,

    /// register a new finger (fingerprint factor only)
    Enroll,
}

fn key_path(data_dir: &Path) -> PathBuf {
    data_dir.join("keyfob.key")
}

fn run_operation<V: ShareVault>(
    command: &Commands,
    api: HttpSealedClient,
    vault: V,
    data_dir: &Path,
) -> keyfob::Result<()> {
    let mut coord = Coordinator::new(api, vault, &key_path(data_dir));
    match command {
        Commands::Init { key_shares } => {
            let root_token = coord.init(*key_shares)?;
            println!("Vault initialized and shares stored.");
            // shown exactly once; it is not recoverable afterwards
            println!("Root token: {root_token}");
        }
        Commands::Unseal => match coord.unseal()? {
            UnsealOutcome::Unsealed { submissions } => {
                println!("Vault is unsealed! ({submissions} shares submitted)");
            }
            UnsealOutcome::ExhaustedNoQuorum { attempted, failed } => {
                return Err(keyfob::Error::Protocol(format!(
                    "quorum not reached: {attempted} shares attempted, {failed} failed"
                )));
            }
        },
        Commands::GenerateRoot => {
            let generated = coord.generate_root()?;
            println!("Root token generation complete, to get the decoded token run:");
            println!(
                "  vault operator generate-root -decode={} -otp={}",
                generated.encoded_token, generated.otp
            );
        }
        Commands::Enroll => unreachable!("enroll handled before dispatch"),
    }
    Ok(())
}

fn run(cli: Cli) -> keyfob::Result<()> {
    std::fs::create_dir_all(&cli.data_dir)
        .map_err(|e| keyfob::Error::Storage(e.to_string()))?;

    // enroll never touches the network
    if let Commands::Enroll = cli.command {
        if cli.factor != FactorKind::Finger {
            return Err(keyfob::Error::Protocol(
                "enroll only applies to the fingerprint factor".into(),
            ));
        }
        let device = SoftwareFinger::open(&cli.data_dir.join("templates.json"))?;
        let mut vault = FingerVault::new(device, &cli.data_dir.join("keyfob-shares.json"));
        match vault.enroll()? {
            keyfob::EnrollOutcome::AlreadyEnrolled { position } => {
                println!("Fingerprint already exists at position #{position}");
            }
            keyfob::EnrollOutcome::Enrolled { position } => {
                println!("Fingerprint enrolled successfully at position #{position}!");
            }
        }
        return Ok(());
    }

    let api = HttpSealedClient::new(&cli.address)?;
    match cli.factor {
        FactorKind::Finger => {
            let device = SoftwareFinger::open(&cli.data_dir.join("templates.json"))?;
            let vault = FingerVault::new(device, &cli.data_dir.join("keyfob-shares.json"));
            run_operation(&cli.command, api, vault, &cli.data_dir)
        }
        FactorKind::Token => {
            let reader = SoftwareTag::open(&cli.data_dir.join("tags"))?;
            let vault = TokenVault::new(reader, &cli.data_dir.join("keyfob-manifest.json"));
            run_operation(&cli.command, api, vault, &cli.data_dir)
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyfob=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("operation failed: {e}");
        eprintln!("Operation failed: {e}");
        std::process::exit(1);
    }
}
