//! Tether CLI tools: identity inspection and interactive sync sessions.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tether_client::{MemoryStore, SyncEngine};
use tether_common::{ControlMessage, IdentitySeed, SeedEngineKind, SyncConfig};
use tether_crypto::{normalize_seed, IdentityKeypair, SeedDeriver};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Tether preference sync tools")]
struct Args {
    /// Sync config file (JSON)
    #[arg(short, long, env = "TETHER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Relay URL; replaces the configured list. Repeatable.
    #[arg(long = "relay", global = true)]
    relays: Vec<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the public key an identity seed maps to
    Identity {
        /// Seed parts, joined in order
        #[arg(short, long, required = true, num_args = 1..)]
        seed: Vec<String>,
    },

    /// Run a sync session: stdin JSON lines are published, received
    /// fragments are printed as control messages
    Run {
        /// Seed parts, joined in order
        #[arg(short, long, required = true, num_args = 1..)]
        seed: Vec<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tether_common::init_tracing_with_default(&args.log_level);

    match &args.command {
        Command::Identity { seed } => {
            let engine = if args.config.is_some() {
                load_config(&args)?.seed_engine
            } else {
                SeedEngineKind::default()
            };
            let deriver = match engine {
                SeedEngineKind::Native => SeedDeriver::native(),
                SeedEngineKind::Hash => SeedDeriver::hash_only(),
            };
            let derived = deriver.derive(&normalize_seed(seed));
            let keypair = IdentityKeypair::from_seed(&derived)
                .context("seed does not map to a valid identity")?;
            println!("{}", keypair.public_key());
        }
        Command::Run { seed } => {
            let config = load_config(&args)?;
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(run_session(config, IdentitySeed::from(seed.clone())))?;
        }
        Command::Version => {
            println!("tether {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let Some(path) = &args.config else {
        bail!("no config file: pass --config or set TETHER_CONFIG");
    };
    let mut config = SyncConfig::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    if !args.relays.is_empty() {
        config.relays = args.relays.clone();
        config.validate().context("invalid --relay override")?;
    }
    Ok(config)
}

fn print_line(msg: &ControlMessage) {
    println!("{}", msg.to_json());
}

async fn run_session(config: SyncConfig, seed: IdentitySeed) -> Result<()> {
    let engine = SyncEngine::start(config, Arc::new(MemoryStore::new()))?;
    let mut fragments = engine.fragments();
    let mut errors = engine.errors();

    engine.init(seed).await?;
    let public_key = tokio::select! {
        key = engine.ready() => key.context("sync session stopped")?,
        Ok(message) = errors.recv() => bail!("session setup failed: {message}"),
    };
    print_line(&ControlMessage::READY { public_key });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match serde_json::from_str::<Value>(&line) {
                    Ok(data) => {
                        if let Err(e) = engine.push_update(data).await {
                            warn!("update rejected: {}", e);
                        }
                    }
                    Err(e) => warn!("ignoring stdin line: {}", e),
                },
                None => break,
            },
            fragment = fragments.recv() => match fragment {
                Ok(data) => print_line(&ControlMessage::SYNC_RECEIVED { data }),
                Err(RecvError::Lagged(n)) => warn!("skipped {} fragments", n),
                Err(RecvError::Closed) => break,
            },
            err = errors.recv() => match err {
                Ok(message) => print_line(&ControlMessage::ERROR { message }),
                Err(RecvError::Lagged(n)) => warn!("skipped {} errors", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.shutdown().await;
    Ok(())
}
