//! mentorctl: diagnostics for the mentor SDK
//!
//! - `simulate`: run one profile write against an in-memory store with
//!   indexing lag and print every reconciliation transition
//! - `resolve`: canonicalize and expiry-check a JSON dump of entities
//! - `check-config`: validate a config file and print the effective values

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mentor_sdk::{
    canonicalize, expiry, Clock, Entity, IdempotencyKey, LogicalKey, MemoryStore,
    ReconcileStatus, Reconciler, RecordKind, RecordReader, SdkConfig, SystemClock, WriteRequest,
};
use mentor_sdk::store::{MemoryStoreConfig, WriteScript};

#[derive(Parser)]
#[command(name = "mentorctl")]
#[command(about = "Diagnostics for mentorship record reconciliation")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "MENTOR_SDK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "MENTOR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate a profile write against a lagging in-memory store
    Simulate(SimulateArgs),
    /// Canonicalize entities from a JSON file
    Resolve(ResolveArgs),
    /// Validate configuration and print effective values
    CheckConfig,
}

#[derive(Args)]
struct SimulateArgs {
    /// Wallet owning the profile
    #[arg(long, default_value = "0x00000000000000000000000000000000000000aa")]
    wallet: String,

    /// Display name written to the profile
    #[arg(long, default_value = "Ada")]
    display_name: String,

    /// Queries that miss the write before it is indexed
    #[arg(long, default_value_t = 3)]
    lag: u64,

    /// Override the poll interval
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Report a receipt timeout carrying only a transaction reference
    #[arg(long)]
    receipt_timeout: bool,

    /// Reject the write
    #[arg(long, conflicts_with = "receipt_timeout")]
    reject: bool,
}

#[derive(Args)]
struct ResolveArgs {
    /// JSON array of entities
    file: PathBuf,

    /// Record kind (profile, skill, ask, offer, lite_post, ...)
    #[arg(long)]
    kind: String,

    /// Keep expired ephemeral records
    #[arg(long)]
    include_expired: bool,

    /// Evaluate expiry at this instant (epoch ms) instead of now
    #[arg(long)]
    now_ms: Option<i64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("mentor_sdk={0},mentorctl={0}", cli.log_level).into()
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(cli.json_logs.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!cli.json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let config = match &cli.config {
        Some(path) => {
            info!("Config file: {}", path.display());
            SdkConfig::load(path)?
        }
        None => SdkConfig::default(),
    };

    match cli.command {
        Command::Simulate(args) => simulate(config, args).await,
        Command::Resolve(args) => resolve(args),
        Command::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn simulate(mut config: SdkConfig, args: SimulateArgs) -> anyhow::Result<()> {
    if let Some(interval_ms) = args.interval_ms {
        config.poll.interval_ms = interval_ms;
        config.poll.max_duration_ms = config.poll.max_duration_ms.max(interval_ms);
    }

    let store = Arc::new(MemoryStore::new(MemoryStoreConfig {
        index_lag_queries: args.lag,
        reject_type: None,
    }));
    if args.receipt_timeout {
        store
            .script([WriteScript::ReceiptTimeout {
                with_entity_key: false,
                with_tx_reference: true,
            }])
            .await;
    }
    if args.reject {
        store
            .script([WriteScript::Reject("simulated rejection".into())])
            .await;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    info!(
        lag = args.lag,
        interval_ms = config.poll.interval_ms,
        max_attempts = config.poll.max_attempts,
        "Starting simulation"
    );
    let reconciler = Reconciler::new(store.clone(), config, Arc::clone(&clock))?;

    let key = LogicalKey::profile(&args.wallet)?;
    let request = WriteRequest::new(
        key.clone(),
        IdempotencyKey::new([args.wallet.as_str(), RecordKind::Profile.as_str()]),
    )
    .with_attribute("displayName", args.display_name.as_str())
    .with_json_payload(&serde_json::json!({ "displayName": args.display_name }))?;

    let handle = reconciler.track_write(request)?;
    let mut updates = handle.subscribe();
    loop {
        let record = updates.borrow_and_update().clone();
        println!("{}", serde_json::to_string(&record)?);
        if record.status.is_terminal() || updates.changed().await.is_err() {
            break;
        }
    }

    match handle.wait().await {
        Ok(record) if record.status == ReconcileStatus::Indexed => {
            let reader = RecordReader::new(store, clock);
            let current = reader.current(&key).await?;
            println!("{}", serde_json::to_string_pretty(&current)?);
            Ok(())
        }
        Ok(record) => Err(anyhow!("simulation ended in {}", record.status)),
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            Err(anyhow!(e.user_message()))
        }
    }
}

fn resolve(args: ResolveArgs) -> anyhow::Result<()> {
    let kind = RecordKind::from_str(&args.kind)
        .ok_or_else(|| anyhow!("unknown record kind '{}'", args.kind))?;
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let entities: Vec<Entity> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.file.display()))?;

    let now_ms = args.now_ms.unwrap_or_else(|| SystemClock.now_ms());
    let records: Vec<_> = canonicalize(kind, &entities)
        .iter()
        .map(|entity| expiry::expiring(kind, entity, now_ms))
        .filter(|record| args.include_expired || !kind.is_ephemeral() || record.is_live)
        .collect();

    info!(kind = %kind, input = entities.len(), output = records.len(), "Resolved entities");
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
