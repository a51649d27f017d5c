use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use pagebridge_cli::metrics::render_metrics;
use pagebridge_cli::{load_config, BridgeConfig, BridgeHost, InstrumentationSession};
use pagebridge_core_types::{Envelope, Generation};
use telemetry_tap::{export_har, JsonFileStore, SnapshotStore};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("PAGEBRIDGE_GIT_HASH"),
    ", built ",
    env!("PAGEBRIDGE_BUILD_DATE"),
    ")"
);

/// pagebridge - instrumentation bridge for embedded documents
#[derive(Parser)]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// DevTools websocket of the host shell's document process
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Run against the in-process emulated document
    #[arg(long)]
    emulated: bool,

    /// Initial location of the emulated document
    #[arg(long, default_value = "about:blank")]
    emulated_url: String,

    /// How long to wait for a document to attach and load
    #[arg(long, default_value_t = 10_000)]
    attach_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm the document and print telemetry as it is drained
    Watch(WatchArgs),
    /// Run one storage query
    Query {
        /// e.g. "SELECT * FROM mydb.items"
        line: String,
    },
    /// Apply a throttle profile
    Throttle {
        profile: String,
    },
    /// List throttle profiles
    Profiles,
    /// Evaluate an expression in the document
    Eval {
        expression: String,
    },
    /// Write the persisted request history as HAR
    Export(ExportArgs),
    /// Check whether a resource loads from the document
    Probe {
        url: String,
    },
    /// Delete the persisted telemetry history
    Clear,
}

#[derive(Args)]
struct WatchArgs {
    /// Stop after this many seconds; runs until Ctrl-C otherwise
    #[arg(long)]
    seconds: Option<u64>,

    /// Print Prometheus metrics on exit
    #[arg(long)]
    metrics: bool,
}

#[derive(Args)]
struct ExportArgs {
    /// Output directory
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug)?;
    info!("Starting pagebridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(cli.config.as_deref()).await?;
    if let Some(url) = &cli.ws_url {
        config.cdp.websocket_url = Some(url.clone());
    }

    let result = match cli.command {
        Commands::Profiles => cmd_profiles(&config),
        Commands::Export(args) => cmd_export(args, &config),
        Commands::Clear => cmd_clear(&config),
        command => {
            let timeout = Duration::from_millis(cli.attach_timeout_ms);
            let host = build_host(config, cli.emulated, &cli.emulated_url).await?;
            let outcome = run_document_command(&host, command, timeout).await;
            host.shutdown().await;
            outcome
        }
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

async fn build_host(config: BridgeConfig, emulated: bool, emulated_url: &str) -> Result<BridgeHost> {
    if emulated || config.cdp.websocket_url.is_none() {
        if !emulated {
            warn!("No DevTools websocket configured; running against the emulated document");
        }
        return BridgeHost::emulated(config, emulated_url);
    }
    BridgeHost::connect(config).await
}

async fn run_document_command(host: &BridgeHost, command: Commands, timeout: Duration) -> Result<()> {
    let handle = host.wait_for_document(timeout).await?;
    let session = host.open_session(handle)?;
    if let Some(document) = host.emulated_document() {
        document.finish_load();
    }
    let generation = ensure_armed(&session, timeout).await?;
    info!(%handle, %generation, "document armed");

    match command {
        Commands::Watch(args) => cmd_watch(&session, args).await,
        Commands::Query { line } => print_envelope(&session.query(&line).await),
        Commands::Throttle { profile } => print_envelope(&session.apply_throttle(&profile).await),
        Commands::Eval { expression } => print_envelope(&session.execute(&expression).await),
        Commands::Probe { url } => print_envelope(&Envelope::from_typed(session.probe(&url).await)),
        Commands::Profiles | Commands::Export(_) | Commands::Clear => {
            bail!("command does not need a document")
        }
    }
}

/// Arms directly, retrying while the document is still loading. The
/// coordinator also arms on its own signals; whichever comes first wins and
/// the other is a no-op.
async fn ensure_armed(session: &Arc<InstrumentationSession>, wait: Duration) -> Result<Generation> {
    let deadline = Instant::now() + wait;
    loop {
        match session.arm().await {
            Ok(generation) => return Ok(generation),
            Err(err) if err.is_retriable() && Instant::now() < deadline => {
                sleep(Duration::from_millis(100)).await;
            }
            Err(err) => return Err(err).context("Failed to arm the document"),
        }
    }
}

fn print_envelope(envelope: &Envelope) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    if envelope.is_ok() {
        Ok(())
    } else {
        bail!("the document reported a failure")
    }
}

async fn cmd_watch(session: &Arc<InstrumentationSession>, args: WatchArgs) -> Result<()> {
    let mut updates = session.subscribe_telemetry();
    let stop = async {
        match args.seconds {
            Some(seconds) => sleep(Duration::from_secs(seconds)).await,
            None => {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(%err, "failed to listen for Ctrl-C");
                }
            }
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            update = updates.recv() => match update {
                Ok(update) => {
                    for record in session.requests().iter().take(update.added_requests).rev() {
                        let outcome = match &record.error {
                            Some(error) => format!("failed: {error}"),
                            None => record.status.to_string(),
                        };
                        println!("{:<6} {:<12} {:>6} ms  {}", record.method, outcome, record.duration_ms, record.url);
                    }
                    for line in session.console().iter().take(update.added_console).rev() {
                        println!("[{}] {}", line.level, line.text);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "watch output fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    if args.metrics {
        print!("{}", render_metrics()?);
    }
    Ok(())
}

fn cmd_profiles(config: &BridgeConfig) -> Result<()> {
    let mut catalog = network_throttle::ProfileCatalog::builtin();
    if let Some(path) = &config.throttle.bundle {
        let bundle = network_throttle::load_bundle_from_path(path)
            .with_context(|| format!("Failed to load throttle bundle {}", path.display()))?;
        catalog.merge_bundle(bundle).context("Invalid throttle bundle")?;
    }
    let default_id = config
        .throttle
        .default_profile
        .clone()
        .unwrap_or_else(|| catalog.default_profile().id.clone());
    for profile in catalog.list() {
        let marker = if profile.id == default_id { "*" } else { " " };
        println!("{marker} {profile}");
    }
    Ok(())
}

fn history_stores(config: &BridgeConfig) -> Result<Vec<JsonFileStore>> {
    let dir = config
        .telemetry
        .history_dir
        .as_ref()
        .context("No history directory configured")?;
    JsonFileStore::documents(dir, &config.telemetry.history_key)
        .context("Failed to list telemetry history")
}

fn cmd_export(args: ExportArgs, config: &BridgeConfig) -> Result<()> {
    let mut requests = Vec::new();
    for store in history_stores(config)? {
        let snapshot = store
            .load()
            .with_context(|| format!("Failed to read {}", store.path().display()))?
            .unwrap_or_default();
        requests.extend(snapshot.requests);
    }
    requests.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    let export = export_har(&requests, Utc::now()).context("Failed to render HAR")?;
    let path = export
        .write_to(&args.out)
        .context("Failed to write HAR file")?;
    println!("{}", path.display());
    info!(entries = requests.len(), "HAR exported");
    Ok(())
}

fn cmd_clear(config: &BridgeConfig) -> Result<()> {
    for store in history_stores(config)? {
        store
            .clear()
            .with_context(|| format!("Failed to clear {}", store.path().display()))?;
    }
    info!("telemetry history cleared");
    Ok(())
}
