//! CLI entry point (§4.12): `run` starts the pipeline, `validate` checks a
//! config file without starting anything, `replay` feeds a file of
//! newline-delimited events through the hub using the in-memory store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use sentinel_core::classifier::HttpClassifier;
use sentinel_core::config::SentinelConfig;
use sentinel_core::engine::{Engine, ToolCatalogEngine};
use sentinel_core::engines::{CommandInjectionEngine, DataExfiltrationEngine, FileSystemExposureEngine, ToolsPoisoningEngine};
use sentinel_core::event::Event;
use sentinel_core::hub::EventHub;
use sentinel_core::persistence::InMemoryStore;
use sentinel_core::retry::RetryConfig;
use sentinel_core::source::EventSource;

#[derive(Parser)]
#[command(name = "sentinel-server")]
#[command(about = "Inline security monitor for MCP traffic")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the event pipeline and block until shutdown.
    Run {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Force JSON-formatted log output, overriding configuration.
        #[arg(long)]
        json_logs: bool,
    },
    /// Load and validate a config file without starting anything.
    Validate {
        #[arg(value_name = "FILE")]
        config: PathBuf,
    },
    /// Feed a file of newline-delimited events through the hub.
    Replay {
        #[arg(value_name = "FILE")]
        events_file: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

/// How long `run` waits for in-flight event fan-out to finish once a
/// shutdown signal arrives, before exiting anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, json_logs } => run(config, json_logs).await,
        Commands::Validate { config } => validate(config).await,
        Commands::Replay { events_file, config } => replay(events_file, config).await,
    }
}

/// Build the env-filter from `SENTINEL_LOG`, falling back to `RUST_LOG`,
/// falling back to the configured default level (§4.9).
fn init_tracing(config: &SentinelConfig, force_json: bool) {
    let filter = std::env::var("SENTINEL_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| config.logging.level.clone());
    let filter = tracing_subscriber::EnvFilter::new(filter);

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if force_json || config.logging.json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn build_engines(config: &SentinelConfig) -> (Vec<Arc<dyn Engine>>, Option<Arc<dyn ToolCatalogEngine>>) {
    let mut engines: Vec<Arc<dyn Engine>> = Vec::new();
    if config.engines.command_injection_enabled {
        engines.push(Arc::new(CommandInjectionEngine::new()));
    }
    if config.engines.filesystem_exposure_enabled {
        engines.push(Arc::new(FileSystemExposureEngine::new()));
    }
    if config.engines.data_exfiltration_enabled {
        engines.push(Arc::new(DataExfiltrationEngine::new()));
    }

    let tool_catalog_engine: Option<Arc<dyn ToolCatalogEngine>> = if config.engines.tool_poisoning_enabled {
        let retry = RetryConfig {
            max_retries: config.classifier.max_retries,
            base_delay: config.classifier.base_delay(),
            timeout: config.classifier.timeout(),
            inter_request_delay: config.classifier.inter_request_delay(),
        };
        let classifier = HttpClassifier::new(
            config.classifier.endpoint.clone(),
            config.classifier.model.clone(),
            config.classifier.api_key.clone(),
        )
        .with_retry_config(retry.clone());
        Some(Arc::new(ToolsPoisoningEngine::new(classifier).with_retry_config(retry)))
    } else {
        None
    };

    (engines, tool_catalog_engine)
}

async fn run(config_path: Option<PathBuf>, json_logs: bool) -> Result<()> {
    let config = SentinelConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_tracing(&config, json_logs);

    info!("starting sentinel event pipeline");
    if config.classifier.api_key.is_empty() {
        warn!("no classifier api key configured; tool-poisoning analysis will fail at request time");
    }

    let (engines, tool_catalog_engine) = build_engines(&config);
    let persistence = InMemoryStore::new();
    let hub = Arc::new(EventHub::new(engines, tool_catalog_engine, persistence));
    hub.start();

    let source = EventSource::new(config.source.channel_capacity);
    let (tx, mut rx) = source.channel();

    let subprocess = match &config.source.process_path {
        Some(program) => {
            info!(program = %program, "spawning source process");
            Some(source.spawn_subprocess(program, &config.source.process_args, tx.clone())?)
        }
        None => {
            info!("no source process configured; events must arrive via an external feed");
            None
        }
    };
    drop(tx);

    let hub_loop = Arc::clone(&hub);
    let drain_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            hub_loop.process_event(event).await;
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received, stopping hub");
    hub.stop();

    if let Some(handle) = subprocess {
        handle.terminate().await.ok();
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, drain_task).await.is_err() {
        warn!("grace deadline elapsed before in-flight events finished draining");
    }

    info!("sentinel event pipeline stopped");
    Ok(())
}

async fn validate(config_path: PathBuf) -> Result<()> {
    let config = SentinelConfig::load(Some(&config_path)).context("loading configuration")?;
    info!("configuration is valid");
    info!(
        command_injection = config.engines.command_injection_enabled,
        filesystem_exposure = config.engines.filesystem_exposure_enabled,
        tool_poisoning = config.engines.tool_poisoning_enabled,
        data_exfiltration = config.engines.data_exfiltration_enabled,
        "engine configuration"
    );
    if config.classifier.api_key.is_empty() {
        warn!("classifier api_key is empty — tool-poisoning analysis will fail at request time");
    }
    Ok(())
}

async fn replay(events_file: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let config = SentinelConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_tracing(&config, false);

    let (engines, tool_catalog_engine) = build_engines(&config);
    let persistence = InMemoryStore::new();
    let hub = EventHub::new(engines, tool_catalog_engine, persistence);
    hub.start();

    let file = tokio::fs::File::open(&events_file)
        .await
        .with_context(|| format!("opening {}", events_file.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut processed = 0usize;
    let mut skipped = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match Event::from_line(&line) {
            Some(event) => {
                hub.process_event(event).await;
                processed += 1;
            }
            None => {
                warn!(line = %line, "skipping malformed replay line");
                skipped += 1;
            }
        }
    }

    info!(processed, skipped, "replay complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received terminate signal"),
    }
}
