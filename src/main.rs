use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slidenotes::admission::{AdmissionPipeline, Provider};
use slidenotes::config::AppConfig;
use slidenotes::files::FileBuffer;
use slidenotes::http::{router, AppState, HttpServer};
use slidenotes::provider::ProviderRegistry;
use slidenotes::store::{NotesStore, UsageStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Lecture slide summarization service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Slidenotes");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    info!(
        addr = %config.server.addr,
        usage_store = %config.storage.usage_path.display(),
        notes_store = %config.storage.notes_path.display(),
        failure_policy = ?config.admission.failure_policy,
        "Configuration loaded"
    );

    let usage = Arc::new(UsageStore::open(&config.storage.usage_path));
    let pipeline = Arc::new(AdmissionPipeline::new(usage, &config.admission));
    let _sweeper = pipeline.spawn_sweeper();
    info!("Admission pipeline initialized");

    let providers =
        ProviderRegistry::from_config(&config.providers).context("building provider clients")?;
    for provider in [Provider::Gemini, Provider::OpenRouter] {
        info!(
            provider = %provider,
            configured = providers.is_configured(&provider),
            "Provider registered"
        );
    }

    let state = AppState {
        pipeline,
        providers,
        files: Arc::new(FileBuffer::new()),
        notes: Arc::new(NotesStore::open(&config.storage.notes_path)),
    };
    let server = HttpServer::new(config.server.addr, router(state, &config.server));

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Slidenotes stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("slidenotes=info,tower_http=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
