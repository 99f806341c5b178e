use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mirrorview::config::{LogFormat, MirrorviewConfig};
use mirrorview::http::{app, cors_layer, AdmissionMiddleware, AppState, HttpServer};

/// MirrorView API server.
#[derive(Parser, Debug)]
#[command(name = "mirrorview", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log output format, overriding the configuration
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = MirrorviewConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.server.http_addr = listen;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging.level, config.logging.format);

    info!("Starting MirrorView API");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let admission = Arc::new(
        AdmissionMiddleware::from_config(&config.admission)
            .context("Failed to configure admission control")?,
    );
    let origins = config.server.allowed_origins();
    info!(origins = ?origins, "CORS origins configured");

    let router = app(AppState::default(), admission, cors_layer(&origins));

    HttpServer::new(config.server.http_addr, router)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("MirrorView API stopped");
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Pretty => builder.init(),
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
