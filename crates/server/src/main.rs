// crates/server/src/main.rs
//! Ferry server binary.
//!
//! Recovers jobs orphaned by the previous run, invalidates its download
//! tokens and artifacts, then serves the API until Ctrl-C or SIGTERM. On the way out
//! it deletes outstanding artifacts and stops every live transfer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ferry_core::FerryConfig;
use ferry_db::Database;
use ferry_server::{create_app, init_metrics, AppState};

#[derive(Debug, Parser)]
#[command(name = "ferry", version, about = "File-transfer job server")]
struct Cli {
    /// TOML config file (defaults to $FERRY_CONFIG if set)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut FerryConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(db) = self.db {
            config.storage.db_path = Some(db);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = FerryConfig::load(cli.config.as_deref()).context("loading config")?;
    cli.apply(&mut config);

    let _log_guard =
        ferry_observability::init_tracing(&config.logging).context("initialising logging")?;
    init_metrics();

    eprintln!("\nferry v{}\n", env!("CARGO_PKG_VERSION"));

    let db_path = config.db_path()?;
    let db = Database::new(&db_path)
        .await
        .with_context(|| format!("opening database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "job store ready");

    let state = AppState::from_config(db.clone(), &config)?;

    let recovered = state.orchestrator.recover_on_start().await?;
    if !recovered.is_empty() {
        eprintln!("  {} interrupted job(s) from the previous run", recovered.len());
    }
    state.stager.recover_on_start().await?;
    let sweeper = state
        .stager
        .spawn_sweeper(config.download.sweep_interval());

    let app = create_app(state.clone());
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");
    eprintln!("  \u{2192} http://{addr}\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    sweeper.abort();
    state.stager.shutdown().await;
    state.orchestrator.shutdown().await;
    db.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
