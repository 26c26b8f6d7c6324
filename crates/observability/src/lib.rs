// crates/observability/src/lib.rs
//! Tracing subscriber setup for the ferry binary.
//!
//! Console output always; a daily-rolling file under `logging.dir` when one
//! is configured. `RUST_LOG` wins over the configured filter.

use std::path::PathBuf;

use ferry_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

pub const DEFAULT_FILTER: &str = "warn,ferry=info,ferry_server=info,ferry_db=info,ferry_core=info";

const LOG_FILE_PREFIX: &str = "ferry.log";

#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("Failed to prepare log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid log filter {directive:?}: {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] TryInitError),
}

/// `RUST_LOG` if set, else the configured directive, else [`DEFAULT_FILTER`].
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ObservabilityError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = config.filter.as_deref().unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directive).map_err(|e| ObservabilityError::InvalidFilter {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ObservabilityError> {
    let filter = build_env_filter(config)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().compact().with_writer(std::io::stderr).boxed()
    });

    let mut guard = None;
    if let Some(dir) = &config.dir {
        std::fs::create_dir_all(dir).map_err(|source| ObservabilityError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(if config.json {
            fmt::layer().json().with_ansi(false).with_writer(writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        });
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;

    if let Some(dir) = &config.dir {
        tracing::info!(dir = %dir.display(), "file logging enabled");
    }
    Ok(guard)
}
