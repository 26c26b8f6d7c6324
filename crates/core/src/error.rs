// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// An operation name that is not one of the supported verbs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown operation: {0}")]
pub struct ParseOperationError(pub String);

/// A status string that does not name a job status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown job status: {0}")]
pub struct ParseStatusError(pub String);

/// Errors raised while turning a request into a command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("{field} must not be empty")]
    EmptyLocation { field: &'static str },

    #[error("{field} must not start with '-': {value}")]
    InvalidLocation { field: &'static str, value: String },

    #[error("Operation {0} is not run by the transfer tool")]
    NotATransfer(String),

    #[error("No paths given")]
    NoPaths,
}

/// Errors that can occur while running an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture {stream} of {program}")]
    MissingPipe {
        program: PathBuf,
        stream: &'static str,
    },

    #[error("Failed waiting for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Process supervisor task ended unexpectedly: {0}")]
    Supervisor(String),
}

impl ProcessError {
    pub fn launch(program: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Failed to determine cache directory")]
    NoCacheDir,
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}
