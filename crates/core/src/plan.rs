// crates/core/src/plan.rs
//! Turns a job request into the argument vector of an external tool.
//!
//! Locations are passed through verbatim as separate arguments. The only
//! check is that none of them can be mistaken for a flag.

use std::path::{Path, PathBuf};

use crate::config::{ArchiverConfig, TransferConfig};
use crate::error::PlanError;
use crate::process::TransferCommand;
use crate::types::Operation;

/// Reject empty locations and anything the tool would parse as an option.
pub fn validate_location(field: &'static str, value: &str) -> Result<(), PlanError> {
    if value.trim().is_empty() {
        return Err(PlanError::EmptyLocation { field });
    }
    if value.starts_with('-') {
        return Err(PlanError::InvalidLocation {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Command builder for the transfer tool (copy/move/sync/check).
#[derive(Debug, Clone)]
pub struct TransferTool {
    program: PathBuf,
    global_args: Vec<String>,
}

impl TransferTool {
    pub fn new(program: impl Into<PathBuf>, global_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            global_args,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(&config.program, config.global_args.clone())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `<program> <verb> <source> <destination> <global args...>`
    pub fn command(
        &self,
        operation: Operation,
        source: &str,
        destination: &str,
    ) -> Result<TransferCommand, PlanError> {
        let verb = operation
            .transfer_verb()
            .ok_or_else(|| PlanError::NotATransfer(operation.to_string()))?;
        validate_location("source", source)?;
        validate_location("destination", destination)?;

        Ok(TransferCommand::new(&self.program)
            .arg(verb)
            .arg(source)
            .arg(destination)
            .args(self.global_args.iter().cloned()))
    }
}

/// Command builder for the archiving step of a download preparation.
#[derive(Debug, Clone)]
pub struct Archiver {
    program: PathBuf,
}

impl Archiver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &ArchiverConfig) -> Self {
        Self::new(&config.program)
    }

    /// `<program> -czf <artifact> -- <paths...>`
    pub fn command(&self, artifact: &Path, paths: &[String]) -> Result<TransferCommand, PlanError> {
        if paths.is_empty() {
            return Err(PlanError::NoPaths);
        }
        for path in paths {
            validate_location("path", path)?;
        }
        Ok(TransferCommand::new(&self.program)
            .arg("-czf")
            .arg(artifact.display().to_string())
            .arg("--")
            .args(paths.iter().cloned()))
    }
}
