// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use ferry_core::{ConfigError, FerryConfig};
use ferry_db::Database;

use crate::download::DownloadStager;
use crate::jobs::{JobOrchestrator, OrchestratorSettings, ProgressBroadcaster};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job Store handle.
    pub db: Database,
    /// Owns job lifecycles and the live-process map.
    pub orchestrator: JobOrchestrator,
    /// Prepares archives and redeems download tokens.
    pub stager: DownloadStager,
    /// Per-job SSE feeds.
    pub broadcaster: ProgressBroadcaster,
}

impl AppState {
    pub fn new(
        db: Database,
        orchestrator: JobOrchestrator,
        stager: DownloadStager,
        broadcaster: ProgressBroadcaster,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            orchestrator,
            stager,
            broadcaster,
        })
    }

    /// Wire every component from configuration. Does not run recovery or
    /// start background tasks.
    pub fn from_config(db: Database, config: &FerryConfig) -> Result<Arc<Self>, ConfigError> {
        let orchestrator =
            JobOrchestrator::new(db.clone(), OrchestratorSettings::from_config(config));
        let stager = DownloadStager::new(
            orchestrator.clone(),
            config.staging_dir()?,
            config.download.token_ttl(),
        );
        let broadcaster = ProgressBroadcaster::new(db.clone(), config.stream.interval());
        Ok(Self::new(db, orchestrator, stager, broadcaster))
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("uptime_secs", &self.uptime_secs())
            .field("orchestrator", &self.orchestrator)
            .field("stager", &self.stager)
            .finish()
    }
}
