// crates/server/src/state.rs
//! Application state for the Axum server.
//!
//! Everything is constructed once at startup and handed to the HTTP layer
//! by reference — no lazily initialized globals.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, ConfigError};
use crate::jobs::{InlineInventory, InventorySource, JobController, LogHub, SecretStore};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub config: Arc<Config>,
    /// The job engine: lifecycle, log hub, and secret store live behind it.
    pub controller: JobController,
}

impl AppState {
    /// Build the full service graph with the built-in inline inventory
    /// resolver, wrapped in an `Arc` for sharing.
    pub fn new(config: Config) -> Result<Arc<Self>, ConfigError> {
        Self::with_inventory(config, Arc::new(InlineInventory))
    }

    /// Build with an externally provided inventory source (workspace-backed
    /// deployments, tests).
    pub fn with_inventory(
        config: Config,
        inventory: Arc<dyn InventorySource>,
    ) -> Result<Arc<Self>, ConfigError> {
        let config = Arc::new(config);
        let controller = JobController::new(
            config.clone(),
            Arc::new(LogHub::new()),
            Arc::new(SecretStore::new()),
            inventory,
        )?;
        Ok(Arc::new(Self {
            start_time: Instant::now(),
            config,
            controller,
        }))
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
