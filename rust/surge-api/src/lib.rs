//! Surge API - IFRC surge alert synchronization service
//!
//! Pulls surge alerts, countries and molnix tags from the IFRC GO API into a
//! local SQLite store on a database-defined schedule, and serves them over
//! HTTP.
//!
//! # Architecture
//!
//! - [`scheduler`]: schedule definitions, due-time evaluation and the
//!   periodic loop that dispatches due tasks
//! - [`sync`]: paginated walker over the IFRC endpoint and the per-record
//!   reconciler
//! - [`database`]: SQLite store for schedules, alerts and run status
//! - [`api`]: HTTP endpoints (schedules, alerts, status, health)
//! - [`config`]: layered configuration and startup validation
//!
//! # Example
//!
//! ```rust,ignore
//! use surge_api::{config::AppConfig, server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     server::serve(config).await
//! }
//! ```

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod server;
pub mod sync;

use std::sync::Arc;

use config::AppConfig;
use database::Database;
use sync::SurgeAlertSync;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// SQLite store.
    pub db: Database,
    /// Surge alert sync, shared with the scheduler so runs never overlap.
    pub sync: Arc<SurgeAlertSync>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("db", &self.db)
            .field("sync", &self.sync)
            .finish()
    }
}
