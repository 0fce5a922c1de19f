//! Hand-off from the scheduler to the code that runs a task.

use std::sync::Arc;

use async_trait::async_trait;

use super::FETCH_SURGE_ALERTS_TASK;
use super::entry::ScheduleEntry;
use crate::sync::SurgeAlertSync;

/// Receives due tasks from the scheduler.
///
/// Implementations should return quickly; long work belongs on its own task.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, entry: &ScheduleEntry) -> anyhow::Result<()>;
}

/// Runs known tasks in the background on the tokio runtime.
#[derive(Debug, Clone)]
pub struct SurgeTaskDispatcher {
    sync: Arc<SurgeAlertSync>,
}

impl SurgeTaskDispatcher {
    pub fn new(sync: Arc<SurgeAlertSync>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl TaskDispatcher for SurgeTaskDispatcher {
    async fn dispatch(&self, entry: &ScheduleEntry) -> anyhow::Result<()> {
        match entry.task.as_str() {
            FETCH_SURGE_ALERTS_TASK => {
                let sync = Arc::clone(&self.sync);
                let schedule = entry.name.clone();
                tokio::spawn(async move {
                    match sync.try_run().await {
                        None => tracing::warn!(
                            schedule = %schedule,
                            "Surge alert fetch already running, skipping this run"
                        ),
                        Some(Ok(summary)) => tracing::info!(
                            schedule = %schedule,
                            created = summary.created,
                            updated = summary.updated,
                            "Scheduled surge alert fetch finished"
                        ),
                        Some(Err(e)) => tracing::error!(
                            schedule = %schedule,
                            error = %e,
                            "Scheduled surge alert fetch failed"
                        ),
                    }
                });
                Ok(())
            }
            other => anyhow::bail!("No handler registered for task {other}"),
        }
    }
}
