//! Surge alert synchronization.
//!
//! [`SurgeAlertSync`] walks the paginated IFRC endpoint from the configured
//! start URL, hands every page to the [`Reconciler`] and records the run in
//! `api_status` whether or not the walk reached the last page.

pub mod client;
pub mod payload;
pub mod reconcile;

pub use client::{HttpPageSource, PageSource};
pub use payload::Page;
pub use reconcile::{PageTally, Reconciler, RecordOutcome};

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::database::Database;
use crate::error::SyncError;
use crate::logging::OpTimer;

/// Job name under which runs are recorded in `api_status`.
pub const SURGE_ALERTS_JOB: &str = "surge_alerts";

/// Default start URL.
pub const DEFAULT_API_URL: &str = "https://goadmin.ifrc.org/api/v2/surge_alert/";

/// Counts of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: u64,
    pub updated: u64,
}

/// One paginated walk over the surge alert endpoint.
pub struct SurgeAlertSync {
    source: Arc<dyn PageSource>,
    reconciler: Reconciler,
    db: Database,
    start_url: String,
    run_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SurgeAlertSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurgeAlertSync")
            .field("start_url", &self.start_url)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl SurgeAlertSync {
    pub fn new(source: Arc<dyn PageSource>, db: Database, start_url: impl Into<String>) -> Self {
        Self {
            source,
            reconciler: Reconciler::new(db.clone()),
            db,
            start_url: start_url.into(),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    /// Walk every page and reconcile its records.
    ///
    /// A page that cannot be fetched or decoded ends the walk early; pages
    /// already written stay written. Only a failure to record the run
    /// status is returned as an error. Concurrent calls run one after the
    /// other.
    pub async fn run(&self) -> Result<SyncSummary, SyncError> {
        let _guard = self.run_lock.lock().await;
        self.walk().await
    }

    /// Like [`run`](Self::run), but returns `None` at once when another run
    /// is in progress instead of waiting for it.
    pub async fn try_run(&self) -> Option<Result<SyncSummary, SyncError>> {
        let _guard = self.run_lock.try_lock().ok()?;
        Some(self.walk().await)
    }

    async fn walk(&self) -> Result<SyncSummary, SyncError> {
        let timer = OpTimer::new("sync", "fetch_surge_alerts");
        tracing::info!(url = %self.start_url, "Starting surge alert data fetch");

        let mut summary = SyncSummary::default();
        let mut next_page = Some(self.start_url.clone());

        while let Some(url) = next_page.take() {
            tracing::info!(url = %url, "Fetching data");
            let page = match self.source.fetch_page(&url).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(url = %url, error = %e, "Error fetching data from API");
                    break;
                }
            };

            next_page = page.next_url().map(str::to_string);
            let tally = self.reconciler.process_page(page.results).await;
            summary.created += tally.created;
            summary.updated += tally.updated;
            if tally.skipped > 0 {
                tracing::warn!(url = %url, skipped = tally.skipped, "Some records were skipped");
            }
        }

        let status = self.db.touch_api_status(SURGE_ALERTS_JOB, Utc::now()).await;
        timer.finish_with_result(status.as_ref());
        status?;

        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            "Completed surge alert data fetch"
        );
        Ok(summary)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticPages;
    use super::*;
    use serde_json::json;

    const START: &str = "https://api.test/surge_alert/";

    fn alert(id: i64) -> serde_json::Value {
        json!({"id": id, "message": format!("alert {id}"), "molnix_tags": []})
    }

    #[tokio::test]
    async fn test_walks_all_pages() {
        let db = Database::open_in_memory().unwrap();
        let pages = StaticPages::default()
            .with_page(START, json!({"results": [alert(1), alert(2)], "next": "https://api.test/p2"}))
            .with_page("https://api.test/p2", json!({"results": [alert(3)], "next": null}));
        let sync = SurgeAlertSync::new(Arc::new(pages), db.clone(), START);

        let first = sync.run().await.unwrap();
        assert_eq!(first, SyncSummary { created: 3, updated: 0 });

        let second = sync.run().await.unwrap();
        assert_eq!(second, SyncSummary { created: 0, updated: 3 });
        assert!(db.api_status(SURGE_ALERTS_JOB).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_stops_walk_and_still_records_status() {
        let db = Database::open_in_memory().unwrap();
        let pages = Arc::new(
            StaticPages::default()
                .with_page(START, json!({"results": [alert(1), alert(2)], "next": "https://api.test/p2"}))
                .with_page("https://api.test/p3", json!({"results": [alert(9)], "next": null})),
        );
        let sync = SurgeAlertSync::new(Arc::clone(&pages) as Arc<dyn PageSource>, db.clone(), START);

        let before = Utc::now();
        let summary = sync.run().await.unwrap();
        assert_eq!(summary.created + summary.updated, 2);
        assert_eq!(pages.requested.lock().len(), 2);
        assert!(db.get_alert(9).await.unwrap().is_none());

        let last_run = db.api_status(SURGE_ALERTS_JOB).await.unwrap().unwrap();
        assert!(last_run >= before);
    }

    #[tokio::test]
    async fn test_undecodable_first_page_records_empty_run() {
        let db = Database::open_in_memory().unwrap();
        let pages = StaticPages::default().with_page(START, json!({"results": "nope"}));
        let sync = SurgeAlertSync::new(Arc::new(pages), db.clone(), START);

        assert_eq!(sync.run().await.unwrap(), SyncSummary::default());
        assert!(db.api_status(SURGE_ALERTS_JOB).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_serialized() {
        let db = Database::open_in_memory().unwrap();
        let pages = StaticPages::default().with_page(START, json!({"results": [alert(1)]}));
        let sync = Arc::new(SurgeAlertSync::new(Arc::new(pages), db, START));

        let (a, b) = tokio::join!(sync.run(), sync.run());
        let mut created = [a.unwrap().created, b.unwrap().created];
        created.sort_unstable();
        assert_eq!(created, [0, 1]);
    }

    /// Holds every fetch until the gate opens.
    struct GatedPages {
        started: tokio::sync::Notify,
        gate: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl PageSource for GatedPages {
        async fn fetch_page(&self, _url: &str) -> Result<Page, SyncError> {
            self.started.notify_one();
            self.gate.notified().await;
            Ok(Page::default())
        }
    }

    #[tokio::test]
    async fn test_try_run_skips_while_busy() {
        let db = Database::open_in_memory().unwrap();
        let pages = Arc::new(GatedPages {
            started: tokio::sync::Notify::new(),
            gate: tokio::sync::Notify::new(),
        });
        let sync = Arc::new(SurgeAlertSync::new(
            Arc::clone(&pages) as Arc<dyn PageSource>,
            db,
            START,
        ));

        let busy = Arc::clone(&sync);
        let first = tokio::spawn(async move { busy.run().await });
        pages.started.notified().await;

        assert!(sync.try_run().await.is_none());

        pages.gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), SyncSummary::default());

        pages.gate.notify_one();
        let idle = sync.try_run().await;
        assert_eq!(idle.unwrap().unwrap(), SyncSummary::default());
    }
}
