//! Schedule execution engine.
//!
//! [`DatabaseScheduler`] keeps an in-memory set of [`ScheduleEntry`]
//! snapshots built from the schedule store. Every tick it resyncs that set
//! when it has gone stale, dispatches whatever is due and reports how long
//! the caller may sleep before the next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::defaults::{DefaultSchedule, default_beat_schedule};
use super::dispatch::TaskDispatcher;
use super::entry::{EntryOrigin, ScheduleEntry};
use crate::database::ScheduleStore;
use crate::error::StoreResult;
use crate::logging::OpTimer;

/// Default time between resyncs with the store.
pub const DEFAULT_SYNC_EVERY: Duration = Duration::from_secs(60);

/// Default upper bound on the sleep between ticks.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(300);

/// Never sleep less than this between ticks.
const MIN_SLEEP: Duration = Duration::from_secs(1);

/// Lifecycle of the scheduler within one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick.
    Idle,
    /// Rebuilding the entry set from the store.
    Syncing,
    /// Evaluating and dispatching entries.
    Armed,
}

/// Periodic scheduler whose definitions live in the database.
pub struct DatabaseScheduler {
    store: Arc<dyn ScheduleStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    defaults: Vec<DefaultSchedule>,
    sync_every: Duration,
    max_interval: Duration,
    entries: RwLock<HashMap<String, ScheduleEntry>>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    state: Mutex<SchedulerState>,
    tick_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for DatabaseScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseScheduler")
            .field("defaults", &self.defaults.len())
            .field("sync_every", &self.sync_every)
            .field("max_interval", &self.max_interval)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl DatabaseScheduler {
    /// Create a scheduler with the built-in default table.
    pub fn new(store: Arc<dyn ScheduleStore>, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            defaults: default_beat_schedule(),
            sync_every: DEFAULT_SYNC_EVERY,
            max_interval: DEFAULT_MAX_INTERVAL,
            entries: RwLock::new(HashMap::new()),
            last_sync: Mutex::new(None),
            state: Mutex::new(SchedulerState::Idle),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the fallback schedule table.
    #[must_use]
    pub fn with_defaults(mut self, defaults: Vec<DefaultSchedule>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set how often the entry set is rebuilt from the store.
    #[must_use]
    pub fn with_sync_every(mut self, sync_every: Duration) -> Self {
        self.sync_every = sync_every;
        self
    }

    /// Set the longest sleep [`tick`](Self::tick) may return.
    #[must_use]
    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Copy of the current entry set, keyed by name.
    pub async fn entries(&self) -> HashMap<String, ScheduleEntry> {
        self.entries.read().await.clone()
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }

    fn should_sync(&self, now: DateTime<Utc>) -> bool {
        match *self.last_sync.lock() {
            None => true,
            Some(last) => (now - last).to_std().is_ok_and(|elapsed| elapsed >= self.sync_every),
        }
    }

    /// Initial load. Same as a forced resync.
    pub async fn setup(&self) -> bool {
        self.sync_with_database(Utc::now()).await
    }

    /// Rebuild the entry set from the store and swap it in.
    ///
    /// Returns `false` when the store could not be read; the previous set
    /// stays active in that case.
    pub async fn sync_with_database(&self, now: DateTime<Utc>) -> bool {
        self.set_state(SchedulerState::Syncing);
        let timer = OpTimer::new("scheduler", "resync");

        let tasks = match self.store.list_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                timer.finish_with_result::<(), _>(Err(&e));
                tracing::error!(error = %e, "Schedule resync failed, keeping previous entries");
                self.set_state(SchedulerState::Idle);
                return false;
            }
        };

        let mut fresh: HashMap<String, ScheduleEntry> = tasks
            .iter()
            .map(|task| (task.name.clone(), ScheduleEntry::from_task(task)))
            .collect();

        let mut entries = self.entries.write().await;
        for default in &self.defaults {
            if fresh.contains_key(&default.key) || fresh.contains_key(&default.display_name()) {
                continue;
            }
            let entry = entries
                .get(&default.key)
                .filter(|previous| previous.origin == EntryOrigin::Fallback)
                .cloned()
                .unwrap_or_else(|| ScheduleEntry::fallback(default));
            fresh.insert(default.key.clone(), entry);
        }

        let count = fresh.len();
        *entries = fresh;
        drop(entries);
        *self.last_sync.lock() = Some(now);

        tracing::debug!(entries = count, "Schedule entries rebuilt");
        timer.finish();
        self.set_state(SchedulerState::Idle);
        true
    }

    /// Run one scheduling pass at `now`.
    ///
    /// Returns the number of seconds until the next pass is needed. Errors
    /// recording a dispatch are returned to the caller.
    pub async fn tick(&self, now: DateTime<Utc>) -> StoreResult<f64> {
        let _guard = self.tick_lock.lock().await;

        if self.should_sync(now) {
            self.sync_with_database(now).await;
        }

        self.set_state(SchedulerState::Armed);
        let result = self.dispatch_due(now).await;
        self.set_state(SchedulerState::Idle);
        result
    }

    async fn dispatch_due(&self, now: DateTime<Utc>) -> StoreResult<f64> {
        let cap = self.max_interval.min(self.sync_every).as_secs_f64();
        let mut next_check = cap;

        let names: Vec<String> = {
            let entries = self.entries.read().await;
            let mut names: Vec<String> = entries.keys().cloned().collect();
            names.sort();
            names
        };

        for name in names {
            let Some(entry) = self.entries.read().await.get(&name).cloned() else {
                continue;
            };

            let check = entry.is_due(now);
            next_check = next_check.min(check.next_check_secs);
            if !check.is_due {
                continue;
            }

            let advanced = entry.advanced(now);
            if let (EntryOrigin::Store, Some(id)) = (advanced.origin, advanced.store_id) {
                if let Some(last_run_at) = advanced.last_run_at {
                    self.store
                        .record_run(id, last_run_at, advanced.total_run_count)
                        .await?;
                }
            }
            self.entries
                .write()
                .await
                .insert(name.clone(), advanced.clone());

            tracing::info!(
                schedule = %advanced.name,
                task = %advanced.task,
                run = advanced.total_run_count,
                "Scheduler: Sending due task"
            );
            if let Err(e) = self.dispatcher.dispatch(&advanced).await {
                tracing::error!(
                    schedule = %advanced.name,
                    task = %advanced.task,
                    error = %e,
                    "Failed to dispatch task"
                );
            }
        }

        Ok(next_check.max(0.0))
    }

    /// Tick until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.setup().await;
        tracing::info!(
            sync_every_secs = self.sync_every.as_secs(),
            max_interval_secs = self.max_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            let sleep = match self.tick(Utc::now()).await {
                Ok(secs) => Duration::from_secs_f64(secs).max(MIN_SLEEP),
                Err(e) => {
                    tracing::error!(error = %e, "Scheduler tick failed");
                    self.max_interval.min(self.sync_every).max(MIN_SLEEP)
                }
            };

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(sleep) => {}
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::error::StoreError;
    use crate::scheduler::{
        CrontabSpec, FETCH_SURGE_ALERTS_TASK, IntervalSpec, NewScheduledTask, ScheduleKind,
        ScheduledTask,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskDispatcher for RecordingDispatcher {
        async fn dispatch(&self, entry: &ScheduleEntry) -> anyhow::Result<()> {
            self.sent.lock().push(entry.name.clone());
            Ok(())
        }
    }

    /// Wraps a real store and fails reads or writes on demand.
    struct FlakyStore {
        inner: Database,
        fail_list: AtomicBool,
        fail_record: AtomicBool,
        record_attempts: AtomicUsize,
    }

    impl FlakyStore {
        fn new(inner: Database) -> Self {
            Self {
                inner,
                fail_list: AtomicBool::new(false),
                fail_record: AtomicBool::new(false),
                record_attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ScheduleStore for FlakyStore {
        async fn list_tasks(&self) -> StoreResult<Vec<ScheduledTask>> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(StoreError::Corrupt("list failed".into()));
            }
            self.inner.list_tasks().await
        }

        async fn get_task(&self, id: i64) -> StoreResult<Option<ScheduledTask>> {
            self.inner.get_task(id).await
        }

        async fn find_task_by_name(&self, name: &str) -> StoreResult<Option<ScheduledTask>> {
            self.inner.find_task_by_name(name).await
        }

        async fn create_task(&self, task: NewScheduledTask) -> StoreResult<ScheduledTask> {
            self.inner.create_task(task).await
        }

        async fn update_task(
            &self,
            id: i64,
            task: NewScheduledTask,
        ) -> StoreResult<Option<ScheduledTask>> {
            self.inner.update_task(id, task).await
        }

        async fn delete_task(&self, id: i64) -> StoreResult<bool> {
            self.inner.delete_task(id).await
        }

        async fn record_run(
            &self,
            id: i64,
            last_run_at: DateTime<Utc>,
            total_run_count: u64,
        ) -> StoreResult<()> {
            self.record_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_record.load(Ordering::SeqCst) {
                return Err(StoreError::Corrupt("write failed".into()));
            }
            self.inner.record_run(id, last_run_at, total_run_count).await
        }
    }

    fn interval_task(name: &str, minutes: u32) -> NewScheduledTask {
        NewScheduledTask {
            name: name.into(),
            task: FETCH_SURGE_ALERTS_TASK.into(),
            enabled: true,
            schedule_type: ScheduleKind::Interval,
            interval: IntervalSpec {
                minutes: Some(minutes),
                ..IntervalSpec::default()
            },
            crontab: CrontabSpec::default(),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, h, m, 0).unwrap()
    }

    fn scheduler(
        store: Arc<dyn ScheduleStore>,
        dispatcher: Arc<RecordingDispatcher>,
    ) -> DatabaseScheduler {
        DatabaseScheduler::new(store, dispatcher).with_defaults(Vec::new())
    }

    #[tokio::test]
    async fn test_due_entry_is_dispatched_and_persisted() {
        let db = Database::open_in_memory().unwrap();
        let created = db.create_task(interval_task("every-ten", 10)).await.unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = scheduler(Arc::new(db.clone()), Arc::clone(&dispatcher));

        let sleep = sched.tick(at(9, 0)).await.unwrap();
        assert_eq!(*dispatcher.sent.lock(), vec!["every-ten".to_string()]);
        assert_eq!(sleep, 60.0);

        let row = db.get_task(created.id).await.unwrap().unwrap();
        assert_eq!(row.total_run_count, 1);
        assert_eq!(row.last_run_at, Some(at(9, 0)));

        // Not due again until ten minutes have passed
        sched.tick(at(9, 5)).await.unwrap();
        assert_eq!(dispatcher.sent.lock().len(), 1);
        sched.tick(at(9, 10)).await.unwrap();
        assert_eq!(dispatcher.sent.lock().len(), 2);
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_disabled_entry_is_skipped() {
        let db = Database::open_in_memory().unwrap();
        let mut def = interval_task("off", 1);
        def.enabled = false;
        db.create_task(def).await.unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = scheduler(Arc::new(db), Arc::clone(&dispatcher));

        sched.tick(at(9, 0)).await.unwrap();
        assert!(dispatcher.sent.lock().is_empty());
        assert!(sched.entries().await.contains_key("off"));
    }

    #[tokio::test]
    async fn test_sleep_is_capped_by_max_interval() {
        let db = Database::open_in_memory().unwrap();
        db.create_task(interval_task("daily", 24 * 60)).await.unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = scheduler(Arc::new(db), dispatcher)
            .with_sync_every(Duration::from_secs(3_600))
            .with_max_interval(Duration::from_secs(120));

        sched.tick(at(0, 0)).await.unwrap();
        let sleep = sched.tick(at(0, 1)).await.unwrap();
        assert_eq!(sleep, 120.0);
    }

    #[tokio::test]
    async fn test_resync_failure_keeps_previous_entries() {
        let db = Database::open_in_memory().unwrap();
        db.create_task(interval_task("kept", 5)).await.unwrap();
        let store = Arc::new(FlakyStore::new(db));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = scheduler(Arc::clone(&store) as Arc<dyn ScheduleStore>, dispatcher);

        assert!(sched.sync_with_database(at(1, 0)).await);
        store.fail_list.store(true, Ordering::SeqCst);
        assert!(!sched.sync_with_database(at(1, 2)).await);

        let entries = sched.entries().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("kept"));
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_resync_is_full_replace() {
        let db = Database::open_in_memory().unwrap();
        let doomed = db.create_task(interval_task("doomed", 5)).await.unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = scheduler(Arc::new(db.clone()), dispatcher);

        sched.sync_with_database(at(1, 0)).await;
        db.delete_task(doomed.id).await.unwrap();
        db.create_task(interval_task("fresh", 5)).await.unwrap();
        sched.sync_with_database(at(1, 1)).await;

        let entries = sched.entries().await;
        assert!(!entries.contains_key("doomed"));
        assert!(entries.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_record_failure_propagates() {
        let db = Database::open_in_memory().unwrap();
        db.create_task(interval_task("broken", 5)).await.unwrap();
        let store = Arc::new(FlakyStore::new(db));
        store.fail_record.store(true, Ordering::SeqCst);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = scheduler(store, Arc::clone(&dispatcher));

        assert!(sched.tick(at(3, 0)).await.is_err());
        assert!(dispatcher.sent.lock().is_empty());
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_fallback_used_only_when_store_lacks_it() {
        let db = Database::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = DatabaseScheduler::new(Arc::new(db.clone()), dispatcher);

        sched.sync_with_database(at(2, 0)).await;
        let entries = sched.entries().await;
        let fallback = entries.get("fetch-surge-alerts-every-hour").unwrap();
        assert_eq!(fallback.origin, EntryOrigin::Fallback);

        crate::scheduler::init_scheduler(&db, &default_beat_schedule())
            .await
            .unwrap();
        sched.sync_with_database(at(2, 1)).await;
        let entries = sched.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries.get("Fetch Surge Alerts Every Hour").unwrap().origin,
            EntryOrigin::Store
        );
    }

    #[tokio::test]
    async fn test_fallback_run_state_survives_resync() {
        let db = Database::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = DatabaseScheduler::new(Arc::new(db), dispatcher.clone());

        // top of the hour matches the default crontab
        sched.tick(at(5, 0)).await.unwrap();
        assert_eq!(dispatcher.sent.lock().len(), 1);

        sched.sync_with_database(at(5, 0)).await;
        sched.tick(at(5, 0)).await.unwrap();
        assert_eq!(dispatcher.sent.lock().len(), 1);

        let entry = sched
            .entries()
            .await
            .remove("fetch-surge-alerts-every-hour")
            .unwrap();
        assert_eq!(entry.total_run_count, 1);
    }

    /// Sleep in one-second steps of (paused) time until `cond` holds.
    async fn eventually(cond: impl Fn() -> bool) -> bool {
        for _ in 0..600 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        cond()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_failed_tick_and_stops_on_cancel() {
        let db = Database::open_in_memory().unwrap();
        db.create_task(interval_task("every-minute", 1)).await.unwrap();
        let store = Arc::new(FlakyStore::new(db));
        store.fail_record.store(true, Ordering::SeqCst);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let sched = Arc::new(
            scheduler(
                Arc::clone(&store) as Arc<dyn ScheduleStore>,
                Arc::clone(&dispatcher),
            )
            .with_sync_every(Duration::from_secs(10)),
        );

        let shutdown = CancellationToken::new();
        let runner = Arc::clone(&sched);
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { runner.run(token).await });

        // The failed write ends the tick but not the loop: the entry stays
        // due and is retried after the sleep.
        assert!(eventually(|| store.record_attempts.load(Ordering::SeqCst) >= 2).await);
        assert!(dispatcher.sent.lock().is_empty());

        store.fail_record.store(false, Ordering::SeqCst);
        assert!(eventually(|| !dispatcher.sent.lock().is_empty()).await);
        assert_eq!(dispatcher.sent.lock()[0], "every-minute");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop after cancellation")
            .unwrap();
        assert_eq!(sched.state(), SchedulerState::Idle);
    }
}
