use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{Fuse, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate_in, StatisticsSnapshot};
use crate::config::Settings;
use crate::metrics::{AGGREGATION_SECONDS, INSERTS_RECEIVED_TOTAL, STORE_FAILURES_TOTAL, WORKING_SET_SIZE};
use crate::store::{InsertFeed, RecordStore, StoreError};
use crate::time_window::{TimeRange, TimeWindowSelector};
use crate::types::DetectionRecord;
use crate::working_set::{MergeOutcome, WorkingSet};

/// How often an idle window re-checks whether its start has moved.
pub const BOUND_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetRange(TimeRange),
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WindowStatus {
    Loading,
    Ready { snapshot: StatisticsSnapshot },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    pub range: TimeRange,
    pub lower_bound: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub status: WindowStatus,
    pub updated_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn snapshot(&self) -> Option<&StatisticsSnapshot> {
        match &self.status {
            WindowStatus::Ready { snapshot } => Some(snapshot),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("live analytics task has stopped")]
pub struct LiveStopped;

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub worker_id: String,
    pub fetch_timeout: Duration,
    pub debounce: Duration,
    pub command_queue_capacity: usize,
    pub bound_check_interval: Duration,
}

impl LiveOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            worker_id: settings.worker_id.clone(),
            fetch_timeout: settings.fetch_timeout,
            debounce: settings.reaggregate_debounce,
            command_queue_capacity: settings.command_queue_capacity,
            bound_check_interval: BOUND_CHECK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundCheck {
    Unchanged,
    Advanced,
    Reopen,
}

/// Cloneable front door to the running task.
#[derive(Clone)]
pub struct LiveAnalyticsHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<DashboardState>,
}

impl LiveAnalyticsHandle {
    pub async fn set_range(&self, range: TimeRange) -> Result<(), LiveStopped> {
        self.commands
            .send(Command::SetRange(range))
            .await
            .map_err(|_| LiveStopped)
    }

    pub async fn refresh(&self) -> Result<(), LiveStopped> {
        self.commands.send(Command::Refresh).await.map_err(|_| LiveStopped)
    }

    pub fn current(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DashboardState> {
        self.state.clone()
    }
}

/// Keeps a snapshot of the active window current. One task owns the working
/// set; range switches and insert notifications are both funnelled into it.
pub struct LiveAnalytics<Tz: TimeZone> {
    store: Arc<dyn RecordStore>,
    selector: TimeWindowSelector<Tz>,
    options: LiveOptions,
    state: watch::Sender<DashboardState>,
}

impl<Tz> LiveAnalytics<Tz>
where
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Display + Send + Sync,
{
    pub fn spawn(
        store: Arc<dyn RecordStore>,
        selector: TimeWindowSelector<Tz>,
        options: LiveOptions,
        initial_range: TimeRange,
        shutdown: broadcast::Receiver<()>,
    ) -> (LiveAnalyticsHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(options.command_queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(DashboardState {
            range: initial_range,
            lower_bound: None,
            status: WindowStatus::Loading,
            updated_at: Utc::now(),
        });
        let live = Self {
            store,
            selector,
            options,
            state: state_tx,
        };
        let task = tokio::spawn(live.run(initial_range, command_rx, shutdown));
        (
            LiveAnalyticsHandle {
                commands: command_tx,
                state: state_rx,
            },
            task,
        )
    }

    async fn run(
        self,
        mut range: TimeRange,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        'window: loop {
            let lower_bound = self.selector.lower_bound_for(range);
            self.publish(range, lower_bound, WindowStatus::Loading);

            let opened = tokio::select! {
                _ = shutdown.recv() => break 'window,
                opened = self.open(lower_bound) => opened,
            };
            let (mut working, mut feed) = match opened {
                Ok((working, feed)) => {
                    info!(
                        worker_id = %self.options.worker_id,
                        range = %range,
                        records = working.len(),
                        "Window opened"
                    );
                    self.publish_snapshot(range, &working);
                    (working, Some(feed))
                }
                Err(err) => {
                    warn!(worker_id = %self.options.worker_id, range = %range, error = %err, "Window unavailable");
                    self.publish(
                        range,
                        lower_bound,
                        WindowStatus::Unavailable {
                            reason: err.to_string(),
                        },
                    );
                    (WorkingSet::new(lower_bound), None)
                }
            };

            let mut ticker = time::interval(self.options.bound_check_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break 'window,
                    command = commands.recv() => match command {
                        Some(Command::SetRange(next)) => {
                            info!(worker_id = %self.options.worker_id, from = %range, to = %next, "Switching range");
                            range = next;
                            continue 'window;
                        }
                        Some(Command::Refresh) => continue 'window,
                        None => break 'window,
                    },
                    _ = ticker.tick(), if feed.is_some() => match self.follow_bound(range, &mut working) {
                        BoundCheck::Unchanged => {}
                        BoundCheck::Advanced => self.publish_snapshot(range, &working),
                        BoundCheck::Reopen => continue 'window,
                    },
                    inserted = next_insert(&mut feed) => match inserted {
                        Some(Ok(record)) => {
                            let mut changed = match self.follow_bound(range, &mut working) {
                                BoundCheck::Unchanged => false,
                                BoundCheck::Advanced => true,
                                BoundCheck::Reopen => continue 'window,
                            };
                            changed |= self.merge(&mut working, range, record);
                            if !self.options.debounce.is_zero() {
                                match self.coalesce(&mut working, range, &mut feed).await {
                                    Ok(more) => changed |= more,
                                    Err(err) => {
                                        self.feed_interrupted(range, &err);
                                        continue 'window;
                                    }
                                }
                            }
                            if changed {
                                self.publish_snapshot(range, &working);
                            }
                        }
                        Some(Err(err)) => {
                            self.feed_interrupted(range, &err);
                            continue 'window;
                        }
                        None => {
                            warn!(worker_id = %self.options.worker_id, range = %range, "Insert feed closed");
                            feed = None;
                            self.publish(
                                range,
                                working.lower_bound(),
                                WindowStatus::Unavailable {
                                    reason: "insert feed closed".to_string(),
                                },
                            );
                        }
                    },
                }
            }
        }
        info!(worker_id = %self.options.worker_id, "Live analytics stopping");
    }

    /// Subscribes before fetching so inserts racing the fetch are buffered
    /// in the feed rather than lost; the merge step dedupes the overlap.
    async fn open(&self, lower_bound: Option<DateTime<Utc>>) -> Result<(WorkingSet, Fuse<InsertFeed>), StoreError> {
        let limit = self.options.fetch_timeout;
        let feed = timeout(limit, self.store.subscribe())
            .await
            .map_err(|_| StoreError::Timeout(limit))??;
        let fetched = timeout(limit, self.store.fetch_since(lower_bound))
            .await
            .map_err(|_| StoreError::Timeout(limit))??;

        let mut working = WorkingSet::new(lower_bound);
        working.seed(fetched);
        Ok((working, feed.fuse()))
    }

    /// Re-evaluates the window start; `today` moves at midnight.
    fn follow_bound(&self, range: TimeRange, working: &mut WorkingSet) -> BoundCheck {
        let lower_bound = self.selector.lower_bound_for(range);
        if lower_bound == working.lower_bound() {
            return BoundCheck::Unchanged;
        }
        match working.advance_to(lower_bound) {
            Some(dropped) => {
                info!(
                    worker_id = %self.options.worker_id,
                    range = %range,
                    lower_bound = ?lower_bound,
                    dropped,
                    "Window start moved"
                );
                BoundCheck::Advanced
            }
            None => BoundCheck::Reopen,
        }
    }

    /// Lost or unreadable notifications leave the set incomplete; the caller
    /// re-opens the window to re-fetch it.
    fn feed_interrupted(&self, range: TimeRange, err: &StoreError) {
        STORE_FAILURES_TOTAL
            .with_label_values(&[&self.options.worker_id, "feed", err.label()])
            .inc();
        warn!(
            worker_id = %self.options.worker_id,
            range = %range,
            error = %err,
            "Insert feed interrupted; re-opening window"
        );
    }

    fn merge(&self, working: &mut WorkingSet, range: TimeRange, record: DetectionRecord) -> bool {
        let record_id = record.id().to_string();
        let outcome = working.merge(record);
        INSERTS_RECEIVED_TOTAL
            .with_label_values(&[&self.options.worker_id, outcome.label()])
            .inc();
        debug!(
            worker_id = %self.options.worker_id,
            range = %range,
            record_id = %record_id,
            outcome = outcome.label(),
            "Insert merged"
        );
        outcome == MergeOutcome::Added
    }

    /// Drains notifications arriving within the debounce interval so a burst
    /// costs one recomputation.
    async fn coalesce(
        &self,
        working: &mut WorkingSet,
        range: TimeRange,
        feed: &mut Option<Fuse<InsertFeed>>,
    ) -> Result<bool, StoreError> {
        let Some(stream) = feed.as_mut() else {
            return Ok(false);
        };
        let deadline = time::Instant::now() + self.options.debounce;
        let mut changed = false;
        while let Ok(Some(item)) = time::timeout_at(deadline, stream.next()).await {
            changed |= self.merge(working, range, item?);
        }
        Ok(changed)
    }

    fn publish_snapshot(&self, range: TimeRange, working: &WorkingSet) {
        let start = Instant::now();
        let snapshot = working.snapshot_in(self.selector.timezone());
        let elapsed = start.elapsed();

        AGGREGATION_SECONDS
            .with_label_values(&[&self.options.worker_id, range.as_str()])
            .observe(elapsed.as_secs_f64());
        WORKING_SET_SIZE
            .with_label_values(&[&self.options.worker_id, range.as_str()])
            .set(working.len() as i64);
        debug!(
            worker_id = %self.options.worker_id,
            range = %range,
            total = snapshot.total,
            sentiment_score = snapshot.sentiment_score,
            aggregation_ms = elapsed.as_secs_f64() * 1000.0,
            "Snapshot recomputed"
        );

        self.publish(range, working.lower_bound(), WindowStatus::Ready { snapshot });
    }

    fn publish(&self, range: TimeRange, lower_bound: Option<DateTime<Utc>>, status: WindowStatus) {
        self.state.send_replace(DashboardState {
            range,
            lower_bound,
            status,
            updated_at: Utc::now(),
        });
    }
}

async fn next_insert(feed: &mut Option<Fuse<InsertFeed>>) -> Option<Result<DetectionRecord, StoreError>> {
    match feed {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// One-off fetch and aggregation for `range`, outside the live window.
pub async fn fetch_snapshot<Tz>(
    store: &dyn RecordStore,
    selector: &TimeWindowSelector<Tz>,
    range: TimeRange,
    limit: Duration,
) -> Result<(Option<DateTime<Utc>>, StatisticsSnapshot), StoreError>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let lower_bound = selector.lower_bound_for(range);
    let records = timeout(limit, store.fetch_since(lower_bound))
        .await
        .map_err(|_| StoreError::Timeout(limit))??;
    Ok((lower_bound, aggregate_in(&records, selector.timezone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use crate::time_window::{Clock, FixedClock};
    use std::sync::Mutex;
    use crate::types::fixtures::{record, ts};
    use async_trait::async_trait;
    use chrono::Weekday;
    use futures::stream;

    const NOW: &str = "2024-05-15T12:00:00";

    fn selector() -> TimeWindowSelector<Utc> {
        TimeWindowSelector::new(Arc::new(FixedClock(ts(NOW))), Utc, Weekday::Sun)
    }

    fn options(debounce: Duration) -> LiveOptions {
        LiveOptions {
            worker_id: "w-test".to_string(),
            fetch_timeout: Duration::from_secs(1),
            debounce,
            command_queue_capacity: 4,
            bound_check_interval: Duration::from_millis(10),
        }
    }

    fn start(store: Arc<dyn RecordStore>, range: TimeRange) -> (LiveAnalyticsHandle, broadcast::Sender<()>) {
        start_with(store, selector(), range)
    }

    fn start_with(
        store: Arc<dyn RecordStore>,
        selector: TimeWindowSelector<Utc>,
        range: TimeRange,
    ) -> (LiveAnalyticsHandle, broadcast::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (handle, _task) = LiveAnalytics::spawn(store, selector, options(Duration::ZERO), range, shutdown_rx);
        (handle, shutdown_tx)
    }

    /// Clock a test can move forward.
    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn set(&self, at: DateTime<Utc>) {
            *self.0.lock().unwrap() = at;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    async fn wait_for(handle: &LiveAnalyticsHandle, pred: impl Fn(&DashboardState) -> bool) -> DashboardState {
        let mut rx = handle.watch();
        timeout(Duration::from_secs(2), async {
            loop {
                {
                    let state = rx.borrow_and_update();
                    if pred(&state) {
                        return state.clone();
                    }
                }
                rx.changed().await.expect("live task alive");
            }
        })
        .await
        .expect("state reached in time")
    }

    fn total_is(expected: usize) -> impl Fn(&DashboardState) -> bool {
        move |state| state.snapshot().map_or(false, |snapshot| snapshot.total == expected)
    }

    // ── Initial window ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_initial_fetch_is_aggregated() {
        let store = Arc::new(MemoryRecordStore::new(16));
        store.insert(&record("a", "happy", "Adult", "female", "2024-05-15T09:00:00")).await.unwrap();
        store.insert(&record("b", "sad", "Teen", "male", "2024-05-15T10:00:00")).await.unwrap();
        store.insert(&record("old", "sad", "Teen", "male", "2024-05-14T10:00:00")).await.unwrap();

        let (handle, _shutdown) = start(store, TimeRange::Today);
        let state = wait_for(&handle, total_is(2)).await;
        assert_eq!(state.range, TimeRange::Today);
        assert_eq!(state.lower_bound, Some(ts("2024-05-15T00:00:00")));
        assert_eq!(state.snapshot().unwrap().sentiment_score, 50);
    }

    // ── Live inserts ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_insert_triggers_reaggregation() {
        let store = Arc::new(MemoryRecordStore::new(16));
        let (handle, _shutdown) = start(store.clone(), TimeRange::Today);
        wait_for(&handle, total_is(0)).await;

        store.insert(&record("a", "angry", "Adult", "male", "2024-05-15T11:00:00")).await.unwrap();
        let state = wait_for(&handle, total_is(1)).await;
        assert_eq!(state.snapshot().unwrap().sentiment_score, 0);
    }

    #[tokio::test]
    async fn test_redelivered_record_is_counted_once() {
        let store = Arc::new(MemoryRecordStore::new(16));
        let first = record("a", "happy", "Adult", "female", "2024-05-15T09:00:00");
        store.insert(&first).await.unwrap();
        let (handle, _shutdown) = start(store.clone(), TimeRange::Today);
        wait_for(&handle, total_is(1)).await;

        store.redeliver(first);
        store.insert(&record("b", "happy", "Adult", "female", "2024-05-15T09:30:00")).await.unwrap();
        let state = wait_for(&handle, total_is(2)).await;
        assert_eq!(state.snapshot().unwrap().emotion_counts["happy"], 2);
    }

    #[tokio::test]
    async fn test_insert_outside_window_is_ignored() {
        let store = Arc::new(MemoryRecordStore::new(16));
        let (handle, _shutdown) = start(store.clone(), TimeRange::Today);
        wait_for(&handle, total_is(0)).await;

        store.insert(&record("late", "sad", "Adult", "male", "2024-05-14T23:00:00")).await.unwrap();
        store.insert(&record("now", "happy", "Adult", "male", "2024-05-15T11:00:00")).await.unwrap();
        let state = wait_for(&handle, total_is(1)).await;
        assert_eq!(state.snapshot().unwrap().emotion_counts.get("sad"), None);
    }

    #[tokio::test]
    async fn test_lagging_feed_refetches_window() {
        let store = Arc::new(MemoryRecordStore::new(1));
        let (handle, _shutdown) = start(store.clone(), TimeRange::Today);
        wait_for(&handle, total_is(0)).await;

        for idx in 0..5 {
            store
                .insert(&record(&format!("r{idx}"), "happy", "Adult", "female", "2024-05-15T10:00:00"))
                .await
                .unwrap();
        }
        let state = wait_for(&handle, total_is(5)).await;
        assert_eq!(state.snapshot().unwrap().positive, 5);
    }

    // ── Window rollover ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_insert_after_midnight_drops_previous_day() {
        let clock = Arc::new(ManualClock(Mutex::new(ts("2024-05-15T23:59:00"))));
        let store = Arc::new(MemoryRecordStore::new(16));
        store.insert(&record("late", "sad", "Adult", "male", "2024-05-15T23:58:00")).await.unwrap();

        let mut options = options(Duration::ZERO);
        options.bound_check_interval = Duration::from_secs(3600);
        let (_shutdown, shutdown_rx) = broadcast::channel(1);
        let (handle, _task) = LiveAnalytics::spawn(
            store.clone(),
            TimeWindowSelector::new(clock.clone(), Utc, Weekday::Sun),
            options,
            TimeRange::Today,
            shutdown_rx,
        );
        wait_for(&handle, total_is(1)).await;

        clock.set(ts("2024-05-16T00:01:00"));
        store.insert(&record("early", "happy", "Adult", "male", "2024-05-16T00:00:30")).await.unwrap();
        let state = wait_for(&handle, |state| {
            state.lower_bound == Some(ts("2024-05-16T00:00:00")) && total_is(1)(state)
        })
        .await;
        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.positive, 1);
        assert_eq!(snapshot.negative, 0);
    }

    #[tokio::test]
    async fn test_idle_window_follows_clock() {
        let clock = Arc::new(ManualClock(Mutex::new(ts("2024-05-15T23:59:00"))));
        let store = Arc::new(MemoryRecordStore::new(16));
        store.insert(&record("late", "sad", "Adult", "male", "2024-05-15T23:58:00")).await.unwrap();

        let (handle, _shutdown) = start_with(
            store,
            TimeWindowSelector::new(clock.clone(), Utc, Weekday::Sun),
            TimeRange::Today,
        );
        wait_for(&handle, total_is(1)).await;

        clock.set(ts("2024-05-16T00:01:00"));
        let state = wait_for(&handle, |state| state.lower_bound == Some(ts("2024-05-16T00:00:00"))).await;
        assert_eq!(state.snapshot().unwrap().total, 0);
    }

    // ── Range switching ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_range_switch_refetches() {
        let store = Arc::new(MemoryRecordStore::new(16));
        store.insert(&record("a", "happy", "Adult", "female", "2024-05-15T09:00:00")).await.unwrap();
        store.insert(&record("b", "sad", "Adult", "female", "2024-03-01T09:00:00")).await.unwrap();

        let (handle, _shutdown) = start(store, TimeRange::Today);
        wait_for(&handle, total_is(1)).await;

        handle.set_range(TimeRange::All).await.unwrap();
        let state = wait_for(&handle, |state| state.range == TimeRange::All && total_is(2)(state)).await;
        assert_eq!(state.lower_bound, None);
    }

    // ── Store races and failures ─────────────────────────────────────

    /// Announces a record while the initial fetch is in flight and also
    /// returns it from that fetch.
    struct RacingStore {
        inner: MemoryRecordStore,
        late: DetectionRecord,
    }

    #[async_trait]
    impl RecordStore for RacingStore {
        async fn fetch_since(&self, lower_bound: Option<DateTime<Utc>>) -> Result<Vec<DetectionRecord>, StoreError> {
            self.inner.insert(&self.late).await?;
            self.inner.fetch_since(lower_bound).await
        }

        async fn subscribe(&self) -> Result<InsertFeed, StoreError> {
            self.inner.subscribe().await
        }

        async fn insert(&self, record: &DetectionRecord) -> Result<(), StoreError> {
            self.inner.insert(record).await
        }
    }

    #[tokio::test]
    async fn test_insert_racing_initial_fetch_is_deduped() {
        let store = Arc::new(RacingStore {
            inner: MemoryRecordStore::new(16),
            late: record("late", "sad", "Adult", "male", "2024-05-15T11:59:00"),
        });
        let (handle, _shutdown) = start(store.clone(), TimeRange::Today);
        wait_for(&handle, total_is(1)).await;

        store.insert(&record("next", "happy", "Adult", "male", "2024-05-15T11:59:30")).await.unwrap();
        let state = wait_for(&handle, total_is(2)).await;
        assert_eq!(state.snapshot().unwrap().negative, 1);
    }

    struct DownStore;

    #[async_trait]
    impl RecordStore for DownStore {
        async fn fetch_since(&self, _lower_bound: Option<DateTime<Utc>>) -> Result<Vec<DetectionRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn subscribe(&self) -> Result<InsertFeed, StoreError> {
            Ok(stream::pending().boxed())
        }

        async fn insert(&self, _record: &DetectionRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable_not_empty() {
        let (handle, _shutdown) = start(Arc::new(DownStore), TimeRange::Today);
        let state = wait_for(&handle, |state| matches!(state.status, WindowStatus::Unavailable { .. })).await;
        assert!(state.snapshot().is_none());
        match state.status {
            WindowStatus::Unavailable { reason } => assert!(reason.contains("connection refused")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_snapshot_reports_unavailable() {
        let err = fetch_snapshot(&DownStore, &selector(), TimeRange::Week, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    // ── Debounce ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_debounced_burst_is_fully_merged() {
        let store = Arc::new(MemoryRecordStore::new(16));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (handle, task) = LiveAnalytics::spawn(
            store.clone(),
            selector(),
            options(Duration::from_millis(30)),
            TimeRange::Today,
            shutdown_rx,
        );
        wait_for(&handle, total_is(0)).await;

        for idx in 0..5 {
            store
                .insert(&record(&format!("r{idx}"), "neutral", "Senior", "female", "2024-05-15T08:00:00"))
                .await
                .unwrap();
        }
        let state = wait_for(&handle, total_is(5)).await;
        assert_eq!(state.snapshot().unwrap().hourly_data["08:00"].neutral, 5);

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[test]
    fn test_dashboard_state_serialises_flat_status() {
        let state = DashboardState {
            range: TimeRange::Week,
            lower_bound: None,
            status: WindowStatus::Unavailable {
                reason: "down".to_string(),
            },
            updated_at: ts(NOW),
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["range"], "week");
        assert_eq!(value["status"], "unavailable");
        assert_eq!(value["reason"], "down");
    }
}
