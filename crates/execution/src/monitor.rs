//! Polling-driven tracking of running flow instances.
//!
//! A watch owns two periodic loops: overall status plus the event log, and
//! the slower per-stage batching progress. Every tick spawns a
//! fire-and-forget request; responses are reconciled by
//! [`ExecutionTracker`], which drops stale ones. Polling stops on its own
//! once the execution reaches a terminal state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use nurture_core::config::MonitorConfig;
use nurture_core::event_bus::{make_event, noop_sink, EventSink, EventType};
use nurture_core::NurtureResult;

use crate::backend::FlowBackend;
use crate::tracker::{ApplyOutcome, ExecutionTracker};
use crate::types::{
    BatchingReport, BatchingSummary, ControlResponse, ExecutionEvent, ExecutionMetrics,
    ExecutionState, ExecutionStatus, StartExecutionRequest,
};

struct WatchShared {
    flow_id: String,
    execution_id: String,
    tracker: Mutex<ExecutionTracker>,
    enabled: AtomicBool,
    status_refresh: Notify,
    batching_refresh: Notify,
    status_seq: AtomicU64,
    events_seq: AtomicU64,
    batching_seq: AtomicU64,
    updates: watch::Sender<Option<ExecutionState>>,
}

impl WatchShared {
    fn next_seq(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn wake(&self) {
        self.status_refresh.notify_one();
        self.batching_refresh.notify_one();
    }

    fn apply_status(&self, seq: u64, state: ExecutionState, sink: &dyn EventSink) {
        let (outcome, snapshot, finished) = {
            let mut tracker = self.tracker.lock();
            let outcome = tracker.apply_status(seq, state);
            (outcome, tracker.snapshot().cloned(), tracker.is_finished())
        };

        let ApplyOutcome::Applied { status_changed } = outcome else {
            return;
        };
        if status_changed {
            let estado = snapshot.as_ref().map(|s| s.estado.to_string());
            info!(
                flow_id = %self.flow_id,
                execution_id = %self.execution_id,
                estado = ?estado,
                "Execution state changed"
            );
            sink.emit(make_event(
                EventType::ExecutionStateChanged,
                self.flow_id.clone(),
                Some(self.execution_id.clone()),
                estado.clone(),
            ));
            if finished {
                sink.emit(make_event(
                    EventType::ExecutionFinished,
                    self.flow_id.clone(),
                    Some(self.execution_id.clone()),
                    estado,
                ));
                self.wake();
            }
        }
        self.updates.send_replace(snapshot);
    }

    fn apply_events(&self, seq: u64, events: Vec<ExecutionEvent>) {
        let outcome = self.tracker.lock().apply_events(seq, events);
        if matches!(outcome, ApplyOutcome::Applied { .. }) {
            self.updates.send_modify(|_| {});
        }
    }

    fn apply_batching(&self, seq: u64, report: BatchingReport) {
        let outcome = self.tracker.lock().apply_batching(seq, report);
        if matches!(outcome, ApplyOutcome::Applied { .. }) {
            self.updates.send_modify(|_| {});
        }
    }
}

/// Handle to one tracked execution. Cloning shares the same state.
///
/// All read methods are projections of the latest polled data and never
/// touch the network.
#[derive(Clone)]
pub struct ExecutionWatch {
    shared: Arc<WatchShared>,
}

impl std::fmt::Debug for ExecutionWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionWatch")
            .field("flow_id", &self.shared.flow_id)
            .field("execution_id", &self.shared.execution_id)
            .field("status", &self.status())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl ExecutionWatch {
    fn new(flow_id: &str, execution_id: &str) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            shared: Arc::new(WatchShared {
                flow_id: flow_id.to_string(),
                execution_id: execution_id.to_string(),
                tracker: Mutex::new(ExecutionTracker::new(flow_id, execution_id)),
                enabled: AtomicBool::new(true),
                status_refresh: Notify::new(),
                batching_refresh: Notify::new(),
                status_seq: AtomicU64::new(0),
                events_seq: AtomicU64::new(0),
                batching_seq: AtomicU64::new(0),
                updates,
            }),
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.shared.flow_id
    }

    pub fn execution_id(&self) -> &str {
        &self.shared.execution_id
    }

    pub fn snapshot(&self) -> Option<ExecutionState> {
        self.shared.tracker.lock().snapshot().cloned()
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.shared.tracker.lock().status()
    }

    pub fn metrics(&self) -> Option<ExecutionMetrics> {
        self.shared.tracker.lock().metrics().cloned()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.shared.tracker.lock().events().to_vec()
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared.tracker.lock().error_message().map(str::to_string)
    }

    /// True while the backend reports `en_progreso`.
    pub fn is_running(&self) -> bool {
        self.shared.tracker.lock().is_running()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.tracker.lock().is_finished()
    }

    pub fn batching_summary(&self) -> BatchingSummary {
        self.shared.tracker.lock().batching_summary()
    }

    /// Whether further polls will be scheduled.
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst) && !self.is_finished()
    }

    /// Receives the latest snapshot whenever any poll lands.
    pub fn subscribe(&self) -> watch::Receiver<Option<ExecutionState>> {
        self.shared.updates.subscribe()
    }

    /// Stops scheduling polls. Requests already in flight still complete and
    /// are applied.
    pub fn stop(&self) {
        if self.shared.enabled.swap(false, Ordering::SeqCst) {
            debug!(execution_id = %self.shared.execution_id, "Polling disabled");
        }
        self.shared.wake();
        self.shared.updates.send_modify(|_| {});
    }

    /// Polls immediately instead of waiting for the next tick.
    pub fn refresh(&self) {
        self.shared.wake();
    }

    /// Resolves once the execution finishes or polling is stopped.
    pub async fn wait_until_finished(&self) -> Option<ExecutionState> {
        let mut rx = self.subscribe();
        while self.is_enabled() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.snapshot()
    }
}

/// Launches flows and keeps one [`ExecutionWatch`] per tracked execution.
pub struct ExecutionMonitor<B: FlowBackend> {
    backend: Arc<B>,
    config: MonitorConfig,
    event_sink: Arc<dyn EventSink>,
    watches: Arc<DashMap<String, ExecutionWatch>>,
}

impl<B: FlowBackend> Clone for ExecutionMonitor<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            event_sink: Arc::clone(&self.event_sink),
            watches: Arc::clone(&self.watches),
        }
    }
}

impl<B: FlowBackend> std::fmt::Debug for ExecutionMonitor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionMonitor")
            .field("config", &self.config)
            .field("watches", &self.watches.len())
            .finish()
    }
}

impl<B: FlowBackend> ExecutionMonitor<B> {
    pub fn new(backend: Arc<B>, config: MonitorConfig) -> Self {
        Self {
            backend,
            config,
            event_sink: noop_sink(),
            watches: Arc::new(DashMap::new()),
        }
    }

    /// Attach an event sink for lifecycle events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Number of executions currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.watches.len()
    }

    pub fn get_watch(&self, execution_id: &str) -> Option<ExecutionWatch> {
        self.watches.get(execution_id).map(|w| w.clone())
    }

    /// Asks the backend to run `flow_id` and starts polling the new
    /// execution. Without `recipient_ids` the flow runs for all of its
    /// recipients.
    pub async fn start(
        &self,
        flow_id: &str,
        recipient_ids: Option<Vec<String>>,
    ) -> NurtureResult<ExecutionWatch> {
        let request = StartExecutionRequest {
            flow_id: flow_id.to_string(),
            recipient_ids,
        };
        let started = self.backend.start_execution(&request).await?;
        info!(
            flow_id = %flow_id,
            execution_id = %started.execution_id,
            estado = %started.estado,
            recipients = ?request.recipient_ids.as_ref().map(Vec::len),
            "Execution started"
        );
        self.event_sink.emit(make_event(
            EventType::ExecutionStarted,
            flow_id,
            Some(started.execution_id.clone()),
            Some(started.estado.to_string()),
        ));
        Ok(self.watch(flow_id, &started.execution_id))
    }

    /// Starts (or reuses) polling for an execution. Must be called from
    /// within a Tokio runtime.
    pub fn watch(&self, flow_id: &str, execution_id: &str) -> ExecutionWatch {
        let watch = ExecutionWatch::new(flow_id, execution_id);
        match self.watches.entry(execution_id.to_string()) {
            Entry::Occupied(existing) if existing.get().is_enabled() => {
                return existing.get().clone();
            }
            Entry::Occupied(mut stopped) => {
                stopped.insert(watch.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(watch.clone());
            }
        }

        tokio::spawn(status_loop(
            Arc::clone(&self.backend),
            watch.clone(),
            Duration::from_millis(self.config.status_interval_ms),
            self.config.events_page_size,
            Arc::clone(&self.event_sink),
            Arc::clone(&self.watches),
        ));
        tokio::spawn(batching_loop(
            Arc::clone(&self.backend),
            watch.clone(),
            Duration::from_millis(self.config.batching_interval_ms),
            Arc::clone(&self.watches),
        ));

        debug!(flow_id = %flow_id, execution_id = %execution_id, "Watching execution");
        watch
    }

    pub async fn cancel(&self, flow_id: &str, execution_id: &str) -> NurtureResult<ControlResponse> {
        let resp = self.backend.cancel_execution(flow_id, execution_id).await?;
        self.after_control("cancel", flow_id, execution_id, &resp);
        Ok(resp)
    }

    pub async fn pause(&self, flow_id: &str, execution_id: &str) -> NurtureResult<ControlResponse> {
        let resp = self.backend.pause_execution(flow_id, execution_id).await?;
        self.after_control("pause", flow_id, execution_id, &resp);
        Ok(resp)
    }

    pub async fn resume(&self, flow_id: &str, execution_id: &str) -> NurtureResult<ControlResponse> {
        let resp = self.backend.resume_execution(flow_id, execution_id).await?;
        self.after_control("resume", flow_id, execution_id, &resp);
        Ok(resp)
    }

    /// One page of the event log, fetched on demand.
    pub async fn load_events(
        &self,
        flow_id: &str,
        execution_id: &str,
        limit: u32,
        offset: u32,
    ) -> NurtureResult<Vec<ExecutionEvent>> {
        self.backend
            .fetch_execution_events(flow_id, execution_id, limit, offset)
            .await
    }

    /// Forces the next poll of a tracked execution to fire now.
    pub fn invalidate(&self, execution_id: &str) {
        if let Some(watch) = self.get_watch(execution_id) {
            watch.refresh();
        }
    }

    fn after_control(
        &self,
        action: &str,
        flow_id: &str,
        execution_id: &str,
        resp: &ControlResponse,
    ) {
        info!(
            flow_id = %flow_id,
            execution_id = %execution_id,
            action,
            estado = %resp.estado,
            "Execution control accepted"
        );
        self.event_sink.emit(make_event(
            EventType::ExecutionControlRequested,
            flow_id,
            Some(execution_id.to_string()),
            Some(format!("{}:{}", action, resp.estado)),
        ));
        self.invalidate(execution_id);
    }
}

fn new_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn forget(watches: &DashMap<String, ExecutionWatch>, watch: &ExecutionWatch) {
    watches.remove_if(watch.execution_id(), |_, w| Arc::ptr_eq(&w.shared, &watch.shared));
}

async fn status_loop<B: FlowBackend>(
    backend: Arc<B>,
    watch: ExecutionWatch,
    period: Duration,
    page_size: u32,
    sink: Arc<dyn EventSink>,
    watches: Arc<DashMap<String, ExecutionWatch>>,
) {
    let shared = Arc::clone(&watch.shared);
    let mut interval = new_interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shared.status_refresh.notified() => interval.reset(),
        }
        if !watch.is_enabled() {
            break;
        }

        let seq = WatchShared::next_seq(&shared.status_seq);
        let (b, s, sink) = (Arc::clone(&backend), Arc::clone(&shared), Arc::clone(&sink));
        tokio::spawn(async move {
            metrics::counter!("execution.status_polls").increment(1);
            match b
                .fetch_execution_status(&s.flow_id, Some(s.execution_id.as_str()))
                .await
            {
                Ok(state) => s.apply_status(seq, state, sink.as_ref()),
                Err(e) => {
                    metrics::counter!("execution.poll_failures").increment(1);
                    warn!(execution_id = %s.execution_id, error = %e, "Status poll failed, retrying next tick");
                }
            }
        });

        let seq = WatchShared::next_seq(&shared.events_seq);
        let (b, s) = (Arc::clone(&backend), Arc::clone(&shared));
        tokio::spawn(async move {
            match b
                .fetch_execution_events(&s.flow_id, &s.execution_id, page_size, 0)
                .await
            {
                Ok(events) => s.apply_events(seq, events),
                Err(e) => {
                    metrics::counter!("execution.poll_failures").increment(1);
                    warn!(execution_id = %s.execution_id, error = %e, "Event poll failed, retrying next tick");
                }
            }
        });
    }
    debug!(execution_id = %shared.execution_id, "Status polling stopped");
    forget(&watches, &watch);
}

async fn batching_loop<B: FlowBackend>(
    backend: Arc<B>,
    watch: ExecutionWatch,
    period: Duration,
    watches: Arc<DashMap<String, ExecutionWatch>>,
) {
    let shared = Arc::clone(&watch.shared);
    let mut interval = new_interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shared.batching_refresh.notified() => interval.reset(),
        }
        if !watch.is_enabled() {
            break;
        }

        let seq = WatchShared::next_seq(&shared.batching_seq);
        let (b, s) = (Arc::clone(&backend), Arc::clone(&shared));
        tokio::spawn(async move {
            match b.fetch_batching_status(&s.flow_id, &s.execution_id).await {
                Ok(report) => s.apply_batching(seq, report),
                Err(e) => {
                    metrics::counter!("execution.poll_failures").increment(1);
                    warn!(execution_id = %s.execution_id, error = %e, "Batching poll failed, retrying next tick");
                }
            }
        });
    }
    debug!(execution_id = %shared.execution_id, "Batching polling stopped");
    forget(&watches, &watch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{state, ScriptedBackend};
    use nurture_core::event_bus::capture_sink;
    use nurture_core::NurtureError;
    use tokio::time::{sleep, timeout};

    fn fast_config(status_ms: u64) -> MonitorConfig {
        MonitorConfig {
            status_interval_ms: status_ms,
            batching_interval_ms: 40,
            events_page_size: 20,
        }
    }

    #[tokio::test]
    async fn test_polls_until_terminal_then_stops() {
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![
            Ok(state(ExecutionStatus::EnProgreso, 10)),
            Ok(state(ExecutionStatus::Completado, 50)),
        ]));
        let monitor = ExecutionMonitor::new(Arc::clone(&backend), fast_config(30));

        let watch = monitor.watch("flow-1", "exec-1");
        let mut rx = watch.subscribe();
        let mut observed = Vec::new();
        timeout(Duration::from_secs(2), async {
            while !watch.is_finished() {
                rx.changed().await.unwrap();
                if let Some(snapshot) = rx.borrow_and_update().as_ref() {
                    observed.push(snapshot.estado.is_in_progress());
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(observed.first(), Some(&true));
        assert_eq!(observed.last(), Some(&false));
        assert!(!watch.is_running());
        assert_eq!(watch.metrics().unwrap().sent, 50);

        sleep(Duration::from_millis(150)).await;
        assert_eq!(backend.status_calls(), 2);
        assert!(!watch.is_enabled());
        assert_eq!(monitor.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_poll_failures_are_skipped() {
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![
            Err(NurtureError::Transport("connection reset".into())),
            Ok(state(ExecutionStatus::EnProgreso, 5)),
            Ok(state(ExecutionStatus::Completado, 50)),
        ]));
        let monitor = ExecutionMonitor::new(Arc::clone(&backend), fast_config(20));

        let watch = monitor.watch("flow-1", "exec-1");
        let last = timeout(Duration::from_secs(2), watch.wait_until_finished())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.estado, ExecutionStatus::Completado);
        assert_eq!(backend.status_calls(), 3);
    }

    #[tokio::test]
    async fn test_start_and_cancel_refreshes_immediately() {
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![Ok(state(
            ExecutionStatus::EnProgreso,
            10,
        ))]));
        let sink = capture_sink();
        // Long interval: only the first tick and the invalidation poll fire.
        let monitor = ExecutionMonitor::new(Arc::clone(&backend), fast_config(60_000))
            .with_event_sink(sink.clone());

        let watch = monitor.start("flow-1", None).await.unwrap();
        assert_eq!(watch.execution_id(), "exec-1");
        assert_eq!(backend.started.lock()[0].recipient_ids, None);

        let mut rx = watch.subscribe();
        timeout(Duration::from_secs(1), async {
            while !watch.is_running() {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let resp = monitor.cancel("flow-1", "exec-1").await.unwrap();
        assert_eq!(resp.estado, ExecutionStatus::Cancelado);

        let last = timeout(Duration::from_secs(1), watch.wait_until_finished())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.estado, ExecutionStatus::Cancelado);
        assert_eq!(backend.cancelled.lock().as_slice(), ["exec-1".to_string()]);
        assert_eq!(sink.count_type(EventType::ExecutionStarted), 1);
        assert_eq!(sink.count_type(EventType::ExecutionControlRequested), 1);
        assert_eq!(sink.count_type(EventType::ExecutionFinished), 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume_stay_tracked() {
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![Ok(state(
            ExecutionStatus::EnProgreso,
            10,
        ))]));
        let monitor = ExecutionMonitor::new(Arc::clone(&backend), fast_config(60_000));
        let watch = monitor.watch("flow-1", "exec-1");
        let mut rx = watch.subscribe();

        timeout(Duration::from_secs(1), async {
            while watch.status() != Some(ExecutionStatus::EnProgreso) {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        monitor.pause("flow-1", "exec-1").await.unwrap();
        timeout(Duration::from_secs(1), async {
            while watch.status() != Some(ExecutionStatus::Pausado) {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(!watch.is_running());
        assert!(watch.is_enabled());

        monitor.resume("flow-1", "exec-1").await.unwrap();
        timeout(Duration::from_secs(1), async {
            while !watch.is_running() {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(monitor.tracked_count(), 1);
        watch.stop();
    }

    #[tokio::test]
    async fn test_stop_is_soft_and_views_survive() {
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![Ok(state(
            ExecutionStatus::EnProgreso,
            10,
        ))]));
        let monitor = ExecutionMonitor::new(Arc::clone(&backend), fast_config(20));
        let watch = monitor.watch("flow-1", "exec-1");

        let mut rx = watch.subscribe();
        timeout(Duration::from_secs(1), async {
            while !watch.is_running() {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        watch.stop();
        sleep(Duration::from_millis(30)).await;
        let calls = backend.status_calls();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.status_calls(), calls);
        assert!(!watch.is_enabled());
        assert_eq!(watch.status(), Some(ExecutionStatus::EnProgreso));
        assert_eq!(watch.batching_summary().status, crate::types::BatchingPhase::None);
        assert_eq!(monitor.tracked_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_watch_calls_share_one_poller() {
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![Ok(state(
            ExecutionStatus::EnProgreso,
            10,
        ))]));
        let monitor = ExecutionMonitor::new(Arc::clone(&backend), fast_config(60_000));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let monitor = monitor.clone();
                tokio::spawn(async move { monitor.watch("flow-1", "exec-1") })
            })
            .collect();
        let mut watches = Vec::new();
        for handle in handles {
            watches.push(handle.await.unwrap());
        }

        sleep(Duration::from_millis(100)).await;
        assert!(watches
            .iter()
            .all(|w| Arc::ptr_eq(&w.shared, &watches[0].shared)));
        assert_eq!(monitor.tracked_count(), 1);
        // Only the first tick of a single status loop has fired.
        assert_eq!(backend.status_calls(), 1);
        watches[0].stop();
    }

    #[tokio::test]
    async fn test_slow_earlier_poll_does_not_overwrite_newer_one() {
        let backend = Arc::new(
            ScriptedBackend::with_statuses(vec![
                Ok(state(ExecutionStatus::EnProgreso, 10)),
                Ok(state(ExecutionStatus::EnProgreso, 30)),
            ])
            .with_status_delays(vec![Duration::from_millis(150)]),
        );
        let monitor = ExecutionMonitor::new(Arc::clone(&backend), fast_config(40));
        let watch = monitor.watch("flow-1", "exec-1");

        let mut rx = watch.subscribe();
        let mut seen = Vec::new();
        let _ = timeout(Duration::from_millis(300), async {
            while rx.changed().await.is_ok() {
                if let Some(snapshot) = rx.borrow_and_update().as_ref() {
                    seen.push(snapshot.metrics.sent);
                }
            }
        })
        .await;

        // The first poll answered after later ones had landed.
        assert!(backend.status_calls() >= 3);
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|&sent| sent == 30), "stale snapshot applied: {seen:?}");
        assert_eq!(watch.metrics().unwrap().sent, 30);
        watch.stop();
    }
}
