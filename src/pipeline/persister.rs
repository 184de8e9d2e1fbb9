//! Bounded intake queue and adaptive batch persister
//!
//! Producers call [`BatchPersister::submit`], which never waits on the queue:
//! a full queue degrades to a direct single-event write. Three periodic tasks
//! drain the intake queue, drain the retry queue and log queue health.
//! Failed batches move to a bounded retry queue that gets exactly one more
//! attempt; anything that still cannot be written is counted as dropped and
//! handed to a [`DeadLetterSink`].
//!
//! Batches stay registered as in flight until their write resolves. A drain
//! aborted by the shutdown timeout leaves its batch behind for the final
//! flush.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::pipeline::sizing::{BatchBounds, RunObservation, adjust_batch_size, plan_batch};
use crate::protocol::messages::ChatEvent;
use crate::storage::MessageStore;

/// Configuration for the batch persister
#[derive(Debug, Clone)]
pub struct PersisterConfig {
    /// Intake queue capacity (default: 10,000)
    pub queue_capacity: usize,
    /// Retry queue capacity (default: 1,000)
    pub retry_capacity: usize,
    /// Initial batch size (default: 50)
    pub default_batch_size: usize,
    /// Smallest batch a run requests (default: 10)
    pub min_batch_size: usize,
    /// Largest batch a run requests (default: 200)
    pub max_batch_size: usize,
    /// Events taken per retry drain (default: the whole retry queue)
    pub retry_batch_size: usize,
    /// Intake drain period (default: 500ms)
    pub batch_interval: Duration,
    /// Retry drain period (default: 5s)
    pub retry_interval: Duration,
    /// Queue monitor period (default: 10s)
    pub monitor_interval: Duration,
    /// Wait for in-flight periodic work on shutdown (default: 30s)
    pub shutdown_timeout: Duration,
    /// Intake depth that triggers a monitor warning (default: 1,000)
    pub queue_warn_threshold: usize,
    /// Retry depth that triggers a monitor warning (default: 100)
    pub retry_warn_threshold: usize,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            retry_capacity: 1_000,
            default_batch_size: 50,
            min_batch_size: 10,
            max_batch_size: 200,
            retry_batch_size: 1_000,
            batch_interval: Duration::from_millis(500),
            retry_interval: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            queue_warn_threshold: 1_000,
            retry_warn_threshold: 100,
        }
    }
}

impl PersisterConfig {
    pub fn bounds(&self) -> BatchBounds {
        BatchBounds::new(self.min_batch_size, self.max_batch_size)
    }
}

/// Why an event was given up on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    /// The retry queue had no room for a failed event
    RetryQueueFull,
    /// The single retry attempt failed
    RetryFailed,
    /// The final flush on shutdown failed
    ShutdownFlushFailed,
}

/// Receives events the persister could not write
pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, event: ChatEvent, reason: DropReason);
}

/// Default sink: log and forget
pub struct LogDeadLetters;

impl DeadLetterSink for LogDeadLetters {
    fn dead_letter(&self, event: ChatEvent, reason: DropReason) {
        error!(
            message_id = %event.id,
            room_id = %event.room_id,
            reason = ?reason,
            "Chat event lost"
        );
    }
}

/// What happened to a submitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the intake queue
    Queued,
    /// Queue unavailable, written synchronously
    WrittenDirectly,
    /// Direct write failed, parked in the retry queue
    Retrying,
    /// Direct write failed and the retry queue was full
    Dropped,
}

/// Result of one intake drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub requested: usize,
    pub drained: usize,
    pub duration: Duration,
    pub succeeded: bool,
    /// Persistent batch size after adjustment
    pub batch_size: usize,
}

/// Result of one retry drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryReport {
    pub drained: usize,
    pub succeeded: bool,
}

/// Persister counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersisterStats {
    pub queue_depth: usize,
    pub retry_depth: usize,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub direct_writes: u64,
    pub current_batch_size: usize,
    /// processed / (processed + failed), as a percentage
    pub success_rate: f64,
}

struct Shared {
    config: PersisterConfig,
    bounds: BatchBounds,
    store: Arc<dyn MessageStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    intake_tx: mpsc::Sender<ChatEvent>,
    intake_rx: Mutex<mpsc::Receiver<ChatEvent>>,
    retry_tx: mpsc::Sender<ChatEvent>,
    retry_rx: Mutex<mpsc::Receiver<ChatEvent>>,
    in_flight: DashMap<u64, Vec<ChatEvent>>,
    next_batch_id: AtomicU64,
    current_batch_size: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    direct_writes: AtomicU64,
    shutting_down: AtomicBool,
}

/// Intake queue with adaptive batch persistence
pub struct BatchPersister {
    shared: Arc<Shared>,
    tasks: Mutex<JoinSet<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl BatchPersister {
    pub fn new(config: PersisterConfig, store: Arc<dyn MessageStore>) -> Self {
        Self::with_dead_letters(config, store, Arc::new(LogDeadLetters))
    }

    pub fn with_dead_letters(
        config: PersisterConfig,
        store: Arc<dyn MessageStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (retry_tx, retry_rx) = mpsc::channel(config.retry_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let bounds = config.bounds();

        Self {
            shared: Arc::new(Shared {
                current_batch_size: AtomicUsize::new(bounds.clamp(config.default_batch_size)),
                bounds,
                config,
                store,
                dead_letters,
                intake_tx,
                intake_rx: Mutex::new(intake_rx),
                retry_tx,
                retry_rx: Mutex::new(retry_rx),
                in_flight: DashMap::new(),
                next_batch_id: AtomicU64::new(0),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                direct_writes: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
            tasks: Mutex::new(JoinSet::new()),
            shutdown_tx,
        }
    }

    /// Spawn the batch drain, retry drain and queue monitor tasks
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() || self.shared.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let config = &self.shared.config;

        let shared = self.shared.clone();
        spawn_periodic(
            &mut tasks,
            "batch-drain",
            config.batch_interval,
            self.shutdown_tx.subscribe(),
            move || {
                let shared = shared.clone();
                async move {
                    shared.run_batch().await;
                }
            },
        );

        let shared = self.shared.clone();
        spawn_periodic(
            &mut tasks,
            "retry-drain",
            config.retry_interval,
            self.shutdown_tx.subscribe(),
            move || {
                let shared = shared.clone();
                async move {
                    shared.run_retry().await;
                }
            },
        );

        let shared = self.shared.clone();
        spawn_periodic(
            &mut tasks,
            "queue-monitor",
            config.monitor_interval,
            self.shutdown_tx.subscribe(),
            move || {
                let shared = shared.clone();
                async move {
                    shared.monitor();
                }
            },
        );

        info!(
            queue_capacity = config.queue_capacity,
            retry_capacity = config.retry_capacity,
            batch_interval_ms = config.batch_interval.as_millis() as u64,
            "Batch persister started"
        );
    }

    /// Hand an event to the pipeline. Never waits on queue capacity.
    pub async fn submit(&self, event: ChatEvent) -> SubmitOutcome {
        let event = event.with_identity();

        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return self.shared.write_directly(event).await;
        }

        match self.shared.intake_tx.try_send(event) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(event)) => {
                warn!(message_id = %event.id, "Intake queue full, writing synchronously");
                self.shared.write_directly(event).await
            }
            Err(TrySendError::Closed(event)) => self.shared.write_directly(event).await,
        }
    }

    /// Run one intake drain now
    pub async fn run_batch_once(&self) -> Option<BatchReport> {
        self.shared.run_batch().await
    }

    /// Run one retry drain now
    pub async fn run_retry_once(&self) -> Option<RetryReport> {
        self.shared.run_retry().await
    }

    /// Stop the periodic tasks, then flush both queues
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down batch persister");
        // Receivers may already be gone if start() was never called
        let _ = self.shutdown_tx.send(true);

        let mut tasks = self.tasks.lock().await;
        let timeout = self.shared.config.shutdown_timeout;

        let stopped = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if stopped.is_err() {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Periodic tasks did not stop in time, aborting"
            );
            tasks.abort_all();
            // Wait for the cancellations so no aborted write can still land
            while tasks.join_next().await.is_some() {}
        }
        drop(tasks);

        self.shared.flush_remaining().await;
        info!(stats = ?self.stats(), "Batch persister stopped");
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queue_depth()
    }

    pub fn retry_depth(&self) -> usize {
        self.shared.retry_depth()
    }

    pub fn current_batch_size(&self) -> usize {
        self.shared.current_batch_size.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PersisterStats {
        self.shared.stats()
    }
}

impl Shared {
    fn queue_depth(&self) -> usize {
        self.intake_tx.max_capacity() - self.intake_tx.capacity()
    }

    fn retry_depth(&self) -> usize {
        self.retry_tx.max_capacity() - self.retry_tx.capacity()
    }

    fn stats(&self) -> PersisterStats {
        let processed = self.processed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let total = processed + failed;
        PersisterStats {
            queue_depth: self.queue_depth(),
            retry_depth: self.retry_depth(),
            processed,
            failed,
            dropped: self.dropped.load(Ordering::SeqCst),
            direct_writes: self.direct_writes.load(Ordering::SeqCst),
            current_batch_size: self.current_batch_size.load(Ordering::SeqCst),
            success_rate: if total == 0 {
                100.0
            } else {
                processed as f64 / total as f64 * 100.0
            },
        }
    }

    async fn write_directly(&self, event: ChatEvent) -> SubmitOutcome {
        match self.store.append_batch(std::slice::from_ref(&event)).await {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::SeqCst);
                self.direct_writes.fetch_add(1, Ordering::SeqCst);
                debug!(message_id = %event.id, "Event written directly");
                SubmitOutcome::WrittenDirectly
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                error!(message_id = %event.id, error = %e, "Direct write failed");
                if self.enqueue_retry(event) {
                    SubmitOutcome::Retrying
                } else {
                    SubmitOutcome::Dropped
                }
            }
        }
    }

    fn enqueue_retry(&self, event: ChatEvent) -> bool {
        match self.retry_tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.give_up(event, DropReason::RetryQueueFull);
                false
            }
            // Retry queue already flushed for shutdown
            Err(TrySendError::Closed(event)) => {
                self.give_up(event, DropReason::ShutdownFlushFailed);
                false
            }
        }
    }

    /// Write a batch while it is registered as in flight
    async fn write_tracked(&self, batch: &[ChatEvent]) -> crate::error::Result<()> {
        let id = self.next_batch_id.fetch_add(1, Ordering::SeqCst);
        self.in_flight.insert(id, batch.to_vec());
        let result = self.store.append_batch(batch).await;
        self.in_flight.remove(&id);
        result
    }

    fn give_up(&self, event: ChatEvent, reason: DropReason) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        self.dead_letters.dead_letter(event, reason);
    }

    async fn run_batch(&self) -> Option<BatchReport> {
        let current = self.current_batch_size.load(Ordering::SeqCst);
        let requested = plan_batch(self.queue_depth(), current, self.bounds);

        let batch = drain(&self.intake_rx, requested).await;
        if batch.is_empty() {
            return None;
        }
        let drained = batch.len();

        let started = Instant::now();
        let result = self.write_tracked(&batch).await;
        let duration = started.elapsed();

        let succeeded = match result {
            Ok(()) => {
                self.processed.fetch_add(drained as u64, Ordering::SeqCst);
                debug!(
                    count = drained,
                    duration_ms = duration.as_millis() as u64,
                    "Batch persisted"
                );
                true
            }
            Err(e) => {
                self.failed.fetch_add(drained as u64, Ordering::SeqCst);
                error!(count = drained, error = %e, "Batch write failed, moving events to retry queue");
                for event in batch {
                    self.enqueue_retry(event);
                }
                false
            }
        };

        let run = RunObservation {
            duration,
            requested,
            drained,
            backlog_after: self.queue_depth(),
        };
        let next = adjust_batch_size(current, run, self.bounds);
        if next != current {
            self.current_batch_size.store(next, Ordering::SeqCst);
            info!(
                from = current,
                to = next,
                duration_ms = duration.as_millis() as u64,
                "Batch size adjusted"
            );
        }

        Some(BatchReport {
            requested,
            drained,
            duration,
            succeeded,
            batch_size: next,
        })
    }

    async fn run_retry(&self) -> Option<RetryReport> {
        let batch = drain(&self.retry_rx, self.config.retry_batch_size).await;
        if batch.is_empty() {
            return None;
        }
        let drained = batch.len();

        let succeeded = match self.write_tracked(&batch).await {
            Ok(()) => {
                self.processed.fetch_add(drained as u64, Ordering::SeqCst);
                info!(count = drained, "Retry batch persisted");
                true
            }
            Err(e) => {
                error!(count = drained, error = %e, "Retry batch failed, dropping events");
                for event in batch {
                    self.give_up(event, DropReason::RetryFailed);
                }
                false
            }
        };
        Some(RetryReport { drained, succeeded })
    }

    fn monitor(&self) {
        let stats = self.stats();
        if stats.queue_depth > 0 || stats.retry_depth > 0 {
            info!(
                queue_depth = stats.queue_depth,
                retry_depth = stats.retry_depth,
                processed = stats.processed,
                failed = stats.failed,
                dropped = stats.dropped,
                "Queue status"
            );
        }
        if stats.queue_depth > self.config.queue_warn_threshold {
            warn!(queue_depth = stats.queue_depth, "Intake queue is backing up, check store latency");
        }
        if stats.retry_depth > self.config.retry_warn_threshold {
            warn!(retry_depth = stats.retry_depth, "Retry queue is growing, check store health");
        }
    }

    /// Close both queues and write whatever is left, including batches of aborted drains
    async fn flush_remaining(&self) {
        let abandoned: Vec<ChatEvent> = {
            let ids: Vec<u64> = self.in_flight.iter().map(|entry| *entry.key()).collect();
            ids.into_iter()
                .filter_map(|id| self.in_flight.remove(&id))
                .flat_map(|(_, events)| events)
                .collect()
        };
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Re-flushing batches of aborted drains");
        }
        self.flush(abandoned, "in-flight").await;

        let remaining = close_and_drain(&self.intake_rx).await;
        self.flush(remaining, "intake").await;
        let retries = close_and_drain(&self.retry_rx).await;
        self.flush(retries, "retry").await;
    }

    async fn flush(&self, events: Vec<ChatEvent>, queue: &'static str) {
        if events.is_empty() {
            return;
        }
        let count = events.len();
        match self.store.append_batch(&events).await {
            Ok(()) => {
                self.processed.fetch_add(count as u64, Ordering::SeqCst);
                info!(queue, count, "Flushed queue on shutdown");
            }
            Err(e) => {
                error!(queue, count, error = %e, "Shutdown flush failed");
                for event in events {
                    self.give_up(event, DropReason::ShutdownFlushFailed);
                }
            }
        }
    }
}

/// Take up to `limit` queued events without waiting
async fn drain(rx: &Mutex<mpsc::Receiver<ChatEvent>>, limit: usize) -> Vec<ChatEvent> {
    let mut rx = rx.lock().await;
    let mut batch = Vec::new();
    while batch.len() < limit {
        match rx.try_recv() {
            Ok(event) => batch.push(event),
            Err(_) => break,
        }
    }
    batch
}

/// Refuse further sends, then take everything still queued
async fn close_and_drain(rx: &Mutex<mpsc::Receiver<ChatEvent>>) -> Vec<ChatEvent> {
    let mut rx = rx.lock().await;
    rx.close();
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Run `tick` every `period` until the shutdown flag flips
fn spawn_periodic<F, Fut>(
    tasks: &mut JoinSet<()>,
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tasks.spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(task = name, "Periodic task stopped");
    });
}
