//! Worker execution loop.
//!
//! A `Worker` polls the queue for eligible tasks and dispatches them to
//! registered handlers, up to `max_tasks` concurrently:
//!
//! - handlers are looked up by task type; a missing handler is reported as a
//!   task failure, never a crash
//! - handler errors are caught and converted into `fail_task` calls
//! - a store error in the poll loop marks the worker `Error` and triggers the
//!   same graceful-shutdown path as `stop`
//!
//! The handler interface is the only place business logic enters the engine;
//! handlers are supplied as configuration and must be idempotent if
//! at-least-once delivery matters to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::queue::{QueueError, TaskQueue};
use crate::task::Task;

/// Externally-supplied task logic for one task type.
///
/// Handlers receive the task payload and return a result value, or an error
/// to signal failure. They must not touch queue or worker internals.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Executes the handler against a task payload.
    async fn call(&self, payload: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, payload: Value) -> anyhow::Result<Value> {
        self(payload).await
    }
}

#[async_trait]
impl Handler for Arc<dyn Handler> {
    async fn call(&self, payload: Value) -> anyhow::Result<Value> {
        self.as_ref().call(payload).await
    }
}

/// Errors raised by worker lifecycle operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// `start` was called while the run loop is active.
    #[error("Worker is already running")]
    AlreadyRunning,

    /// `stop` was called with no run loop active.
    #[error("Worker is not running")]
    NotRunning,

    /// The run loop did not exit within the shutdown grace period.
    #[error("Worker shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// A queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep when no eligible task exists.
    pub poll_interval: Duration,
    /// Maximum concurrently-dispatched tasks.
    pub max_tasks: usize,
    /// Restrict the worker to these task types; `None` accepts everything.
    pub task_types: Option<Vec<String>>,
    /// How long shutdown waits for in-flight dispatches to finish.
    pub shutdown_timeout: Duration,
    /// TTL on the heartbeat record, so dead workers disappear automatically.
    pub heartbeat_ttl_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_tasks: 10,
            task_types: None,
            shutdown_timeout: Duration::from_secs(300),
            heartbeat_ttl_seconds: 3600,
        }
    }
}

impl WorkerConfig {
    /// Creates a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the dispatch concurrency cap.
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Restricts the worker to the given task types.
    pub fn with_task_types(mut self, task_types: Vec<String>) -> Self {
        self.task_types = Some(task_types);
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the heartbeat TTL in seconds.
    pub fn with_heartbeat_ttl_seconds(mut self, seconds: u64) -> Self {
        self.heartbeat_ttl_seconds = seconds;
        self
    }
}

/// Observable worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Not running.
    Stopped,
    /// Running with no task dispatched.
    Idle,
    /// Running with at least one task dispatched.
    Busy,
    /// Shut down after a poll-loop failure.
    Error,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Idle,
            2 => WorkerState::Busy,
            3 => WorkerState::Error,
            _ => WorkerState::Stopped,
        }
    }

    /// Wire form used in heartbeats.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
            WorkerState::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    /// Worker identity.
    pub worker_id: String,
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Tasks currently dispatched.
    pub active_tasks: u64,
    /// Dispatch concurrency cap.
    pub max_tasks: usize,
    /// Handler successes since the worker was created.
    pub completed: u64,
    /// Handler failures since the worker was created.
    pub failed: u64,
}

/// State shared between the worker handle, its poll loop and dispatches.
struct WorkerShared {
    state: AtomicU8,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Stopped as u8),
            active: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn active(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

/// Everything the spawned run loop needs, detached from the `Worker` handle.
struct RunContext {
    id: String,
    queue: Arc<TaskQueue>,
    config: WorkerConfig,
    handlers: Arc<HashMap<String, Arc<dyn Handler>>>,
    shared: Arc<WorkerShared>,
    shutdown_rx: broadcast::Receiver<()>,
}

/// A polling worker that claims tasks and dispatches them to handlers.
pub struct Worker {
    id: String,
    queue: Arc<TaskQueue>,
    config: WorkerConfig,
    handlers: HashMap<String, Arc<dyn Handler>>,
    shared: Arc<WorkerShared>,
    shutdown_tx: broadcast::Sender<()>,
    run_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Worker {
    /// Creates a stopped worker bound to a queue.
    pub fn new(id: impl Into<String>, queue: Arc<TaskQueue>, config: WorkerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            id: id.into(),
            queue,
            config,
            handlers: HashMap::new(),
            shared: Arc::new(WorkerShared::new()),
            shutdown_tx,
            run_handle: None,
        }
    }

    /// Associates a handler with a task type.
    ///
    /// One handler per type; re-registering replaces the previous handler
    /// silently. Takes effect the next time the worker starts.
    pub fn register_handler(
        &mut self,
        task_type: impl Into<String>,
        handler: impl Handler + 'static,
    ) {
        self.handlers.insert(task_type.into(), Arc::new(handler));
    }

    /// The worker's identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns whether the run loop is active.
    pub fn is_running(&self) -> bool {
        self.run_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Returns a point-in-time status snapshot.
    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.id.clone(),
            state: self.shared.state(),
            active_tasks: self.shared.active(),
            max_tasks: self.config.max_tasks,
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }

    /// Starts the poll loop.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::AlreadyRunning` if the loop is already active.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }

        let ctx = RunContext {
            id: self.id.clone(),
            queue: Arc::clone(&self.queue),
            config: self.config.clone(),
            handlers: Arc::new(self.handlers.clone()),
            shared: Arc::clone(&self.shared),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };

        self.shared.set_state(WorkerState::Idle);
        metrics::record_active_workers(1);
        self.run_handle = Some(tokio::spawn(run(ctx)));

        Ok(())
    }

    /// Requests graceful shutdown and waits for the run loop to exit.
    ///
    /// The loop stops polling for new work, drains in-flight dispatches
    /// (bounded by the configured shutdown timeout) and deregisters the
    /// worker's heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::NotRunning` if the worker was never started and
    /// `WorkerError::ShutdownTimeout` if the loop failed to exit in time.
    pub async fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(handle) = self.run_handle.take() else {
            return Err(WorkerError::NotRunning);
        };

        // Ignore send errors: the loop may have exited on its own already.
        let _ = self.shutdown_tx.send(());

        // The loop itself bounds the dispatch drain; allow it a margin on top.
        let grace = self.config.shutdown_timeout + Duration::from_secs(5);
        match timeout(grace, handle).await {
            Ok(join_result) => {
                if let Err(e) = join_result {
                    error!(worker_id = %self.id, error = %e, "Worker run loop panicked");
                }
                Ok(())
            }
            Err(_) => Err(WorkerError::ShutdownTimeout(grace)),
        }
    }
}

/// Main poll loop, spawned by `Worker::start`.
async fn run(mut ctx: RunContext) {
    info!(worker_id = %ctx.id, max_tasks = ctx.config.max_tasks, "Worker started");

    let semaphore = Arc::new(Semaphore::new(ctx.config.max_tasks));
    let mut dispatches: JoinSet<()> = JoinSet::new();
    let mut poll_failed = false;

    loop {
        // Reap dispatches that finished since the last cycle.
        while dispatches.try_join_next().is_some() {}

        if let Err(e) = write_heartbeat(&ctx).await {
            error!(worker_id = %ctx.id, error = %e, "Heartbeat write failed, shutting down");
            poll_failed = true;
            break;
        }

        match ctx.shutdown_rx.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                info!(worker_id = %ctx.id, "Worker received shutdown signal");
                break;
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(broadcast::error::TryRecvError::Empty) => {}
        }

        // At capacity: wait for a dispatch to finish instead of polling.
        if semaphore.available_permits() == 0 {
            ctx.shared.set_state(WorkerState::Busy);
            let stop = tokio::select! {
                _ = ctx.shutdown_rx.recv() => true,
                _ = dispatches.join_next() => false,
                _ = tokio::time::sleep(ctx.config.poll_interval) => false,
            };
            if stop {
                info!(worker_id = %ctx.id, "Worker received shutdown signal");
                break;
            }
            continue;
        }

        match ctx
            .queue
            .process_next(&ctx.id, ctx.config.task_types.as_deref())
            .await
        {
            Ok(Some(task)) => {
                ctx.shared.set_state(WorkerState::Busy);
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .expect("dispatch semaphore closed");
                spawn_dispatch(task, permit, &ctx, &mut dispatches);
            }
            Ok(None) => {
                if ctx.shared.active() == 0 {
                    ctx.shared.set_state(WorkerState::Idle);
                }
                let stop = tokio::select! {
                    _ = ctx.shutdown_rx.recv() => true,
                    _ = tokio::time::sleep(ctx.config.poll_interval) => false,
                };
                if stop {
                    info!(worker_id = %ctx.id, "Worker received shutdown signal");
                    break;
                }
            }
            Err(e) => {
                error!(worker_id = %ctx.id, error = %e, "Worker poll failed, shutting down");
                poll_failed = true;
                break;
            }
        }
    }

    if poll_failed {
        ctx.shared.set_state(WorkerState::Error);
    }

    // Drain in-flight dispatches, bounded by the shutdown timeout.
    let drain = async {
        while dispatches.join_next().await.is_some() {}
    };
    if timeout(ctx.config.shutdown_timeout, drain).await.is_err() {
        warn!(
            worker_id = %ctx.id,
            "Shutdown grace period expired with dispatches still running"
        );
        dispatches.abort_all();
    }

    // Deregister so monitors see the worker gone without waiting for the TTL.
    let worker_key = ctx.queue.worker_key(&ctx.id);
    if let Err(e) = ctx.queue.store().del(&worker_key).await {
        warn!(worker_id = %ctx.id, error = %e, "Failed to deregister worker heartbeat");
    }

    if !poll_failed {
        ctx.shared.set_state(WorkerState::Stopped);
    }
    metrics::record_active_workers(-1);
    info!(worker_id = %ctx.id, "Worker stopped");
}

/// Spawns one claimed task into the dispatch set.
fn spawn_dispatch(
    task: Task,
    permit: OwnedSemaphorePermit,
    ctx: &RunContext,
    dispatches: &mut JoinSet<()>,
) {
    let queue = Arc::clone(&ctx.queue);
    let handlers = Arc::clone(&ctx.handlers);
    let shared = Arc::clone(&ctx.shared);
    let worker_id = ctx.id.clone();

    shared.active.fetch_add(1, Ordering::SeqCst);
    metrics::record_in_flight(1);

    dispatches.spawn(async move {
        // Held for the lifetime of the dispatch; releasing it frees a slot.
        let _permit = permit;
        execute_task(task, &queue, &handlers, &shared, &worker_id).await;
        shared.active.fetch_sub(1, Ordering::SeqCst);
        metrics::record_in_flight(-1);
    });
}

/// Runs the handler for one task and reports the outcome to the queue.
async fn execute_task(
    task: Task,
    queue: &TaskQueue,
    handlers: &HashMap<String, Arc<dyn Handler>>,
    shared: &WorkerShared,
    worker_id: &str,
) {
    let outcome = match handlers.get(&task.task_type) {
        Some(handler) => handler.call(task.payload.clone()).await,
        None => Err(anyhow::anyhow!(
            "no handler registered for task type '{}'",
            task.task_type
        )),
    };

    match outcome {
        Ok(result) => {
            shared.completed.fetch_add(1, Ordering::SeqCst);
            match queue
                .complete_task(&task.id, Some(result), Some(worker_id))
                .await
            {
                Ok(true) => {
                    debug!(worker_id = %worker_id, task_id = %task.id, "Task execution succeeded");
                }
                Ok(false) => {
                    warn!(
                        worker_id = %worker_id,
                        task_id = %task.id,
                        "Task was no longer in flight when reporting completion"
                    );
                }
                Err(e) => {
                    error!(
                        worker_id = %worker_id,
                        task_id = %task.id,
                        error = %e,
                        "Failed to record task completion"
                    );
                }
            }
        }
        Err(handler_error) => {
            shared.failed.fetch_add(1, Ordering::SeqCst);
            warn!(
                worker_id = %worker_id,
                task_id = %task.id,
                task_type = %task.task_type,
                error = %handler_error,
                "Handler failed"
            );
            if let Err(e) = queue
                .fail_task(&task.id, &handler_error.to_string(), Some(worker_id), true)
                .await
            {
                error!(
                    worker_id = %worker_id,
                    task_id = %task.id,
                    error = %e,
                    "Failed to record task failure"
                );
            }
        }
    }
}

/// Publishes worker identity, state and load with a TTL.
async fn write_heartbeat(ctx: &RunContext) -> Result<(), QueueError> {
    let key = ctx.queue.worker_key(&ctx.id);
    let fields = vec![
        ("worker_id".to_string(), ctx.id.clone()),
        ("state".to_string(), ctx.shared.state().to_string()),
        ("active_tasks".to_string(), ctx.shared.active().to_string()),
        ("max_tasks".to_string(), ctx.config.max_tasks.to_string()),
        (
            "completed".to_string(),
            ctx.shared.completed.load(Ordering::SeqCst).to_string(),
        ),
        (
            "failed".to_string(),
            ctx.shared.failed.load(Ordering::SeqCst).to_string(),
        ),
        ("last_seen".to_string(), Utc::now().to_rfc3339()),
    ];

    let store = ctx.queue.store();
    store.hset_fields(&key, &fields).await?;
    store.expire(&key, ctx.config.heartbeat_ttl_seconds).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueConfig;
    use crate::store::MemoryStore;
    use crate::task::EnqueueOptions;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn test_queue() -> Arc<TaskQueue> {
        Arc::new(TaskQueue::new(
            Arc::new(MemoryStore::new()),
            QueueConfig::new("test"),
        ))
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_shutdown_timeout(Duration::from_secs(5))
    }

    /// Polls a condition until it holds or the deadline passes.
    async fn wait_for<F: Fn() -> bool>(condition: F, deadline: Duration) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_worker_processes_tasks_to_completion() {
        let queue = test_queue();
        for i in 0..3 {
            queue
                .enqueue("echo", json!({"seq": i}), EnqueueOptions::new())
                .await
                .unwrap();
        }

        let mut worker = Worker::new("w1", Arc::clone(&queue), fast_config());
        worker.register_handler("echo", |payload: Value| async move { Ok(payload) });
        worker.start().unwrap();

        let shared = Arc::clone(&worker.shared);
        assert!(
            wait_for(
                || shared.completed.load(Ordering::SeqCst) == 3,
                Duration::from_secs(5)
            )
            .await
        );

        worker.stop().await.unwrap();

        let status = queue.status().await.unwrap();
        assert_eq!(status.counter("total_completed"), 3);
        assert_eq!(status.total_pending, 0);
        assert_eq!(status.total_processing, 0);
        assert_eq!(worker.status().state, WorkerState::Stopped);
        assert_eq!(worker.status().completed, 3);
    }

    #[tokio::test]
    async fn test_missing_handler_fails_the_task() {
        let queue = test_queue();
        let id = queue
            .enqueue(
                "unknown_type",
                json!(null),
                EnqueueOptions::new().with_max_retries(1),
            )
            .await
            .unwrap();

        let mut worker = Worker::new("w1", Arc::clone(&queue), fast_config());
        worker.start().unwrap();

        let shared = Arc::clone(&worker.shared);
        assert!(
            wait_for(
                || shared.failed.load(Ordering::SeqCst) >= 1,
                Duration::from_secs(5)
            )
            .await
        );
        worker.stop().await.unwrap();

        let task = queue.get_task(&id).await.unwrap().unwrap();
        assert!(task
            .error_message
            .unwrap()
            .contains("no handler registered"));
        assert_eq!(queue.status().await.unwrap().dead_letter_size, 1);
    }

    #[tokio::test]
    async fn test_handler_error_schedules_retry() {
        let queue = test_queue();
        let id = queue
            .enqueue(
                "flaky",
                json!(null),
                EnqueueOptions::new().with_max_retries(3),
            )
            .await
            .unwrap();

        let mut worker = Worker::new("w1", Arc::clone(&queue), fast_config());
        worker.register_handler("flaky", |_payload: Value| async move {
            Err(anyhow::anyhow!("sensor offline"))
        });
        worker.start().unwrap();

        let shared = Arc::clone(&worker.shared);
        assert!(
            wait_for(
                || shared.failed.load(Ordering::SeqCst) >= 1,
                Duration::from_secs(5)
            )
            .await
        );
        worker.stop().await.unwrap();

        // First failure: rescheduled with back-off, not dead-lettered.
        let task = queue.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, crate::task::TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error_message.as_deref(), Some("sensor offline"));
        assert_eq!(queue.status().await.unwrap().dead_letter_size, 0);
    }

    #[tokio::test]
    async fn test_dispatch_concurrency_is_bounded() {
        let queue = test_queue();
        for _ in 0..6 {
            queue
                .enqueue("slow", json!(null), EnqueueOptions::new())
                .await
                .unwrap();
        }

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight_handler = Arc::clone(&in_flight);
        let peak_handler = Arc::clone(&peak);

        let mut worker = Worker::new(
            "w1",
            Arc::clone(&queue),
            fast_config().with_max_tasks(2),
        );
        worker.register_handler("slow", move |payload: Value| {
            let in_flight = Arc::clone(&in_flight_handler);
            let peak = Arc::clone(&peak_handler);
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(40)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(payload)
            }
        });
        worker.start().unwrap();

        let shared = Arc::clone(&worker.shared);
        assert!(
            wait_for(
                || shared.completed.load(Ordering::SeqCst) == 6,
                Duration::from_secs(10)
            )
            .await
        );
        worker.stop().await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2, "dispatch cap exceeded");
        assert_eq!(queue.status().await.unwrap().counter("total_completed"), 6);
    }

    #[tokio::test]
    async fn test_worker_heartbeat_lifecycle() {
        let queue = test_queue();
        let mut worker = Worker::new("hb-worker", Arc::clone(&queue), fast_config());
        worker.start().unwrap();

        let store = Arc::clone(queue.store());
        let key = queue.worker_key("hb-worker");
        // Allow at least one poll cycle to publish a heartbeat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let heartbeat = store.hgetall(&key).await.unwrap();
        assert_eq!(heartbeat.get("worker_id").map(String::as_str), Some("hb-worker"));
        assert!(heartbeat.contains_key("last_seen"));

        worker.stop().await.unwrap();

        // Deregistered on shutdown.
        assert!(store.hgetall(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_start_stop_contract() {
        let queue = test_queue();
        let mut worker = Worker::new("w1", Arc::clone(&queue), fast_config());

        assert!(matches!(worker.stop().await, Err(WorkerError::NotRunning)));

        worker.start().unwrap();
        assert!(worker.is_running());
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyRunning)));

        worker.stop().await.unwrap();
        assert!(!worker.is_running());

        // A stopped worker can be started again.
        worker.start().unwrap();
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_type_filtered_worker_leaves_other_tasks() {
        let queue = test_queue();
        let other = queue
            .enqueue("other", json!(null), EnqueueOptions::new())
            .await
            .unwrap();
        queue
            .enqueue("mine", json!(null), EnqueueOptions::new())
            .await
            .unwrap();

        let mut worker = Worker::new(
            "w1",
            Arc::clone(&queue),
            fast_config().with_task_types(vec!["mine".to_string()]),
        );
        worker.register_handler("mine", |payload: Value| async move { Ok(payload) });
        worker.start().unwrap();

        let shared = Arc::clone(&worker.shared);
        assert!(
            wait_for(
                || shared.completed.load(Ordering::SeqCst) == 1,
                Duration::from_secs(5)
            )
            .await
        );
        worker.stop().await.unwrap();

        let untouched = queue.get_task(&other).await.unwrap().unwrap();
        assert_eq!(untouched.status, crate::task::TaskStatus::Pending);
    }
}
