//! Priority task queue over the backing store.
//!
//! `TaskQueue` owns every task-state transition:
//!
//! - `enqueue` persists a task and indexes it by priority and ready time
//! - `process_next` claims the next eligible task for a worker
//! - `complete_task` / `fail_task` record handler outcomes, with exponential
//!   back-off on retry and dead-lettering once retries are exhausted
//! - `cancel_task` / `retry_failed` are the operator-facing transitions
//! - `check_timeouts` reaps tasks that outlived their in-flight budget
//!
//! # Key layout
//!
//! All keys share a configurable namespace prefix:
//!
//! - `{ns}:queue:{priority}`: sorted set per priority level, score = ready-at
//! - `{ns}:task:{id}`: task record hash
//! - `{ns}:dlq`: dead-letter list
//! - `{ns}:processing:{worker_id}`: per-worker in-flight set
//! - `{ns}:worker:{worker_id}`: worker heartbeat hash (TTL-bound)
//! - `{ns}:stats`: monotonic counters
//!
//! # Concurrency
//!
//! No in-process locking: each mutation is a single-key store operation, and
//! a claim is decided by who removes the task id from the priority index.
//! Concurrent `process_next` and `cancel_task` calls on the same task have
//! exactly one winner.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::metrics;
use crate::store::{Store, StoreError};
use crate::task::{
    EnqueueOptions, Task, TaskCodecError, TaskStatus, MAX_PRIORITY, MIN_PRIORITY,
};

/// Ceiling on the exponential retry back-off.
///
/// Back-off doubles per attempt starting at 2 s; without a ceiling a task
/// with a large retry budget could disappear for hours.
pub const MAX_BACKOFF_SECONDS: u64 = 900;

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store failed or is unreachable.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A persisted task record could not be decoded.
    #[error("Task codec error: {0}")]
    Codec(#[from] TaskCodecError),
}

/// Queue-level configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Key prefix shared by every record this queue touches.
    pub namespace: String,
    /// Retry budget applied when the producer does not specify one.
    pub default_max_retries: u32,
    /// In-flight budget applied when the producer does not specify one.
    pub default_timeout_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            namespace: "app".to_string(),
            default_max_retries: crate::task::DEFAULT_MAX_RETRIES,
            default_timeout_seconds: crate::task::DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Sets the default retry budget.
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Sets the default in-flight budget in seconds.
    pub fn with_default_timeout_seconds(mut self, seconds: u64) -> Self {
        self.default_timeout_seconds = seconds;
        self
    }
}

/// Per-type slice of the aggregate counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TypeCounts {
    /// Tasks of this type ever enqueued.
    pub enqueued: i64,
    /// Tasks of this type completed successfully.
    pub completed: i64,
    /// Tasks of this type that exhausted their retries.
    pub failed: i64,
}

/// Read-only aggregate snapshot of queue state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Pending tasks per priority level.
    pub pending_by_priority: BTreeMap<u8, u64>,
    /// Total pending tasks across all priority levels.
    pub total_pending: u64,
    /// Tasks currently claimed by workers.
    pub total_processing: u64,
    /// Tasks parked in the dead-letter queue.
    pub dead_letter_size: u64,
    /// Raw monotonic counters from the stats hash.
    pub counters: HashMap<String, i64>,
}

impl QueueStatus {
    /// Reads a named counter, defaulting to zero.
    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Pending plus in-flight tasks.
    pub fn total_backlog(&self) -> u64 {
        self.total_pending + self.total_processing
    }

    /// Per-type enqueue/complete/fail breakdown derived from the counters.
    pub fn type_breakdown(&self) -> BTreeMap<String, TypeCounts> {
        let mut breakdown: BTreeMap<String, TypeCounts> = BTreeMap::new();
        for (name, value) in &self.counters {
            if let Some(task_type) = name.strip_prefix("enqueued_") {
                breakdown.entry(task_type.to_string()).or_default().enqueued = *value;
            } else if let Some(task_type) = name.strip_prefix("completed_") {
                breakdown.entry(task_type.to_string()).or_default().completed = *value;
            } else if let Some(task_type) = name.strip_prefix("failed_") {
                breakdown.entry(task_type.to_string()).or_default().failed = *value;
            }
        }
        breakdown
    }
}

/// Converts a timestamp to a sorted-set score with fractional seconds.
fn score_for(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Back-off before the next attempt: doubles per retry, starting at 2 s.
fn backoff_seconds(retry_count: u32) -> u64 {
    let exponent = retry_count.min(63);
    (1u64 << exponent).min(MAX_BACKOFF_SECONDS)
}

/// Priority task queue backed by an ordered key-value store.
pub struct TaskQueue {
    store: Arc<dyn Store>,
    config: QueueConfig,
}

impl TaskQueue {
    /// Creates a queue over the given store.
    pub fn new(store: Arc<dyn Store>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    /// The backing store, for components that share it (worker heartbeats).
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue options seeded from the queue-level defaults.
    pub fn default_options(&self) -> EnqueueOptions {
        EnqueueOptions::new()
            .with_max_retries(self.config.default_max_retries)
            .with_timeout_seconds(self.config.default_timeout_seconds)
    }

    fn queue_key(&self, priority: u8) -> String {
        format!("{}:queue:{}", self.config.namespace, priority)
    }

    fn task_key(&self, task_id: &str) -> String {
        format!("{}:task:{}", self.config.namespace, task_id)
    }

    fn dlq_key(&self) -> String {
        format!("{}:dlq", self.config.namespace)
    }

    /// Heartbeat hash key for a worker.
    pub fn worker_key(&self, worker_id: &str) -> String {
        format!("{}:worker:{}", self.config.namespace, worker_id)
    }

    fn processing_key(&self, worker_id: &str) -> String {
        format!("{}:processing:{}", self.config.namespace, worker_id)
    }

    fn stats_key(&self) -> String {
        format!("{}:stats", self.config.namespace)
    }

    async fn bump(&self, counter: &str) -> Result<(), QueueError> {
        self.store.hincr_by(&self.stats_key(), counter, 1).await?;
        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<Task>, QueueError> {
        let fields = self.store.hgetall(&self.task_key(task_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Task::from_fields(&fields)?))
    }

    async fn save_task(&self, task: &Task) -> Result<(), QueueError> {
        self.store
            .hset_fields(&self.task_key(&task.id), &task.to_fields()?)
            .await?;
        Ok(())
    }

    /// Rewrites a task record from scratch, dropping fields that became unset.
    async fn rewrite_task(&self, task: &Task) -> Result<(), QueueError> {
        self.store.del(&self.task_key(&task.id)).await?;
        self.save_task(task).await
    }

    /// Persists a new task and makes it eligible at its ready time.
    ///
    /// Returns the generated task id. Store failures propagate to the caller;
    /// nothing is buffered locally.
    pub async fn enqueue(
        &self,
        task_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        let task = Task::new(task_type, payload, &options);

        self.save_task(&task).await?;
        self.store
            .zadd(
                &self.queue_key(task.priority),
                &task.id,
                score_for(task.ready_at()),
            )
            .await?;

        self.bump("total_enqueued").await?;
        self.bump(&format!("enqueued_{}", task.task_type)).await?;
        metrics::record_enqueued(&task.task_type);

        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            scheduled = task.scheduled_at.is_some(),
            "Task enqueued"
        );

        Ok(task.id)
    }

    /// Claims the next eligible task for a worker.
    ///
    /// Scans priority indexes from highest to lowest; within one level, ready
    /// tasks are taken oldest-ready-first. Priority strictly dominates ready
    /// time. An optional type filter restricts what the worker will accept.
    ///
    /// Returns `None` when no eligible task exists.
    pub async fn process_next(
        &self,
        worker_id: &str,
        task_types: Option<&[String]>,
    ) -> Result<Option<Task>, QueueError> {
        let max_score = score_for(Utc::now());

        for priority in (MIN_PRIORITY..=MAX_PRIORITY).rev() {
            let index_key = self.queue_key(priority);
            let ready = self
                .store
                .zrange_by_score(&index_key, 0.0, max_score)
                .await?;

            for task_id in ready {
                let Some(mut task) = self.load_task(&task_id).await? else {
                    // Index entry without a record; left behind by a purge.
                    self.store.zrem(&index_key, &task_id).await?;
                    continue;
                };

                if let Some(filter) = task_types {
                    if !filter.iter().any(|t| *t == task.task_type) {
                        continue;
                    }
                }

                // Whoever removes the index entry owns the claim. A false
                // return means a concurrent claim or cancel won.
                if !self.store.zrem(&index_key, &task_id).await? {
                    continue;
                }

                let now = Utc::now();
                task.status = TaskStatus::Processing;
                task.started_at = Some(now);
                task.updated_at = now;
                task.worker_id = Some(worker_id.to_string());

                self.save_task(&task).await?;
                self.store
                    .sadd(&self.processing_key(worker_id), &task.id)
                    .await?;

                debug!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    priority = task.priority,
                    worker_id = %worker_id,
                    attempt = task.retry_count + 1,
                    "Task claimed"
                );

                return Ok(Some(task));
            }
        }

        Ok(None)
    }

    /// Records a successful handler result.
    ///
    /// Returns `false` without mutating anything if the task is missing or
    /// not in flight, which is a benign race, not an error.
    pub async fn complete_task(
        &self,
        task_id: &str,
        result: Option<Value>,
        worker_id: Option<&str>,
    ) -> Result<bool, QueueError> {
        let Some(mut task) = self.load_task(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Processing {
            return Ok(false);
        }

        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.updated_at = now;
        task.result = result;

        self.save_task(&task).await?;
        self.clear_in_flight(&task, worker_id).await?;

        self.bump("total_completed").await?;
        self.bump(&format!("completed_{}", task.task_type)).await?;
        metrics::record_processed(&task.task_type, "completed");

        debug!(task_id = %task.id, task_type = %task.task_type, "Task completed");
        Ok(true)
    }

    /// Records a handler failure.
    ///
    /// Increments the retry counter; if the budget allows and `retry` is set,
    /// the task is rescheduled with exponential back-off, otherwise it is
    /// dead-lettered. Returns `false` for missing or not-in-flight tasks.
    pub async fn fail_task(
        &self,
        task_id: &str,
        error_message: &str,
        worker_id: Option<&str>,
        retry: bool,
    ) -> Result<bool, QueueError> {
        let Some(mut task) = self.load_task(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Processing {
            return Ok(false);
        }

        let now = Utc::now();
        task.retry_count += 1;
        task.error_message = Some(error_message.to_string());
        task.updated_at = now;

        if retry && task.has_retries_left() {
            let delay = backoff_seconds(task.retry_count);
            task.status = TaskStatus::Pending;
            task.scheduled_at = Some(now + chrono::Duration::seconds(delay as i64));

            self.save_task(&task).await?;
            self.store
                .zadd(
                    &self.queue_key(task.priority),
                    &task.id,
                    score_for(task.ready_at()),
                )
                .await?;
            self.bump("total_retried").await?;

            warn!(
                task_id = %task.id,
                task_type = %task.task_type,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                delay_seconds = delay,
                error = %error_message,
                "Task failed, retry scheduled"
            );
        } else {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(now);

            self.save_task(&task).await?;
            self.store.lpush(&self.dlq_key(), &task.id).await?;
            self.bump("total_failed").await?;
            self.bump(&format!("failed_{}", task.task_type)).await?;
            metrics::record_processed(&task.task_type, "failed");

            error!(
                task_id = %task.id,
                task_type = %task.task_type,
                retry_count = task.retry_count,
                error = %error_message,
                "Task failed permanently, moved to dead-letter queue"
            );
        }

        self.clear_in_flight(&task, worker_id).await?;
        Ok(true)
    }

    /// Cancels a task that no worker has claimed yet.
    ///
    /// Gated on removing the task from its priority index, so a cancel racing
    /// a claim has exactly one winner. Returns `false` for any status other
    /// than pending.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool, QueueError> {
        let Some(mut task) = self.load_task(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }

        if !self
            .store
            .zrem(&self.queue_key(task.priority), task_id)
            .await?
        {
            // A worker claimed it between the status read and the removal.
            return Ok(false);
        }

        let now = Utc::now();
        task.status = TaskStatus::Cancelled;
        task.updated_at = now;
        task.completed_at = Some(now);

        self.save_task(&task).await?;
        self.bump("total_cancelled").await?;

        debug!(task_id = %task.id, task_type = %task.task_type, "Task cancelled");
        Ok(true)
    }

    /// Replays a dead-lettered task.
    ///
    /// Resets the retry budget, clears the failure record and makes the task
    /// eligible immediately. Returns `false` unless the task is `Failed`.
    pub async fn retry_failed(&self, task_id: &str) -> Result<bool, QueueError> {
        let Some(mut task) = self.load_task(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Failed {
            return Ok(false);
        }

        let now = Utc::now();
        task.status = TaskStatus::Pending;
        task.retry_count = 0;
        task.error_message = None;
        task.started_at = None;
        task.completed_at = None;
        task.worker_id = None;
        task.scheduled_at = Some(now);
        task.updated_at = now;

        self.rewrite_task(&task).await?;
        self.store
            .zadd(&self.queue_key(task.priority), task_id, score_for(now))
            .await?;
        self.store.lrem(&self.dlq_key(), task_id).await?;

        debug!(task_id = %task.id, task_type = %task.task_type, "Dead-lettered task requeued");
        Ok(true)
    }

    /// Reaps in-flight tasks that outlived their timeout budget.
    ///
    /// This is bookkeeping only: a reaped task is dead-lettered even though
    /// its handler may still be running; the engine has no way to abort it.
    /// Safe to run concurrently with normal claim/complete traffic.
    pub async fn check_timeouts(&self) -> Result<Vec<String>, QueueError> {
        let now = Utc::now();
        let mut reaped = Vec::new();

        let pattern = format!("{}:processing:*", self.config.namespace);
        for in_flight_key in self.store.scan_keys(&pattern).await? {
            for task_id in self.store.smembers(&in_flight_key).await? {
                let Some(mut task) = self.load_task(&task_id).await? else {
                    self.store.srem(&in_flight_key, &task_id).await?;
                    continue;
                };

                if task.status != TaskStatus::Processing {
                    // Membership left behind by an interrupted completion.
                    self.store.srem(&in_flight_key, &task_id).await?;
                    continue;
                }

                let Some(started_at) = task.started_at else {
                    continue;
                };
                let elapsed_ms = (now - started_at).num_milliseconds();
                if elapsed_ms <= task.timeout_seconds as i64 * 1000 {
                    continue;
                }

                task.status = TaskStatus::TimedOut;
                task.completed_at = Some(now);
                task.updated_at = now;
                task.error_message = Some(format!(
                    "timed out after exceeding {} seconds in flight",
                    task.timeout_seconds
                ));

                self.save_task(&task).await?;
                self.store.lpush(&self.dlq_key(), &task.id).await?;
                self.store.srem(&in_flight_key, &task.id).await?;
                self.bump("total_timeout").await?;
                metrics::record_processed(&task.task_type, "timeout");

                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    worker_id = task.worker_id.as_deref().unwrap_or("unknown"),
                    timeout_seconds = task.timeout_seconds,
                    "Task timed out, moved to dead-letter queue"
                );

                reaped.push(task_id);
            }
        }

        Ok(reaped)
    }

    /// Fetches a task record without touching its state.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, QueueError> {
        self.load_task(task_id).await
    }

    /// Peeks at the newest entries of the dead-letter queue.
    pub async fn dead_letter_tasks(&self, limit: usize) -> Result<Vec<Task>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let ids = self
            .store
            .lrange(&self.dlq_key(), 0, limit as isize - 1)
            .await?;

        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = self.load_task(&id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Builds an aggregate snapshot of queue state.
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let mut pending_by_priority = BTreeMap::new();
        let mut total_pending = 0;
        for priority in MIN_PRIORITY..=MAX_PRIORITY {
            let count = self.store.zcard(&self.queue_key(priority)).await?;
            total_pending += count;
            pending_by_priority.insert(priority, count);
            metrics::record_queue_depth(priority, count);
        }

        let mut total_processing = 0;
        let pattern = format!("{}:processing:*", self.config.namespace);
        for key in self.store.scan_keys(&pattern).await? {
            total_processing += self.store.scard(&key).await?;
        }

        let dead_letter_size = self.store.llen(&self.dlq_key()).await?;

        let counters = self
            .store
            .hgetall(&self.stats_key())
            .await?
            .into_iter()
            .filter_map(|(name, value)| value.parse().ok().map(|v| (name, v)))
            .collect();

        Ok(QueueStatus {
            pending_by_priority,
            total_pending,
            total_processing,
            dead_letter_size,
            counters,
        })
    }

    /// Deletes every key under this queue's namespace.
    ///
    /// **Warning**: destroys all task records, indexes, stats and heartbeats.
    /// Administrative/test reset only.
    pub async fn purge(&self) -> Result<(), QueueError> {
        let pattern = format!("{}:*", self.config.namespace);
        for key in self.store.scan_keys(&pattern).await? {
            self.store.del(&key).await?;
        }
        Ok(())
    }

    /// Clears the per-worker in-flight membership for a task.
    async fn clear_in_flight(
        &self,
        task: &Task,
        worker_id: Option<&str>,
    ) -> Result<(), QueueError> {
        let owner = worker_id.or(task.worker_id.as_deref());
        if let Some(owner) = owner {
            self.store
                .srem(&self.processing_key(owner), &task.id)
                .await?;
        }
        Ok(())
    }
}
