//! Worker pool supervision.
//!
//! `WorkerManager` owns a collection of workers sharing one queue: it starts
//! and stops them, scales the pool, aggregates their status and drives the
//! periodic timeout sweep. No task-processing logic lives here; this is
//! control plane only.
//!
//! The manager is an ordinary owned value with an explicit lifecycle:
//! construct one per process or service, never as global state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::queue::TaskQueue;
use crate::worker::{Handler, Worker, WorkerConfig, WorkerError, WorkerStatus};

/// Per-worker overrides applied when starting a worker.
#[derive(Debug, Clone, Default)]
pub struct StartWorkerOptions {
    /// Explicit worker id; generated when absent.
    pub id: Option<String>,
    /// Restrict the worker to these task types.
    pub task_types: Option<Vec<String>>,
    /// Override the dispatch concurrency cap.
    pub max_tasks: Option<usize>,
}

impl StartWorkerOptions {
    /// Creates empty options (all values inherited from the manager).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit worker id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Restricts the worker to the given task types.
    pub fn with_task_types(mut self, task_types: Vec<String>) -> Self {
        self.task_types = Some(task_types);
        self
    }

    /// Overrides the dispatch concurrency cap.
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = Some(max_tasks);
        self
    }
}

/// Supervises a pool of workers sharing one queue.
pub struct WorkerManager {
    queue: Arc<TaskQueue>,
    base_config: WorkerConfig,
    handlers: HashMap<String, Arc<dyn Handler>>,
    workers: HashMap<String, Worker>,
    start_order: Vec<String>,
    sweeper: Option<(broadcast::Sender<()>, JoinHandle<()>)>,
}

impl WorkerManager {
    /// Creates a manager over a queue.
    ///
    /// `base_config` is the template every worker starts from; per-worker
    /// overrides come in through `StartWorkerOptions`.
    pub fn new(queue: Arc<TaskQueue>, base_config: WorkerConfig) -> Self {
        Self {
            queue,
            base_config,
            handlers: HashMap::new(),
            workers: HashMap::new(),
            start_order: Vec::new(),
            sweeper: None,
        }
    }

    /// Registers a handler shared by every worker started afterwards.
    pub fn register_handler(
        &mut self,
        task_type: impl Into<String>,
        handler: impl Handler + 'static,
    ) {
        self.handlers.insert(task_type.into(), Arc::new(handler));
    }

    /// Starts a new worker and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::AlreadyRunning` if a worker with the requested
    /// id is already in the pool.
    pub fn start_worker(&mut self, options: StartWorkerOptions) -> Result<String, WorkerError> {
        let worker_id = options.id.unwrap_or_else(generate_worker_id);
        if self.workers.contains_key(&worker_id) {
            return Err(WorkerError::AlreadyRunning);
        }

        let mut config = self.base_config.clone();
        if let Some(task_types) = options.task_types {
            config.task_types = Some(task_types);
        }
        if let Some(max_tasks) = options.max_tasks {
            config.max_tasks = max_tasks;
        }

        let mut worker = Worker::new(worker_id.clone(), Arc::clone(&self.queue), config);
        for (task_type, handler) in &self.handlers {
            worker.register_handler(task_type.clone(), Arc::clone(handler));
        }
        worker.start()?;

        info!(worker_id = %worker_id, pool_size = self.workers.len() + 1, "Worker added to pool");
        self.start_order.push(worker_id.clone());
        self.workers.insert(worker_id.clone(), worker);

        Ok(worker_id)
    }

    /// Stops one worker and removes it from the pool.
    ///
    /// Waits for the worker's run loop to drain its in-flight dispatches.
    /// Returns `false` if no such worker is tracked.
    pub async fn stop_worker(&mut self, worker_id: &str) -> bool {
        let Some(mut worker) = self.workers.remove(worker_id) else {
            return false;
        };
        self.start_order.retain(|id| id != worker_id);

        if let Err(e) = worker.stop().await {
            warn!(worker_id = %worker_id, error = %e, "Worker did not stop cleanly");
        }
        info!(worker_id = %worker_id, pool_size = self.workers.len(), "Worker removed from pool");
        true
    }

    /// Stops the timeout sweeper and every worker, clearing the pool.
    pub async fn stop_all(&mut self) {
        self.stop_timeout_sweeper().await;

        let ids: Vec<String> = self.start_order.clone();
        for worker_id in ids {
            self.stop_worker(&worker_id).await;
        }
        info!("Worker pool stopped");
    }

    /// Scales the pool to exactly `count` workers.
    ///
    /// Scaling up starts new workers with the given task-type filter; scaling
    /// down stops the most recently started workers first.
    pub async fn scale_workers(
        &mut self,
        count: usize,
        task_types: Option<Vec<String>>,
    ) -> Result<(), WorkerError> {
        let current = self.workers.len();

        if count > current {
            info!(current, target = count, "Scaling worker pool up");
            for _ in 0..count - current {
                let mut options = StartWorkerOptions::new();
                if let Some(ref task_types) = task_types {
                    options = options.with_task_types(task_types.clone());
                }
                self.start_worker(options)?;
            }
        } else if count < current {
            info!(current, target = count, "Scaling worker pool down");
            while self.workers.len() > count {
                let Some(worker_id) = self.start_order.last().cloned() else {
                    break;
                };
                self.stop_worker(&worker_id).await;
            }
        }

        Ok(())
    }

    /// Status snapshot of one worker.
    pub fn get_worker_status(&self, worker_id: &str) -> Option<WorkerStatus> {
        self.workers.get(worker_id).map(Worker::status)
    }

    /// Status snapshots of every worker, in start order.
    pub fn all_worker_statuses(&self) -> Vec<WorkerStatus> {
        self.start_order
            .iter()
            .filter_map(|id| self.get_worker_status(id))
            .collect()
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The shared queue.
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Starts the periodic timeout sweep.
    ///
    /// Replaces a previously running sweeper. The sweep marks overdue
    /// in-flight tasks as timed out; it cannot interrupt the handlers that
    /// are still running them.
    pub fn start_timeout_sweeper(&mut self, interval: Duration) {
        if let Some((shutdown_tx, _)) = &self.sweeper {
            let _ = shutdown_tx.send(());
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let queue = Arc::clone(&self.queue);

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Timeout sweeper started");
            loop {
                let stop = tokio::select! {
                    _ = shutdown_rx.recv() => true,
                    _ = tokio::time::sleep(interval) => false,
                };
                if stop {
                    break;
                }

                match queue.check_timeouts().await {
                    Ok(reaped) if !reaped.is_empty() => {
                        warn!(count = reaped.len(), "Timeout sweep reaped overdue tasks");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Timeout sweep failed");
                    }
                }
            }
            info!("Timeout sweeper stopped");
        });

        self.sweeper = Some((shutdown_tx, handle));
    }

    /// Stops the timeout sweeper if one is running.
    pub async fn stop_timeout_sweeper(&mut self) {
        if let Some((shutdown_tx, handle)) = self.sweeper.take() {
            let _ = shutdown_tx.send(());
            let _ = handle.await;
        }
    }
}

fn generate_worker_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("worker-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueConfig;
    use crate::store::MemoryStore;
    use crate::task::EnqueueOptions;
    use crate::worker::WorkerState;
    use serde_json::{json, Value};

    fn test_manager() -> WorkerManager {
        let queue = Arc::new(TaskQueue::new(
            Arc::new(MemoryStore::new()),
            QueueConfig::new("test"),
        ));
        let config = WorkerConfig::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_shutdown_timeout(Duration::from_secs(5));
        WorkerManager::new(queue, config)
    }

    #[tokio::test]
    async fn test_start_and_stop_worker() {
        let mut manager = test_manager();

        let id = manager
            .start_worker(StartWorkerOptions::new().with_id("alpha"))
            .unwrap();
        assert_eq!(id, "alpha");
        assert_eq!(manager.worker_count(), 1);

        let status = manager.get_worker_status("alpha").unwrap();
        assert_ne!(status.state, WorkerState::Error);

        // Duplicate ids are rejected while the worker is pooled.
        assert!(manager
            .start_worker(StartWorkerOptions::new().with_id("alpha"))
            .is_err());

        assert!(manager.stop_worker("alpha").await);
        assert!(!manager.stop_worker("alpha").await);
        assert_eq!(manager.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_generated_ids_are_distinct() {
        let mut manager = test_manager();
        let a = manager.start_worker(StartWorkerOptions::new()).unwrap();
        let b = manager.start_worker(StartWorkerOptions::new()).unwrap();

        assert_ne!(a, b);
        assert!(a.starts_with("worker-"));
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_scale_up_then_down() {
        let mut manager = test_manager();

        manager.scale_workers(5, None).await.unwrap();
        assert_eq!(manager.worker_count(), 5);
        let first_two: Vec<String> = manager
            .all_worker_statuses()
            .iter()
            .take(2)
            .map(|s| s.worker_id.clone())
            .collect();

        manager.scale_workers(2, None).await.unwrap();
        assert_eq!(manager.worker_count(), 2);

        // Most-recently-started workers go first; the oldest two survive,
        // and the survivors have drained everything.
        let statuses = manager.all_worker_statuses();
        let remaining: Vec<String> = statuses.iter().map(|s| s.worker_id.clone()).collect();
        assert_eq!(remaining, first_two);
        for status in &statuses {
            assert_eq!(status.active_tasks, 0);
        }

        // Scaling to the current size is a no-op.
        manager.scale_workers(2, None).await.unwrap();
        assert_eq!(manager.worker_count(), 2);

        manager.stop_all().await;
        assert_eq!(manager.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_processes_with_shared_handlers() {
        let mut manager = test_manager();
        manager.register_handler("echo", |payload: Value| async move { Ok(payload) });
        manager.scale_workers(2, None).await.unwrap();

        let queue = Arc::clone(manager.queue());
        for i in 0..4 {
            queue
                .enqueue("echo", json!({"seq": i}), EnqueueOptions::new())
                .await
                .unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let status = queue.status().await.unwrap();
            if status.counter("total_completed") == 4 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "tasks did not finish");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_timeout_sweeper_reaps_stuck_tasks() {
        let mut manager = test_manager();
        let queue = Arc::clone(manager.queue());

        let id = queue
            .enqueue(
                "stuck",
                json!(null),
                EnqueueOptions::new().with_timeout_seconds(0),
            )
            .await
            .unwrap();
        // Claim on behalf of a worker that will never report back.
        queue.process_next("ghost", None).await.unwrap().unwrap();

        manager.start_timeout_sweeper(Duration::from_millis(20));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let task = queue.get_task(&id).await.unwrap().unwrap();
            if task.status == crate::task::TaskStatus::TimedOut {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "task never timed out");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(queue.status().await.unwrap().dead_letter_size, 1);
        manager.stop_all().await;
    }
}
