//! furrow: Redis-backed priority task queue with worker pools.
//!
//! This library provides infrastructure for background task execution:
//!
//! - **TaskQueue**: priority-ordered, persistent queue with retry back-off,
//!   dead-letter handling and timeout detection
//! - **Worker**: polling loop that claims tasks and dispatches them to
//!   registered handlers, bounded by a concurrency cap
//! - **WorkerManager**: supervises a pool of workers sharing one queue
//! - **Store**: thin trait over the backing ordered key-value store, with
//!   Redis and in-memory implementations
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │  (API/CLI)   │
//!                      └──────┬───────┘
//!                             │ enqueue
//!                      ┌──────▼───────┐
//!                      │    Store     │
//!                      │ (Redis keys) │
//!                      └──────┬───────┘
//!                             │ process_next
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use furrow::{EnqueueOptions, QueueConfig, RedisStore, TaskQueue, WorkerConfig, WorkerManager};
//! use std::sync::Arc;
//!
//! let store = Arc::new(RedisStore::connect("redis://localhost:6379").await?);
//! let queue = Arc::new(TaskQueue::new(store, QueueConfig::new("farm")));
//!
//! // Producer side: enqueue work.
//! let task_id = queue
//!     .enqueue(
//!         "irrigation_plan",
//!         serde_json::json!({"field_id": 12}),
//!         EnqueueOptions::new().with_priority(8),
//!     )
//!     .await?;
//!
//! // Consumer side: run a worker pool with registered handlers.
//! let mut manager = WorkerManager::new(Arc::clone(&queue), WorkerConfig::new());
//! manager.register_handler("irrigation_plan", |payload| async move {
//!     // domain logic lives entirely in the handler
//!     Ok(payload)
//! });
//! manager.scale_workers(4, None).await?;
//!
//! // Graceful shutdown.
//! manager.stop_all().await;
//! ```
//!
//! # Delivery semantics
//!
//! Execution is at-least-once: a claimed task whose worker dies is reaped by
//! the timeout sweep and dead-lettered, and a replayed task runs again from
//! scratch. Handlers must be idempotent if that matters to the caller.

pub mod cli;
pub mod manager;
pub mod metrics;
pub mod queue;
pub mod store;
pub mod task;
pub mod worker;

// Re-export main types for convenience
pub use manager::{StartWorkerOptions, WorkerManager};
pub use queue::{QueueConfig, QueueError, QueueStatus, TaskQueue, TypeCounts};
pub use store::{MemoryStore, RedisStore, Store, StoreError};
pub use task::{EnqueueOptions, Task, TaskCodecError, TaskStatus};
pub use worker::{Handler, Worker, WorkerConfig, WorkerError, WorkerState, WorkerStatus};
