//! Task definitions for the queue engine.
//!
//! This module defines the core types stored in the backing store:
//!
//! - `Task`: one unit of schedulable work with payload, priority and lifecycle
//! - `TaskStatus`: the task state machine
//! - `EnqueueOptions`: per-task scheduling knobs supplied at enqueue time
//!
//! Tasks are persisted as flat string hashes. `Task::to_fields` and
//! `Task::from_fields` are the single serialization boundary: `payload` and
//! `result` are JSON-encoded there and treated as opaque values everywhere
//! else in the engine.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Lowest schedulable priority.
pub const MIN_PRIORITY: u8 = 1;

/// Highest schedulable priority.
pub const MAX_PRIORITY: u8 = 10;

/// Default priority for tasks enqueued without an explicit one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Default maximum number of retry attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default maximum in-flight duration before the timeout sweep reaps a task.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Errors that can occur while encoding or decoding a task hash.
#[derive(Debug, Error)]
pub enum TaskCodecError {
    /// A required hash field was absent.
    #[error("Task field '{0}' is missing")]
    MissingField(&'static str),

    /// A hash field held a value that does not parse.
    #[error("Task field '{field}' has invalid value '{value}'")]
    InvalidField { field: &'static str, value: String },

    /// JSON encoding or decoding of payload/result failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in a priority index for a worker to claim it.
    Pending,
    /// Claimed by a worker and currently executing.
    Processing,
    /// Handler returned a result.
    Completed,
    /// Retries exhausted; parked in the dead-letter queue.
    Failed,
    /// Cancelled before any worker claimed it.
    Cancelled,
    /// Exceeded its in-flight budget and was reaped by the timeout sweep.
    #[serde(rename = "timeout")]
    TimedOut,
}

impl TaskStatus {
    /// Returns whether this status is terminal.
    ///
    /// Terminal tasks are never claimed again unless explicitly replayed
    /// through `TaskQueue::retry_failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::TimedOut
        )
    }

    /// Wire form used in the task hash and in worker heartbeats.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::TimedOut => "timeout",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskCodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "timeout" => Ok(TaskStatus::TimedOut),
            other => Err(TaskCodecError::InvalidField {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Scheduling options supplied at enqueue time.
///
/// All fields have engine-wide defaults; producers override only what they
/// need.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Priority 1-10; higher is served first. Clamped into range.
    pub priority: u8,
    /// Maximum number of retry attempts before dead-lettering.
    pub max_retries: u32,
    /// Maximum in-flight duration in seconds.
    pub timeout_seconds: u64,
    /// Earliest time the task becomes eligible for dequeue.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            scheduled_at: None,
        }
    }
}

impl EnqueueOptions {
    /// Creates options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the priority (clamped to 1-10 when the task is built).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the maximum number of retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the in-flight timeout in seconds.
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Delays eligibility until the given time.
    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// One unit of schedulable work.
///
/// Identity (`id`, `task_type`, `payload`) is immutable after enqueue; the
/// lifecycle fields are mutated exclusively by `TaskQueue` operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, generated on enqueue and never reused.
    pub id: String,
    /// Consumer-defined category used to route the task to a handler.
    pub task_type: String,
    /// Structured payload handed to the handler; opaque to the engine.
    pub payload: Value,
    /// Priority 1-10; higher is served first.
    pub priority: u8,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the task was enqueued.
    pub created_at: DateTime<Utc>,
    /// Last lifecycle mutation.
    pub updated_at: DateTime<Utc>,
    /// Earliest eligibility time, for delayed scheduling and retry back-off.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the current/last attempt was claimed.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Maximum number of retry attempts before dead-lettering.
    pub max_retries: u32,
    /// Maximum allowed in-flight duration in seconds.
    pub timeout_seconds: u64,
    /// Worker currently or last holding the task.
    pub worker_id: Option<String>,
    /// Last failure message, for dead-letter inspection.
    pub error_message: Option<String>,
    /// Handler result for completed tasks; opaque to the engine.
    pub result: Option<Value>,
}

impl Task {
    /// Builds a new pending task with a fresh UUID.
    pub fn new(task_type: impl Into<String>, payload: Value, options: &EnqueueOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
            priority: options.priority.clamp(MIN_PRIORITY, MAX_PRIORITY),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            scheduled_at: options.scheduled_at,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: options.max_retries,
            timeout_seconds: options.timeout_seconds,
            worker_id: None,
            error_message: None,
            result: None,
        }
    }

    /// The time the task becomes eligible for dequeue.
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.scheduled_at.unwrap_or(self.created_at)
    }

    /// Returns whether another retry attempt remains.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Encodes the task as flat hash fields.
    ///
    /// Optional fields are omitted when absent; `payload` and `result` are
    /// JSON-encoded here and nowhere else.
    pub fn to_fields(&self) -> Result<Vec<(String, String)>, TaskCodecError> {
        let mut fields = vec![
            ("id".to_string(), self.id.clone()),
            ("task_type".to_string(), self.task_type.clone()),
            ("payload".to_string(), serde_json::to_string(&self.payload)?),
            ("priority".to_string(), self.priority.to_string()),
            ("status".to_string(), self.status.to_string()),
            ("created_at".to_string(), self.created_at.to_rfc3339()),
            ("updated_at".to_string(), self.updated_at.to_rfc3339()),
            ("retry_count".to_string(), self.retry_count.to_string()),
            ("max_retries".to_string(), self.max_retries.to_string()),
            (
                "timeout_seconds".to_string(),
                self.timeout_seconds.to_string(),
            ),
        ];

        if let Some(at) = self.scheduled_at {
            fields.push(("scheduled_at".to_string(), at.to_rfc3339()));
        }
        if let Some(at) = self.started_at {
            fields.push(("started_at".to_string(), at.to_rfc3339()));
        }
        if let Some(at) = self.completed_at {
            fields.push(("completed_at".to_string(), at.to_rfc3339()));
        }
        if let Some(ref worker) = self.worker_id {
            fields.push(("worker_id".to_string(), worker.clone()));
        }
        if let Some(ref message) = self.error_message {
            fields.push(("error_message".to_string(), message.clone()));
        }
        if let Some(ref result) = self.result {
            fields.push(("result".to_string(), serde_json::to_string(result)?));
        }

        Ok(fields)
    }

    /// Decodes a task from the flat hash fields produced by `to_fields`.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, TaskCodecError> {
        Ok(Self {
            id: require(fields, "id")?.to_string(),
            task_type: require(fields, "task_type")?.to_string(),
            payload: serde_json::from_str(require(fields, "payload")?)?,
            priority: parse_field(fields, "priority")?,
            status: require(fields, "status")?.parse()?,
            created_at: parse_timestamp(fields, "created_at")?
                .ok_or(TaskCodecError::MissingField("created_at"))?,
            updated_at: parse_timestamp(fields, "updated_at")?
                .ok_or(TaskCodecError::MissingField("updated_at"))?,
            scheduled_at: parse_timestamp(fields, "scheduled_at")?,
            started_at: parse_timestamp(fields, "started_at")?,
            completed_at: parse_timestamp(fields, "completed_at")?,
            retry_count: parse_field(fields, "retry_count")?,
            max_retries: parse_field(fields, "max_retries")?,
            timeout_seconds: parse_field(fields, "timeout_seconds")?,
            worker_id: fields.get("worker_id").cloned(),
            error_message: fields.get("error_message").cloned(),
            result: fields
                .get("result")
                .map(|raw| serde_json::from_str(raw))
                .transpose()?,
        })
    }
}

fn require<'a>(
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, TaskCodecError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(TaskCodecError::MissingField(name))
}

fn parse_field<T: FromStr>(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<T, TaskCodecError> {
    let raw = require(fields, name)?;
    raw.parse().map_err(|_| TaskCodecError::InvalidField {
        field: name,
        value: raw.to_string(),
    })
}

fn parse_timestamp(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<Option<DateTime<Utc>>, TaskCodecError> {
    match fields.get(name) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| TaskCodecError::InvalidField {
                field: name,
                value: raw.clone(),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_new_defaults() {
        let task = Task::new("irrigation_plan", json!({"field": 7}), &EnqueueOptions::new());

        assert!(!task.id.is_empty());
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(task.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert!(task.scheduled_at.is_none());
        assert!(task.worker_id.is_none());
        assert!(task.has_retries_left());
    }

    #[test]
    fn test_priority_clamped_into_range() {
        let low = Task::new("a", json!(null), &EnqueueOptions::new().with_priority(0));
        let high = Task::new("a", json!(null), &EnqueueOptions::new().with_priority(42));

        assert_eq!(low.priority, MIN_PRIORITY);
        assert_eq!(high.priority, MAX_PRIORITY);
    }

    #[test]
    fn test_enqueue_options_builder() {
        let at = Utc::now();
        let options = EnqueueOptions::new()
            .with_priority(8)
            .with_max_retries(5)
            .with_timeout_seconds(60)
            .with_scheduled_at(at);

        assert_eq!(options.priority, 8);
        assert_eq!(options.max_retries, 5);
        assert_eq!(options.timeout_seconds, 60);
        assert_eq!(options.scheduled_at, Some(at));
    }

    #[test]
    fn test_ready_at_prefers_scheduled_time() {
        let later = Utc::now() + chrono::Duration::minutes(5);
        let task = Task::new(
            "a",
            json!(null),
            &EnqueueOptions::new().with_scheduled_at(later),
        );

        assert_eq!(task.ready_at(), later);

        let immediate = Task::new("a", json!(null), &EnqueueOptions::new());
        assert_eq!(immediate.ready_at(), immediate.created_at);
    }

    #[test]
    fn test_status_wire_form_roundtrip() {
        let statuses = [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::TimedOut,
        ];

        for status in statuses {
            let parsed: TaskStatus = status.as_str().parse().expect("wire form should parse");
            assert_eq!(parsed, status);
        }

        assert_eq!(TaskStatus::TimedOut.as_str(), "timeout");
        assert!("unknown".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::TimedOut.is_terminal());
    }

    #[test]
    fn test_hash_codec_roundtrip() {
        let mut task = Task::new(
            "soil_moisture_sync",
            json!({"sensor": "s-19", "window_hours": 24}),
            &EnqueueOptions::new().with_priority(9).with_timeout_seconds(120),
        );
        task.status = TaskStatus::Processing;
        task.started_at = Some(Utc::now());
        task.worker_id = Some("worker-1".to_string());
        task.retry_count = 2;

        let fields: HashMap<String, String> =
            task.to_fields().expect("encode should work").into_iter().collect();
        let decoded = Task::from_fields(&fields).expect("decode should work");

        assert_eq!(decoded.id, task.id);
        assert_eq!(decoded.task_type, task.task_type);
        assert_eq!(decoded.payload, task.payload);
        assert_eq!(decoded.priority, 9);
        assert_eq!(decoded.status, TaskStatus::Processing);
        assert_eq!(decoded.retry_count, 2);
        assert_eq!(decoded.timeout_seconds, 120);
        assert_eq!(decoded.worker_id.as_deref(), Some("worker-1"));
        assert!(decoded.completed_at.is_none());
        assert!(decoded.result.is_none());
    }

    #[test]
    fn test_codec_rejects_missing_and_invalid_fields() {
        let empty = HashMap::new();
        assert!(matches!(
            Task::from_fields(&empty),
            Err(TaskCodecError::MissingField("id"))
        ));

        let task = Task::new("a", json!(null), &EnqueueOptions::new());
        let mut fields: HashMap<String, String> =
            task.to_fields().expect("encode should work").into_iter().collect();
        fields.insert("priority".to_string(), "not-a-number".to_string());

        assert!(matches!(
            Task::from_fields(&fields),
            Err(TaskCodecError::InvalidField { field: "priority", .. })
        ));
    }
}
