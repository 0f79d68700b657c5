//! Core data model.
//!
//! A task record is a unit of pending work ordered by priority. Once a worker
//! claims it, it becomes a worker assignment carrying a free-form status label
//! until the worker reports completion or asks for reassignment.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Field limits
// ---------------------------------------------------------------------------

/// Byte limits for every bounded text field.
pub const TASK_ID_MAX: usize = 31;
pub const TIMESTAMP_MAX: usize = 31;
pub const WORKER_ID_MAX: usize = 31;
pub const ORIGIN_MAX: usize = 63;
pub const STATUS_MAX: usize = 15;

/// Status given to every fresh assignment.
pub const IN_PROGRESS: &str = "in_progress";

/// What to do with a text field longer than its limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPolicy {
    /// Cut the value at the last char boundary within the limit.
    #[default]
    Truncate,
    /// Refuse the value with [`Error::FieldTooLong`].
    Reject,
}

impl std::str::FromStr for FieldPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(FieldPolicy::Truncate),
            "reject" => Ok(FieldPolicy::Reject),
            other => Err(Error::Config(format!("unknown field policy: {other}"))),
        }
    }
}

impl FieldPolicy {
    /// Fit `value` into `max` bytes according to this policy.
    pub fn apply(self, field: &'static str, max: usize, value: &str) -> Result<String> {
        if value.len() <= max {
            return Ok(value.to_string());
        }
        match self {
            FieldPolicy::Reject => Err(Error::FieldTooLong {
                field,
                max,
                len: value.len(),
            }),
            FieldPolicy::Truncate => Ok(truncate_to_boundary(value, max).to_string()),
        }
    }
}

fn truncate_to_boundary(value: &str, max: usize) -> &str {
    let mut end = max.min(value.len());
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// A pending unit of work. Larger `priority` is more urgent.
///
/// Ids are expected to be unique across pending and in-flight tasks, but
/// nothing here enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub enqueued_at: String,
    pub priority: i32,
    pub execution_time: i32,
    pub origin: String,
}

impl TaskRecord {
    /// Copy of this task with priority raised by one step.
    pub fn escalated(&self) -> Self {
        Self {
            priority: self.priority.saturating_add(1),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Worker assignment
// ---------------------------------------------------------------------------

/// A task currently claimed by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    #[serde(flatten)]
    pub task: TaskRecord,
    pub worker_id: String,
    pub status: String,
}

impl WorkerAssignment {
    pub fn new(task: TaskRecord, worker_id: impl Into<String>) -> Self {
        Self {
            task,
            worker_id: worker_id.into(),
            status: IN_PROGRESS.to_string(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }
}

// ---------------------------------------------------------------------------
// Status reports
// ---------------------------------------------------------------------------

/// A worker's status report, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Work is done; the claim is dropped.
    Completed,
    /// Give the task back to the heap with escalated priority.
    Reassign,
    /// Any other in-progress label, stored as-is.
    Label(String),
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self {
        match s {
            "completed" => TaskStatus::Completed,
            "reassign" => TaskStatus::Reassign,
            other => TaskStatus::Label(other.to_string()),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Reassign => write!(f, "reassign"),
            TaskStatus::Label(label) => write!(f, "{label}"),
        }
    }
}

/// What a status report did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The assignment was dropped for good.
    Completed(WorkerAssignment),
    /// The assignment was dropped and this task went back into the heap.
    Requeued(TaskRecord),
    /// The assignment's status label was overwritten in place.
    Relabeled {
        task_id: String,
        previous: String,
        current: String,
    },
}

impl StatusOutcome {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StatusOutcome::Completed(_) => "completed",
            StatusOutcome::Requeued(_) => "requeued",
            StatusOutcome::Relabeled { .. } => "relabeled",
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for submitting a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub(crate) id: Option<String>,
    pub(crate) enqueued_at: Option<String>,
    pub(crate) priority: i32,
    pub(crate) execution_time: i32,
    pub(crate) origin: String,
}

impl NewTask {
    /// Task with a caller-chosen id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Task whose id is generated on submission.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn execution_time(mut self, execution_time: i32) -> Self {
        self.execution_time = execution_time;
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn enqueued_at(mut self, timestamp: impl Into<String>) -> Self {
        self.enqueued_at = Some(timestamp.into());
        self
    }

    /// Validate and bound every field, producing the record that gets stored.
    pub fn into_record(self, policy: FieldPolicy) -> Result<TaskRecord> {
        let id = match self.id {
            Some(id) => id,
            None => generate_task_id(),
        };
        if id.is_empty() {
            return Err(Error::InvalidTask("task id must not be empty".to_string()));
        }
        let enqueued_at = self
            .enqueued_at
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

        Ok(TaskRecord {
            id: policy.apply("id", TASK_ID_MAX, &id)?,
            enqueued_at: policy.apply("enqueued_at", TIMESTAMP_MAX, &enqueued_at)?,
            priority: self.priority,
            execution_time: self.execution_time,
            origin: policy.apply("origin", ORIGIN_MAX, &self.origin)?,
        })
    }
}

fn generate_task_id() -> String {
    // First 8 hex chars of a v4 uuid are plenty for an in-memory queue.
    format!("task-{}", &Uuid::new_v4().simple().to_string()[..8])
}
