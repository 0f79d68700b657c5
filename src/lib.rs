//! # prio-dispatch
//!
//! Memory-resident priority dispatch core.
//!
//! Pending tasks wait in a bounded max-heap ordered by priority. Workers
//! claim them through the [`dispatch::Dispatcher`], which moves each task into
//! a bounded assignment registry. Status reports either finish a task, hand
//! it back to the heap with escalated priority, or relabel it in place.
//! Each structure lives in its own lock-guarded block; when both are needed
//! the registry lock is always taken first.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod heap;
pub mod model;
pub mod registry;
pub mod storage;
pub mod telemetry;

pub use dispatch::{DispatchStats, Dispatcher, Snapshot};
pub use error::{Error, Result};
pub use model::{NewTask, StatusOutcome, TaskRecord, TaskStatus, WorkerAssignment};
