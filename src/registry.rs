//! Bounded, unordered list of tasks currently claimed by workers.
//!
//! Removal swaps the last entry into the vacated slot, so iteration order is
//! not stable across deletions.

use tracing::debug;

use crate::error::{Error, Result, Structure};
use crate::model::{
    FieldPolicy, STATUS_MAX, StatusOutcome, TaskRecord, TaskStatus, WorkerAssignment,
};
use crate::storage::Recover;

/// Fixed-capacity assignment list.
#[derive(Debug, Clone)]
pub struct AssignmentRegistry {
    entries: Vec<WorkerAssignment>,
    capacity: usize,
}

impl AssignmentRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Record that `worker_id` claimed `task`, with status `in_progress`.
    pub fn add(&mut self, task: TaskRecord, worker_id: &str) -> Result<&WorkerAssignment> {
        if self.is_full() {
            return Err(Error::CapacityExceeded {
                structure: Structure::Registry,
                capacity: self.capacity,
            });
        }
        debug!(task_id = %task.id, worker_id, "registry add");
        self.entries.push(WorkerAssignment::new(task, worker_id));
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// First assignment for this task id.
    pub fn find_by_task_id(&self, id: &str) -> Option<&WorkerAssignment> {
        self.entries.iter().find(|a| a.task.id == id)
    }

    /// Every assignment held by one worker.
    pub fn by_worker<'a>(&'a self, worker_id: &'a str) -> impl Iterator<Item = &'a WorkerAssignment> {
        self.entries.iter().filter(move |a| a.worker_id == worker_id)
    }

    /// Drop the first assignment for this task id.
    pub fn remove_by_task_id(&mut self, id: &str) -> Result<WorkerAssignment> {
        let index = self
            .entries
            .iter()
            .position(|a| a.task.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let removed = self.entries.swap_remove(index);
        debug!(task_id = %id, worker_id = %removed.worker_id, "registry remove");
        Ok(removed)
    }

    /// Apply a worker's status report to the matching assignment.
    ///
    /// `Completed` and `Reassign` both drop the assignment. For `Reassign` the
    /// returned [`StatusOutcome::Requeued`] carries the task with escalated
    /// priority; putting it back into a heap is the caller's job. Any other
    /// label is bounded by `policy` and written in place.
    pub fn update_status(
        &mut self,
        id: &str,
        status: TaskStatus,
        policy: FieldPolicy,
    ) -> Result<StatusOutcome> {
        match status {
            TaskStatus::Completed => self.remove_by_task_id(id).map(StatusOutcome::Completed),
            TaskStatus::Reassign => {
                let removed = self.remove_by_task_id(id)?;
                Ok(StatusOutcome::Requeued(removed.task.escalated()))
            }
            TaskStatus::Label(label) => {
                let entry = self
                    .entries
                    .iter_mut()
                    .find(|a| a.task.id == id)
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                let current = policy.apply("status", STATUS_MAX, &label)?;
                let previous = std::mem::replace(&mut entry.status, current.clone());
                debug!(task_id = %id, %previous, %current, "registry relabel");
                Ok(StatusOutcome::Relabeled {
                    task_id: id.to_string(),
                    previous,
                    current,
                })
            }
        }
    }

    pub fn as_slice(&self) -> &[WorkerAssignment] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerAssignment> {
        self.entries.iter()
    }
}

impl Recover for AssignmentRegistry {
    fn recover(&mut self) {
        // Pushes are the only growth path and check capacity first, so this is
        // the one thing a dead holder could have left inconsistent.
        self.entries.truncate(self.capacity);
    }
}
