//! Bounded binary max-heap of pending tasks.
//!
//! Array-backed: the parent of slot `i` is `(i - 1) / 2`, its children are
//! `2i + 1` and `2i + 2`. For every non-root slot the parent's priority is
//! greater than or equal to the child's. Equal priorities have no defined
//! order; there is no arrival-time tiebreak, so under churn equal-priority
//! tasks can be overtaken indefinitely.

use tracing::debug;

use crate::error::{Error, Result, Structure};
use crate::model::TaskRecord;
use crate::storage::Recover;

/// Fixed-capacity priority heap.
#[derive(Debug, Clone)]
pub struct PriorityHeap {
    data: Vec<TaskRecord>,
    capacity: usize,
}

impl PriorityHeap {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Insert a task. A full heap refuses it and stays unchanged.
    pub fn push(&mut self, record: TaskRecord) -> Result<()> {
        if self.is_full() {
            return Err(Error::CapacityExceeded {
                structure: Structure::Heap,
                capacity: self.capacity,
            });
        }
        debug!(task_id = %record.id, priority = record.priority, "heap push");
        self.data.push(record);
        self.sift_up(self.data.len() - 1);
        Ok(())
    }

    /// Remove and return the highest-priority task.
    pub fn pop(&mut self) -> Result<TaskRecord> {
        if self.data.is_empty() {
            return Err(Error::EmptyHeap);
        }
        let root = self.data.swap_remove(0);
        if !self.data.is_empty() {
            self.sift_down(0);
        }
        debug!(task_id = %root.id, priority = root.priority, "heap pop");
        Ok(root)
    }

    /// Highest-priority task without removing it.
    pub fn peek(&self) -> Option<&TaskRecord> {
        self.data.first()
    }

    /// Slot of the first task with this id, scanning in array order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.data.iter().position(|t| t.id == id)
    }

    /// Remove the first task with this id from anywhere in the heap.
    pub fn remove_by_id(&mut self, id: &str) -> Result<TaskRecord> {
        let index = self
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let removed = self.data.swap_remove(index);
        // The former last element now sits at `index` and may be out of place
        // relative to its new parent or its new children.
        if index < self.data.len() {
            self.sift_down(index);
            self.sift_up(index);
        }
        debug!(task_id = %removed.id, index, "heap remove");
        Ok(removed)
    }

    /// Contents in array order (not sorted).
    pub fn as_slice(&self) -> &[TaskRecord] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.data.iter()
    }

    /// Check the ordering invariant over the whole array.
    pub fn is_valid(&self) -> bool {
        (1..self.data.len()).all(|i| self.data[parent(i)].priority >= self.data[i].priority)
    }

    /// Re-establish the ordering invariant from scratch.
    pub fn rebuild(&mut self) {
        for i in (0..self.data.len() / 2).rev() {
            self.sift_down(i);
        }
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let up = parent(index);
            if self.data[up].priority >= self.data[index].priority {
                break;
            }
            self.data.swap(up, index);
            index = up;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.data.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut largest = index;

            if left < len && self.data[left].priority > self.data[largest].priority {
                largest = left;
            }
            if right < len && self.data[right].priority > self.data[largest].priority {
                largest = right;
            }
            if largest == index {
                return;
            }
            self.data.swap(index, largest);
            index = largest;
        }
    }
}

impl Recover for PriorityHeap {
    fn recover(&mut self) {
        self.data.truncate(self.capacity);
        if !self.is_valid() {
            self.rebuild();
        }
    }
}

fn parent(index: usize) -> usize {
    (index - 1) / 2
}
