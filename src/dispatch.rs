//! Dispatch coordinator: moves tasks between the heap and the registry.
//!
//! Lock order is registry before heap, and it is enforced rather than
//! assumed. Every acquisition goes through [`acquire`], which tracks the
//! highest-ranked lock this thread holds and refuses to take a lock of equal
//! or lower rank. Taking the heap and then the registry returns
//! [`Error::LockOrder`] instead of risking a deadlock.
//!
//! `assign_next` holds one lock at a time, so between popping from the heap
//! and adding to the registry the task is briefly in neither structure.
//! The reassign path holds the registry lock while it takes the heap lock.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, MutexGuard};

use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result, Structure};
use crate::heap::PriorityHeap;
use crate::model::{
    FieldPolicy, NewTask, StatusOutcome, TaskRecord, TaskStatus, WORKER_ID_MAX, WorkerAssignment,
};
use crate::registry::AssignmentRegistry;
use crate::storage::{Recover, Segment, SegmentKey, Segments};
use crate::telemetry::dispatch::{record_outcome, record_transition, start_dispatch_span};
use crate::telemetry::metrics;

// ---------------------------------------------------------------------------
// Lock ordering
// ---------------------------------------------------------------------------

/// Position of a lock in the global acquisition order. Lower ranks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LockRank {
    Registry = 1,
    Heap = 2,
}

impl LockRank {
    fn name(self) -> &'static str {
        match self {
            LockRank::Registry => "registry",
            LockRank::Heap => "heap",
        }
    }
}

thread_local! {
    static HELD: Cell<Option<LockRank>> = const { Cell::new(None) };
}

/// A held block lock that remembers what this thread held before it.
#[derive(Debug)]
struct Ordered<'a, T> {
    guard: MutexGuard<'a, T>,
    previous: Option<LockRank>,
}

impl<T> Deref for Ordered<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for Ordered<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for Ordered<'_, T> {
    fn drop(&mut self) {
        HELD.with(|held| held.set(self.previous));
    }
}

fn acquire<T: Recover>(segment: &Segment<T>, rank: LockRank) -> Result<Ordered<'_, T>> {
    let previous = HELD.with(Cell::get);
    if let Some(held) = previous.filter(|held| *held >= rank) {
        return Err(Error::LockOrder {
            held: held.name(),
            requested: rank.name(),
        });
    }
    let guard = segment.lock();
    HELD.with(|h| h.set(Some(rank)));
    Ok(Ordered { guard, previous })
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Sizes and capacities of both structures, read under both locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub pending: usize,
    pub pending_capacity: usize,
    pub assigned: usize,
    pub assigned_capacity: usize,
}

/// Both structures' contents, read under both locks.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub pending: Vec<TaskRecord>,
    pub assignments: Vec<WorkerAssignment>,
}

/// Coordinates the heap and registry blocks. Cheap to clone; clones share
/// the same blocks.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    heap: Arc<Segment<PriorityHeap>>,
    registry: Arc<Segment<AssignmentRegistry>>,
    policy: FieldPolicy,
}

impl Dispatcher {
    pub fn new(
        heap: Arc<Segment<PriorityHeap>>,
        registry: Arc<Segment<AssignmentRegistry>>,
        policy: FieldPolicy,
    ) -> Self {
        Self {
            heap,
            registry,
            policy,
        }
    }

    /// Create fresh blocks under the configured keys, wiping whatever was
    /// registered there before.
    pub fn attach(segments: &Segments, config: &Config) -> Self {
        info!(
            heap_key = %config.heap_key,
            registry_key = %config.registry_key,
            heap_capacity = config.heap_capacity,
            registry_capacity = config.registry_capacity,
            "attaching fresh dispatch blocks"
        );
        Self::new(
            segments.attach_heap(config.heap_key, config.heap_capacity),
            segments.attach_registry(config.registry_key, config.registry_capacity),
            config.field_policy,
        )
    }

    /// Join blocks another component already attached.
    pub fn join(segments: &Segments, config: &Config) -> Result<Self> {
        Ok(Self::new(
            segments.heaps.attach_existing(config.heap_key)?,
            segments.registries.attach_existing(config.registry_key)?,
            config.field_policy,
        ))
    }

    /// Private blocks not registered in any table (for tests and tools).
    pub fn in_memory(heap_capacity: usize, registry_capacity: usize) -> Self {
        Self::new(
            Arc::new(Segment::new(SegmentKey(0), PriorityHeap::new(heap_capacity))),
            Arc::new(Segment::new(
                SegmentKey(1),
                AssignmentRegistry::new(registry_capacity),
            )),
            FieldPolicy::Truncate,
        )
    }

    pub fn with_policy(mut self, policy: FieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FieldPolicy {
        self.policy
    }

    fn lock_registry(&self) -> Result<Ordered<'_, AssignmentRegistry>> {
        acquire(&self.registry, LockRank::Registry)
    }

    fn lock_heap(&self) -> Result<Ordered<'_, PriorityHeap>> {
        acquire(&self.heap, LockRank::Heap)
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Validate a new task and push it into the heap.
    pub fn enqueue(&self, new: NewTask) -> Result<TaskRecord> {
        let record = new.into_record(self.policy)?;
        let span = start_dispatch_span("enqueue", &record.id);

        let pushed = self.lock_heap()?.push(record.clone());
        match pushed {
            Ok(()) => {
                metrics::tasks_enqueued().add(1, &[KeyValue::new("source", "enqueue")]);
                record_outcome(&span, "queued");
                info!(task_id = %record.id, priority = record.priority, "task enqueued");
                Ok(record)
            }
            Err(e) => {
                reject(&span, Structure::Heap, &record.id);
                Err(e)
            }
        }
    }

    /// Give the highest-priority pending task to `worker_id`.
    ///
    /// Returns `Ok(None)` when nothing is pending. If the registry is full the
    /// task goes back into the heap and the capacity error is returned.
    pub fn assign_next(&self, worker_id: &str) -> Result<Option<WorkerAssignment>> {
        let worker_id = self.policy.apply("worker_id", WORKER_ID_MAX, worker_id)?;

        let task = match self.lock_heap()?.pop() {
            Ok(task) => task,
            Err(Error::EmptyHeap) => {
                debug!(%worker_id, "nothing to assign");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let span = start_dispatch_span("assign", &task.id);
        let added = self
            .lock_registry()?
            .add(task.clone(), &worker_id)
            .map(WorkerAssignment::clone);

        match added {
            Ok(assignment) => {
                record_transition(&span, &task.id, "heap", "registry");
                record_outcome(&span, "assigned");
                metrics::tasks_assigned().add(1, &[]);
                info!(task_id = %task.id, %worker_id, priority = task.priority, "task assigned");
                Ok(Some(assignment))
            }
            Err(e) => {
                reject(&span, Structure::Registry, &task.id);
                self.restore(task);
                Err(e)
            }
        }
    }

    fn restore(&self, task: TaskRecord) {
        let restored = match self.lock_heap() {
            Ok(mut heap) => heap.push(task.clone()),
            Err(e) => Err(e),
        };
        match restored {
            Ok(()) => {
                metrics::tasks_enqueued().add(1, &[KeyValue::new("source", "restore")]);
                debug!(task_id = %task.id, "task returned to heap");
            }
            Err(e) => error!(task_id = %task.id, error = %e, "task lost: could not return it to heap"),
        }
    }

    /// Apply a worker's status report.
    ///
    /// `"completed"` drops the assignment. `"reassign"` drops it and pushes
    /// the task back with priority + 1; if the heap is full the assignment is
    /// left alone and the capacity error is returned. Anything else becomes
    /// the assignment's status label.
    pub fn report_status(&self, task_id: &str, status: &str) -> Result<StatusOutcome> {
        let span = start_dispatch_span("report_status", task_id);
        let status = TaskStatus::from(status);

        let result = self.apply_status(task_id, status);
        match &result {
            Ok(outcome) => {
                if let StatusOutcome::Requeued(task) = outcome {
                    record_transition(&span, task_id, "registry", "heap");
                    metrics::tasks_enqueued().add(1, &[KeyValue::new("source", "reassign")]);
                    info!(task_id, priority = task.priority, "task reassigned");
                } else {
                    info!(task_id, outcome = outcome.kind(), "status applied");
                }
                record_outcome(&span, outcome.kind());
                metrics::status_reports().add(1, &[KeyValue::new("outcome", outcome.kind())]);
            }
            Err(Error::NotFound(_)) => {
                record_outcome(&span, "not_found");
                metrics::status_reports().add(1, &[KeyValue::new("outcome", "not_found")]);
                warn!(task_id, "status report for unknown task");
            }
            Err(Error::CapacityExceeded { structure, .. }) => {
                reject(&span, *structure, task_id);
            }
            Err(e) => warn!(task_id, error = %e, "status report refused"),
        }
        result
    }

    fn apply_status(&self, task_id: &str, status: TaskStatus) -> Result<StatusOutcome> {
        let mut registry = self.lock_registry()?;
        if registry.find_by_task_id(task_id).is_none() {
            return Err(Error::NotFound(task_id.to_string()));
        }
        if status != TaskStatus::Reassign {
            return registry.update_status(task_id, status, self.policy);
        }

        // Registry is held; heap is the only lock allowed after it.
        let mut heap = self.lock_heap()?;
        if heap.is_full() {
            return Err(Error::CapacityExceeded {
                structure: Structure::Heap,
                capacity: heap.capacity(),
            });
        }
        let outcome = registry.update_status(task_id, status, self.policy)?;
        if let StatusOutcome::Requeued(task) = &outcome {
            heap.push(task.clone())?;
        }
        Ok(outcome)
    }

    /// Cancel a pending task without going through assignment.
    pub fn remove_direct(&self, task_id: &str) -> Result<TaskRecord> {
        let removed = self.lock_heap()?.remove_by_id(task_id);
        match &removed {
            Ok(task) => info!(task_id, priority = task.priority, "pending task removed"),
            Err(_) => warn!(task_id, "removal of unknown pending task"),
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Diagnostics (same exclusive locks as writers)
    // -----------------------------------------------------------------------

    /// Pending tasks in heap array order.
    pub fn pending(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.lock_heap()?.as_slice().to_vec())
    }

    /// Current assignments in registry order.
    pub fn assignments(&self) -> Result<Vec<WorkerAssignment>> {
        Ok(self.lock_registry()?.as_slice().to_vec())
    }

    pub fn find_assignment(&self, task_id: &str) -> Result<Option<WorkerAssignment>> {
        Ok(self.lock_registry()?.find_by_task_id(task_id).cloned())
    }

    /// Assignments held by one worker.
    pub fn assignments_for(&self, worker_id: &str) -> Result<Vec<WorkerAssignment>> {
        Ok(self.lock_registry()?.by_worker(worker_id).cloned().collect())
    }

    pub fn stats(&self) -> Result<DispatchStats> {
        let registry = self.lock_registry()?;
        let heap = self.lock_heap()?;
        Ok(DispatchStats {
            pending: heap.len(),
            pending_capacity: heap.capacity(),
            assigned: registry.len(),
            assigned_capacity: registry.capacity(),
        })
    }

    /// Consistent view of both structures at one instant.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let registry = self.lock_registry()?;
        let heap = self.lock_heap()?;
        Ok(Snapshot {
            pending: heap.as_slice().to_vec(),
            assignments: registry.as_slice().to_vec(),
        })
    }
}

fn reject(span: &tracing::Span, structure: Structure, task_id: &str) {
    record_outcome(span, "rejected");
    metrics::capacity_rejections().add(1, &[KeyValue::new("structure", structure.to_string())]);
    warn!(task_id, %structure, "capacity exceeded");
}
