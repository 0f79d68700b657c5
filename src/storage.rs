//! Backing storage: fixed blocks of state, each behind its own lock,
//! addressed by a stable numeric key.
//!
//! Attaching is destructive-idempotent. `attach_fresh` drops whatever block
//! was registered under the key and installs an empty one; callers that
//! already hold the old block keep using it, but nobody new can join it.
//! Two independent launches against the same key therefore wipe each other.
//!
//! Locks block without timeout. A holder that panics poisons the lock; the
//! next caller repairs the state through [`Recover`] and carries on instead
//! of wedging every other user of the block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::heap::PriorityHeap;
use crate::registry::AssignmentRegistry;

/// Default key of the heap block.
pub const DEFAULT_HEAP_KEY: SegmentKey = SegmentKey(12345);
/// Default key of the registry block.
pub const DEFAULT_REGISTRY_KEY: SegmentKey = SegmentKey(12346);

/// State that can put itself back into a consistent shape after a lock holder
/// died mid-mutation.
pub trait Recover {
    fn recover(&mut self);
}

/// Stable identifier of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentKey(pub u32);

impl std::fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// One block: a key, a lock, and the state it guards.
#[derive(Debug)]
pub struct Segment<T> {
    key: SegmentKey,
    state: Mutex<T>,
}

impl<T: Recover> Segment<T> {
    pub fn new(key: SegmentKey, state: T) -> Self {
        Self {
            key,
            state: Mutex::new(state),
        }
    }

    pub fn key(&self) -> SegmentKey {
        self.key
    }

    /// Take the block's lock, blocking until it is free.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(key = %self.key, "previous lock holder panicked, recovering block");
                let mut guard = poisoned.into_inner();
                guard.recover();
                self.state.clear_poison();
                guard
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Segment table
// ---------------------------------------------------------------------------

/// Registry of blocks of one kind, keyed by [`SegmentKey`].
#[derive(Debug)]
pub struct SegmentTable<T> {
    blocks: Mutex<HashMap<SegmentKey, Arc<Segment<T>>>>,
}

impl<T: Recover> Default for SegmentTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Recover> SegmentTable<T> {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Destroy any block under `key` and register a fresh one holding `state`.
    pub fn attach_fresh(&self, key: SegmentKey, state: T) -> Arc<Segment<T>> {
        let segment = Arc::new(Segment::new(key, state));
        let previous = self.blocks().insert(key, Arc::clone(&segment));
        if previous.is_some() {
            debug!(%key, "replaced existing block");
        } else {
            debug!(%key, "created block");
        }
        segment
    }

    /// Join the block already registered under `key`.
    pub fn attach_existing(&self, key: SegmentKey) -> Result<Arc<Segment<T>>> {
        self.blocks()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("block {key}")))
    }

    /// Destroy the block under `key`. Returns false if there was none.
    pub fn detach(&self, key: SegmentKey) -> bool {
        self.blocks().remove(&key).is_some()
    }

    pub fn contains(&self, key: SegmentKey) -> bool {
        self.blocks().contains_key(&key)
    }

    fn blocks(&self) -> MutexGuard<'_, HashMap<SegmentKey, Arc<Segment<T>>>> {
        // Map operations cannot panic halfway, so a poisoned table is still sound.
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Process-wide tables
// ---------------------------------------------------------------------------

/// The heap and registry block tables.
#[derive(Debug, Default)]
pub struct Segments {
    pub heaps: SegmentTable<PriorityHeap>,
    pub registries: SegmentTable<AssignmentRegistry>,
}

impl Segments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables shared by everything in this process.
    pub fn global() -> &'static Segments {
        static GLOBAL: OnceLock<Segments> = OnceLock::new();
        GLOBAL.get_or_init(Segments::new)
    }

    /// Fresh heap block under `key`.
    pub fn attach_heap(&self, key: SegmentKey, capacity: usize) -> Arc<Segment<PriorityHeap>> {
        self.heaps.attach_fresh(key, PriorityHeap::new(capacity))
    }

    /// Fresh registry block under `key`.
    pub fn attach_registry(
        &self,
        key: SegmentKey,
        capacity: usize,
    ) -> Arc<Segment<AssignmentRegistry>> {
        self.registries
            .attach_fresh(key, AssignmentRegistry::new(capacity))
    }
}
