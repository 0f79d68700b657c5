//! Error types for prio-dispatch.

use thiserror::Error;

/// Which bounded structure rejected an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    Heap,
    Registry,
}

impl std::fmt::Display for Structure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Structure::Heap => write!(f, "heap"),
            Structure::Registry => write!(f, "registry"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{structure} is full (capacity {capacity})")]
    CapacityExceeded { structure: Structure, capacity: usize },

    #[error("no pending task")]
    EmptyHeap,

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("field {field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },

    #[error("lock order violation: {requested} requested while {held} is held")]
    LockOrder {
        held: &'static str,
        requested: &'static str,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the capacity rejection of the given structure.
    pub fn is_full(&self, which: Structure) -> bool {
        matches!(self, Error::CapacityExceeded { structure, .. } if *structure == which)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
