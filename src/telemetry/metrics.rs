//! Metric instruments for the dispatch core.
//!
//! Built from the globally registered `MeterProvider`; when no OTLP endpoint
//! is configured the global provider is a no-op and recording is free.

use opentelemetry::metrics::{Counter, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("prio-dispatch")
}

/// Counter: tasks accepted into the heap.
/// Labels: `source` ("enqueue" | "reassign" | "restore").
pub fn tasks_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.tasks.enqueued")
        .with_description("Tasks pushed into the priority heap")
        .build()
}

/// Counter: tasks handed to a worker.
pub fn tasks_assigned() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.tasks.assigned")
        .with_description("Tasks moved from the heap into the assignment registry")
        .build()
}

/// Counter: worker status reports.
/// Labels: `outcome` ("completed" | "requeued" | "relabeled" | "not_found").
pub fn status_reports() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.status.reports")
        .with_description("Worker status reports applied")
        .build()
}

/// Counter: inserts refused because a structure was full.
/// Labels: `structure` ("heap" | "registry").
pub fn capacity_rejections() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.capacity.rejections")
        .with_description("Inserts refused by a full heap or registry")
        .build()
}
