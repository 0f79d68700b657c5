//! Integration tests for the dispatch coordinator.

use prio_dispatch::config::Config;
use prio_dispatch::error::Structure;
use prio_dispatch::model::{FieldPolicy, IN_PROGRESS, NewTask, StatusOutcome, TaskRecord};
use prio_dispatch::storage::{SegmentKey, Segments};
use prio_dispatch::{Dispatcher, Error};

fn test_dispatcher() -> Dispatcher {
    Dispatcher::in_memory(16, 16)
}

fn task(id: &str, priority: i32) -> NewTask {
    NewTask::new(id)
        .enqueued_at("2024-05-16T12:00:00Z")
        .priority(priority)
        .execution_time(100)
        .origin("10.0.0.1")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn pops_highest_priority_first() {
    let d = test_dispatcher();
    d.enqueue(task("A", 1)).unwrap();
    d.enqueue(task("B", 5)).unwrap();
    d.enqueue(task("C", 3)).unwrap();

    let order: Vec<String> = (0..3)
        .map(|_| d.assign_next("W1").unwrap().unwrap().task.id)
        .collect();
    assert_eq!(order, ["B", "C", "A"]);
}

#[test]
fn assign_then_reassign_round_trip() {
    let d = test_dispatcher();
    d.enqueue(task("X", 2)).unwrap();

    let assignment = d.assign_next("W1").unwrap().expect("X should be assigned");
    assert_eq!(assignment.task.id, "X");
    assert_eq!(assignment.worker_id, "W1");
    assert_eq!(assignment.status, IN_PROGRESS);
    let stats = d.stats().unwrap();
    assert_eq!((stats.pending, stats.assigned), (0, 1));

    let outcome = d.report_status("X", "reassign").unwrap();
    assert!(matches!(outcome, StatusOutcome::Requeued(ref t) if t.priority == 3));
    let stats = d.stats().unwrap();
    assert_eq!((stats.pending, stats.assigned), (1, 0));

    let pending = d.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0],
        TaskRecord {
            id: "X".to_string(),
            enqueued_at: "2024-05-16T12:00:00Z".to_string(),
            priority: 3,
            execution_time: 100,
            origin: "10.0.0.1".to_string(),
        }
    );
}

#[test]
fn completion_does_not_requeue() {
    let d = test_dispatcher();
    d.enqueue(task("done", 4)).unwrap();
    d.assign_next("W1").unwrap();

    let outcome = d.report_status("done", "completed").unwrap();
    match outcome {
        StatusOutcome::Completed(a) => {
            assert_eq!(a.task.id, "done");
            assert_eq!(a.worker_id, "W1");
        }
        other => panic!("expected Completed, got {other:?}"),
    }
    let stats = d.stats().unwrap();
    assert_eq!((stats.pending, stats.assigned), (0, 0));
}

#[test]
fn free_form_status_is_stored_in_place() {
    let d = test_dispatcher();
    d.enqueue(task("t", 1)).unwrap();
    d.assign_next("W1").unwrap();

    d.report_status("t", "running").unwrap();
    d.report_status("t", "paused").unwrap();

    let a = d.find_assignment("t").unwrap().unwrap();
    assert_eq!(a.status, "paused");
    assert!(d.pending().unwrap().is_empty());
}

#[test]
fn canonical_driver_sequence() {
    let d = test_dispatcher();
    d.enqueue(task("task1", 1).origin("192.168.1.1")).unwrap();
    d.enqueue(task("task2", 2).origin("192.168.1.2")).unwrap();

    let first = d.assign_next("worker1").unwrap().unwrap();
    let second = d.assign_next("worker2").unwrap().unwrap();
    assert_eq!((first.task.id.as_str(), first.worker_id.as_str()), ("task2", "worker1"));
    assert_eq!((second.task.id.as_str(), second.worker_id.as_str()), ("task1", "worker2"));

    d.report_status("task1", "completed").unwrap();
    d.report_status("task2", "reassign").unwrap();

    let snapshot = d.snapshot().unwrap();
    assert!(snapshot.assignments.is_empty());
    assert_eq!(snapshot.pending.len(), 1);
    assert_eq!(snapshot.pending[0].id, "task2");
    assert_eq!(snapshot.pending[0].priority, 3);
}

// ---------------------------------------------------------------------------
// Empty, missing, and full
// ---------------------------------------------------------------------------

#[test]
fn assign_on_empty_heap_is_none() {
    let d = test_dispatcher();
    assert!(d.assign_next("W1").unwrap().is_none());
    assert_eq!(d.stats().unwrap().assigned, 0);
}

#[test]
fn status_for_unknown_task_is_not_found() {
    let d = test_dispatcher();
    d.enqueue(task("queued", 1)).unwrap();
    for status in ["completed", "reassign", "running"] {
        assert!(matches!(
            d.report_status("ghost", status),
            Err(Error::NotFound(_))
        ));
    }
    // A pending task is not an assignment either.
    assert!(matches!(
        d.report_status("queued", "completed"),
        Err(Error::NotFound(_))
    ));
    assert_eq!(d.stats().unwrap().pending, 1);
}

#[test]
fn heap_full_refuses_enqueue() {
    let d = Dispatcher::in_memory(2, 2);
    d.enqueue(task("a", 1)).unwrap();
    d.enqueue(task("b", 2)).unwrap();
    let err = d.enqueue(task("c", 9)).unwrap_err();
    assert!(err.is_full(Structure::Heap));
    assert_eq!(d.stats().unwrap().pending, 2);
    assert!(d.pending().unwrap().iter().all(|t| t.id != "c"));
}

#[test]
fn registry_full_puts_task_back() {
    let d = Dispatcher::in_memory(4, 1);
    d.enqueue(task("a", 5)).unwrap();
    d.enqueue(task("b", 1)).unwrap();
    d.assign_next("W1").unwrap().unwrap();

    let err = d.assign_next("W2").unwrap_err();
    assert!(err.is_full(Structure::Registry));

    let pending = d.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "b");
    assert_eq!(d.stats().unwrap().assigned, 1);
}

#[test]
fn reassign_into_full_heap_keeps_assignment() {
    let d = Dispatcher::in_memory(1, 2);
    d.enqueue(task("claimed", 1)).unwrap();
    d.assign_next("W1").unwrap();
    d.enqueue(task("filler", 1)).unwrap();

    let err = d.report_status("claimed", "reassign").unwrap_err();
    assert!(err.is_full(Structure::Heap));

    let a = d.find_assignment("claimed").unwrap().expect("assignment kept");
    assert_eq!(a.status, IN_PROGRESS);
    assert_eq!(d.stats().unwrap().pending, 1);
}

// ---------------------------------------------------------------------------
// Direct removal
// ---------------------------------------------------------------------------

#[test]
fn remove_direct_cancels_pending_task() {
    let d = test_dispatcher();
    for (id, p) in [("a", 4), ("b", 9), ("c", 1), ("d", 7), ("e", 3)] {
        d.enqueue(task(id, p)).unwrap();
    }
    let removed = d.remove_direct("d").unwrap();
    assert_eq!(removed.priority, 7);
    assert_eq!(d.stats().unwrap().pending, 4);

    let drained: Vec<i32> = std::iter::from_fn(|| d.assign_next("W").unwrap())
        .map(|a| a.task.priority)
        .collect();
    assert_eq!(drained, [9, 4, 3, 1]);
}

#[test]
fn remove_direct_ignores_assigned_tasks() {
    let d = test_dispatcher();
    d.enqueue(task("busy", 1)).unwrap();
    d.assign_next("W1").unwrap();
    assert!(matches!(d.remove_direct("busy"), Err(Error::NotFound(_))));
    assert!(d.find_assignment("busy").unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Field limits
// ---------------------------------------------------------------------------

#[test]
fn over_long_fields_are_truncated_by_default() {
    let d = test_dispatcher();
    let long_id = "i".repeat(40);
    let record = d
        .enqueue(task(&long_id, 1).origin("o".repeat(100)))
        .unwrap();
    assert_eq!(record.id.len(), 31);
    assert_eq!(record.origin.len(), 63);

    let a = d.assign_next(&"w".repeat(50)).unwrap().unwrap();
    assert_eq!(a.worker_id.len(), 31);

    d.report_status(&record.id, "a-very-long-progress-label").unwrap();
    assert_eq!(d.find_assignment(&record.id).unwrap().unwrap().status.len(), 15);
}

#[test]
fn reject_policy_refuses_over_long_fields() {
    let d = test_dispatcher().with_policy(FieldPolicy::Reject);
    let err = d.enqueue(task(&"i".repeat(32), 1)).unwrap_err();
    assert!(matches!(err, Error::FieldTooLong { field: "id", .. }));
    assert_eq!(d.stats().unwrap().pending, 0);

    d.enqueue(task("ok", 1)).unwrap();
    let err = d.assign_next(&"w".repeat(32)).unwrap_err();
    assert!(matches!(err, Error::FieldTooLong { field: "worker_id", .. }));
    // Worker id is checked before the heap is touched.
    assert_eq!(d.stats().unwrap().pending, 1);
}

#[test]
fn empty_task_id_is_refused() {
    let d = test_dispatcher();
    assert!(matches!(
        d.enqueue(NewTask::new("")),
        Err(Error::InvalidTask(_))
    ));
}

#[test]
fn assignments_for_worker() {
    let d = test_dispatcher();
    for i in 0..4 {
        d.enqueue(task(&format!("t{i}"), i)).unwrap();
    }
    d.assign_next("W1").unwrap();
    d.assign_next("W2").unwrap();
    d.assign_next("W1").unwrap();

    let mine = d.assignments_for("W1").unwrap();
    let ids: Vec<&str> = mine.iter().map(|a| a.task.id.as_str()).collect();
    assert_eq!(ids, ["t3", "t1"]);
    assert_eq!(d.assignments().unwrap().len(), 3);
}

// ---------------------------------------------------------------------------
// Block attachment
// ---------------------------------------------------------------------------

#[test]
fn attach_and_join_share_blocks() {
    let segments = Segments::new();
    let config = Config {
        heap_key: SegmentKey(501),
        registry_key: SegmentKey(502),
        heap_capacity: 4,
        registry_capacity: 4,
        ..Config::default()
    };

    let producer = Dispatcher::attach(&segments, &config);
    producer.enqueue(task("shared", 1)).unwrap();

    let worker = Dispatcher::join(&segments, &config).unwrap();
    let a = worker.assign_next("W1").unwrap().unwrap();
    assert_eq!(a.task.id, "shared");
    assert!(producer.find_assignment("shared").unwrap().is_some());
}

#[test]
fn reattach_wipes_existing_blocks() {
    let segments = Segments::new();
    let config = Config {
        heap_key: SegmentKey(601),
        registry_key: SegmentKey(602),
        ..Config::default()
    };

    let first = Dispatcher::attach(&segments, &config);
    first.enqueue(task("old", 1)).unwrap();

    let second = Dispatcher::attach(&segments, &config);
    assert!(second.pending().unwrap().is_empty());

    let joined = Dispatcher::join(&segments, &config).unwrap();
    assert!(joined.pending().unwrap().is_empty());
}

#[test]
fn join_without_attach_is_not_found() {
    let segments = Segments::new();
    let err = Dispatcher::join(&segments, &Config::default()).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
