//! dispatch CLI: drives the dispatch core in-process.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use clap::{Parser, Subcommand};
use prio_dispatch::config::Config;
use prio_dispatch::model::{NewTask, StatusOutcome, TaskRecord, WorkerAssignment};
use prio_dispatch::storage::Segments;
use prio_dispatch::telemetry::{TelemetryConfig, init_telemetry};
use prio_dispatch::{Dispatcher, Error};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dispatch", about = "Priority dispatch core")]
struct Cli {
    /// TOML config file (environment variables are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print listings as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue two tasks, assign both, complete one, reassign the other
    Demo,
    /// Run concurrent workers against one dispatcher until every task completes
    Simulate {
        /// Number of worker threads
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Number of tasks to enqueue
        #[arg(long, default_value_t = 100)]
        tasks: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::from_toml_file(path)?,
        None => Config::from_env()?,
    };

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "dispatch".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let dispatcher = Dispatcher::attach(Segments::global(), &config);

    match cli.command {
        Command::Demo => cmd_demo(&dispatcher, cli.json),
        Command::Simulate { workers, tasks } => {
            cmd_simulate(dispatcher, workers, tasks, cli.json).await
        }
    }
}

fn cmd_demo(dispatcher: &Dispatcher, json: bool) -> anyhow::Result<()> {
    dispatcher.enqueue(
        NewTask::new("task1")
            .enqueued_at("2024-05-16T12:00:00Z")
            .priority(1)
            .execution_time(100)
            .origin("192.168.1.1"),
    )?;
    dispatcher.enqueue(
        NewTask::new("task2")
            .enqueued_at("2024-05-16T12:05:00Z")
            .priority(2)
            .execution_time(200)
            .origin("192.168.1.2"),
    )?;

    for worker in ["worker1", "worker2"] {
        match dispatcher.assign_next(worker)? {
            Some(a) => println!("Assigned {} to {}", a.task.id, a.worker_id),
            None => println!("Nothing to assign to {worker}"),
        }
    }

    for (task_id, status) in [("task1", "completed"), ("task2", "reassign")] {
        match dispatcher.report_status(task_id, status)? {
            StatusOutcome::Completed(a) => println!("{} completed by {}", a.task.id, a.worker_id),
            StatusOutcome::Requeued(t) => {
                println!("{} requeued with priority {}", t.id, t.priority)
            }
            StatusOutcome::Relabeled { task_id, current, .. } => {
                println!("{task_id} is now {current}")
            }
        }
    }

    let snapshot = dispatcher.snapshot()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    print_assignments(&snapshot.assignments);
    println!();
    print_pending(&snapshot.pending);
    Ok(())
}

async fn cmd_simulate(
    dispatcher: Dispatcher,
    workers: usize,
    tasks: usize,
    json: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(workers > 0, "need at least one worker");

    let started = Instant::now();
    let producing = Arc::new(AtomicBool::new(true));
    let completed = Arc::new(AtomicUsize::new(0));
    let reassigned = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(workers + 1);

    let producer = {
        let dispatcher = dispatcher.clone();
        let producing = Arc::clone(&producing);
        tokio::task::spawn_blocking(move || {
            for i in 0..tasks {
                let new = NewTask::new(format!("sim-{i}"))
                    .priority((i % 10) as i32)
                    .execution_time((i % 7) as i32)
                    .origin("127.0.0.1");
                // A full heap is drained by the workers; keep offering.
                loop {
                    match dispatcher.enqueue(new.clone()) {
                        Ok(_) => break,
                        Err(Error::CapacityExceeded { .. }) => std::thread::yield_now(),
                        Err(e) => {
                            warn!(error = %e, "producer stopped");
                            producing.store(false, Ordering::Release);
                            return;
                        }
                    }
                }
            }
            producing.store(false, Ordering::Release);
        })
    };
    handles.push(producer);

    for w in 0..workers {
        let dispatcher = dispatcher.clone();
        let producing = Arc::clone(&producing);
        let completed = Arc::clone(&completed);
        let reassigned = Arc::clone(&reassigned);
        handles.push(tokio::task::spawn_blocking(move || {
            let worker_id = format!("worker-{w}");
            // Each worker gives up on a task once before finishing it.
            let mut bounced: HashSet<String> = HashSet::new();
            loop {
                let assignment = match dispatcher.assign_next(&worker_id) {
                    Ok(Some(a)) => a,
                    Ok(None) => {
                        let idle = dispatcher
                            .stats()
                            .map(|s| s.pending == 0 && s.assigned == 0)
                            .unwrap_or(true);
                        if !producing.load(Ordering::Acquire) && idle {
                            return;
                        }
                        std::thread::yield_now();
                        continue;
                    }
                    Err(Error::CapacityExceeded { .. }) => {
                        std::thread::yield_now();
                        continue;
                    }
                    Err(e) => {
                        warn!(%worker_id, error = %e, "worker stopped");
                        return;
                    }
                };

                let id = assignment.task.id.clone();
                let _ = dispatcher.report_status(&id, "running");
                let status = if assignment.task.priority % 4 == 3 && bounced.insert(id.clone()) {
                    "reassign"
                } else {
                    "completed"
                };
                match dispatcher.report_status(&id, status) {
                    Ok(StatusOutcome::Completed(_)) => {
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(StatusOutcome::Requeued(_)) => {
                        reassigned.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(StatusOutcome::Relabeled { .. }) => {}
                    Err(e) => {
                        // Heap full on reassign: finish it here instead.
                        warn!(%worker_id, task_id = %id, error = %e, "completing instead");
                        if dispatcher.report_status(&id, "completed").is_ok() {
                            completed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.await?;
    }

    let stats = dispatcher.stats()?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        workers,
        tasks,
        completed = completed.load(Ordering::Relaxed),
        reassigned = reassigned.load(Ordering::Relaxed),
        elapsed_ms,
        "simulation finished"
    );

    if json {
        let summary = serde_json::json!({
            "workers": workers,
            "tasks": tasks,
            "completed": completed.load(Ordering::Relaxed),
            "reassigned": reassigned.load(Ordering::Relaxed),
            "elapsed_ms": elapsed_ms,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("workers={workers} tasks={tasks}");
        println!("completed={}", completed.load(Ordering::Relaxed));
        println!("reassigned={}", reassigned.load(Ordering::Relaxed));
        println!("pending={} assigned={}", stats.pending, stats.assigned);
        println!("elapsed_ms={elapsed_ms}");
    }
    Ok(())
}

fn print_assignments(assignments: &[WorkerAssignment]) {
    if assignments.is_empty() {
        println!("No tasks are currently assigned to workers.");
        return;
    }
    println!(
        "{:<16}  {:<12}  {:<4}  {:<6}  {:<16}  STATUS",
        "TASK", "WORKER", "PRI", "EXEC", "ORIGIN"
    );
    println!("{}", "-".repeat(80));
    for a in assignments {
        println!(
            "{:<16}  {:<12}  {:<4}  {:<6}  {:<16}  {}",
            a.task.id, a.worker_id, a.task.priority, a.task.execution_time, a.task.origin, a.status
        );
    }
}

fn print_pending(pending: &[TaskRecord]) {
    if pending.is_empty() {
        println!("Heap is empty.");
        return;
    }
    println!(
        "{:<16}  {:<4}  {:<22}  {:<6}  ORIGIN",
        "TASK", "PRI", "ENQUEUED", "EXEC"
    );
    println!("{}", "-".repeat(80));
    for t in pending {
        println!(
            "{:<16}  {:<4}  {:<22}  {:<6}  {}",
            t.id, t.priority, t.enqueued_at, t.execution_time, t.origin
        );
    }
}
