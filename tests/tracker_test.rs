//! Run scope end-to-end: the dispatcher is drained before the run is
//! finalized on normal return, on error, and on panic.

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use common::GatedBackend;
use trueno_tracker::backend::TrackingBackend;
use trueno_tracker::dispatch::{Isolation, LogCall, WorkerCommand};
use trueno_tracker::experiment::RunStatus;
use trueno_tracker::{Error, ExperimentTracker, RunOptions, TrackerConfig};

fn slow_tracker() -> (Arc<GatedBackend>, ExperimentTracker) {
    let backend = GatedBackend::with_delay(Duration::from_millis(100));
    let config = TrackerConfig::builder().experiment_name("scoped").build();
    let tracker = ExperimentTracker::with_backend(backend.clone(), &config).unwrap();
    (backend, tracker)
}

#[test]
fn test_scope_drains_on_success() {
    let (backend, tracker) = slow_tracker();
    let run_id = tracker
        .run(RunOptions::named("ok"), |run| {
            for step in 0..3 {
                run.submit("loss", LogCall::metric("loss", 0.1, step), Isolation::Thread)?;
            }
            Ok::<_, Error>(run.run_id().to_string())
        })
        .unwrap();

    let stored = backend.get_run(&run_id).unwrap().unwrap();
    assert_eq!(stored.status(), RunStatus::Success);
    assert!(stored.ended_at().is_some());
    assert_eq!(backend.get_metric_history(&run_id, "loss").unwrap().len(), 3);
}

#[test]
fn test_scope_drains_on_error() {
    let (backend, tracker) = slow_tracker();
    let mut run_id = String::new();
    let result: Result<(), Error> = tracker.run(RunOptions::named("err"), |run| {
        run_id = run.run_id().to_string();
        run.submit("loss", LogCall::metric("loss", 0.5, 0), Isolation::Thread)?;
        Err(Error::Storage("training diverged".to_string()))
    });

    assert!(matches!(result, Err(Error::Storage(msg)) if msg == "training diverged"));
    let stored = backend.get_run(&run_id).unwrap().unwrap();
    assert_eq!(stored.status(), RunStatus::Failed);
    assert_eq!(backend.get_metric_history(&run_id, "loss").unwrap().len(), 1);
}

#[test]
fn test_scope_drains_on_panic() {
    let (backend, tracker) = slow_tracker();
    let mut run_id = String::new();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        tracker.run(RunOptions::named("boom"), |run| -> Result<(), Error> {
            run_id = run.run_id().to_string();
            run.submit("loss", LogCall::metric("loss", 0.5, 0), Isolation::Thread)?;
            panic!("model exploded");
        })
    }));

    assert!(outcome.is_err());
    let stored = backend.get_run(&run_id).unwrap().unwrap();
    assert_eq!(stored.status(), RunStatus::Failed);
    assert_eq!(backend.get_metric_history(&run_id, "loss").unwrap().len(), 1);
}

#[test]
fn test_finish_reports_task_failures_without_failing_run() {
    let (_, tracker) = slow_tracker();
    let mut run = tracker.start_run(RunOptions::named("partial")).unwrap();
    run.submit("upload", LogCall::artifact("/no/such/artifact"), Isolation::Thread)
        .unwrap();
    run.submit("loss", LogCall::metric("loss", 0.2, 0), Isolation::Thread)
        .unwrap();

    let summary = run.finish(RunStatus::Success).unwrap();
    assert_eq!(summary.record().status(), RunStatus::Success);
    assert_eq!(summary.tasks().completed(), 1);
    assert_eq!(summary.tasks().failures()[0].name(), "upload");
}

#[test]
fn test_nested_run_records_parent() {
    let (backend, tracker) = slow_tracker();
    let parent = tracker.start_run(RunOptions::named("parent")).unwrap();
    let child = tracker
        .start_run(
            RunOptions::named("child")
                .nested_in(parent.run_id())
                .description("sweep member")
                .tag("lr", "0.1"),
        )
        .unwrap();

    let child_id = child.run_id().to_string();
    let parent_id = parent.run_id().to_string();
    drop(child);
    drop(parent);

    let stored = backend.get_run(&child_id).unwrap().unwrap();
    assert_eq!(stored.parent_run_id(), Some(parent_id.as_str()));
    assert_eq!(stored.description(), Some("sweep member"));
    assert_eq!(stored.tags()["lr"], "0.1");
}

#[test]
fn test_file_store_with_process_worker() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("weights.bin");
    std::fs::write(&local, vec![7u8; 1 << 20]).unwrap();

    let tracker = TrackerConfig::builder()
        .experiment_name("Cool Experiment")
        .tracking_uri(dir.path().join("mlruns").to_string_lossy())
        .worker(WorkerCommand::new(env!("CARGO_BIN_EXE_trueno-tracker")).arg("worker"))
        .open()
        .unwrap();

    let summary = tracker
        .start_run(RunOptions::named("BackgroundLogger"))
        .and_then(|mut run| {
            run.submit("weights", LogCall::artifact(&local), Isolation::Process)?;
            run.submit("loss", LogCall::metric("loss", 0.3, 0), Isolation::Thread)?;
            run.finish(RunStatus::Success)
        })
        .unwrap();

    assert!(summary.tasks().is_clean(), "{:?}", summary.tasks().failures());
    let run_id = summary.record().run_id();
    let artifacts = tracker.backend().list_artifacts(run_id).unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].path(), "weights.bin");
    assert_eq!(artifacts[0].size_bytes(), 1 << 20);

    // A second tracker on the same directory sees the same experiment and run
    let reopened = TrackerConfig::builder()
        .experiment_name("Cool Experiment")
        .tracking_uri(dir.path().join("mlruns").to_string_lossy())
        .create_new(false)
        .open()
        .unwrap();
    assert_eq!(reopened.id(), tracker.id());
    assert_eq!(reopened.runs().unwrap().len(), 1);
}

#[test]
fn test_memory_store_rejects_process_isolation() {
    let tracker = TrackerConfig::builder()
        .experiment_name("mem")
        .tracking_uri("memory://scope")
        .open()
        .unwrap();
    let mut run = tracker.start_run(RunOptions::new()).unwrap();
    let err = run
        .submit("x", LogCall::metric("x", 1.0, 0), Isolation::Process)
        .unwrap_err();
    assert!(matches!(err, Error::ProcessIsolationUnsupported { .. }));
    assert!(run.pending_tasks().is_empty());
}
