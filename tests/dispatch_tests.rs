//! Dispatcher tests: drain/termination, dedup, resignation on out-of-memory, progress, reset.

use crossbeam_channel::unbounded;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tempfile::TempDir;
use tilepool::{
    DispatchOpts, Dispatcher, Job, JobKey, JobOutcome, JobStatus, LifecycleState, NoProgress,
    ProgressSink, TileCreator, TileError,
};

// --- helpers ---

#[derive(Default)]
struct RecordingSink {
    reports: Mutex<Vec<(usize, usize)>>,
}

impl RecordingSink {
    fn reports(&self) -> Vec<(usize, usize)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn report_progress(&self, total: usize, completed: usize) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push((total, completed));
        Ok(())
    }
}

fn opts(dir: &TempDir, threads: usize) -> DispatchOpts {
    DispatchOpts {
        output_dir: dir.path().join("out"),
        thread_count: Some(threads),
        total_expected: 0,
    }
}

/// Writes a stub descriptor and counts calls.
fn writing_creator(calls: Arc<AtomicUsize>) -> Arc<dyn TileCreator> {
    Arc::new(move |_src: &Path, dst: &Path| -> Result<(), TileError> {
        calls.fetch_add(1, Ordering::SeqCst);
        std::fs::write(dst, b"<Image TileSize=\"254\"/>")?;
        Ok(())
    })
}

/// Out of memory for key `x`, success otherwise.
fn oom_on_x(calls: Arc<AtomicUsize>) -> Arc<dyn TileCreator> {
    Arc::new(move |src: &Path, dst: &Path| -> Result<(), TileError> {
        calls.fetch_add(1, Ordering::SeqCst);
        if dst.file_stem().and_then(|s| s.to_str()) == Some("x") {
            return Err(TileError::exhausted(src, "simulated"));
        }
        std::fs::write(dst, b"<Image/>")?;
        Ok(())
    })
}

fn outcomes_for(outcomes: &[JobOutcome], key: &str) -> Vec<JobStatus> {
    outcomes
        .iter()
        .filter(|o| o.key.as_str() == key)
        .map(|o| o.status.clone())
        .collect()
}

fn expected_outputs(d: &Dispatcher, keys: &[&str]) -> BTreeSet<PathBuf> {
    keys.iter()
        .map(|k| d.output_dir().join(format!("{k}.dzi")))
        .collect()
}

// --- scenario A / P1: everything drains ---

#[test]
fn test_three_jobs_complete_with_three_progress_reports() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(RecordingSink::default());
    let d = Dispatcher::new(&opts(&dir, 2), writing_creator(calls.clone()), sink.clone()).unwrap();
    d.set_total_expected(3);

    d.start().unwrap();
    for k in ["a", "b", "c"] {
        assert!(d.submit(k, format!("/src/{k}.png")));
    }
    d.join().unwrap();

    assert_eq!(d.completed_outputs(), expected_outputs(&d, &["a", "b", "c"]));
    assert_eq!(d.completed_count(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let reports = sink.reports();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|(total, _)| *total == 3));
    assert_eq!(reports.iter().map(|r| r.1).max(), Some(3));
    for k in ["a", "b", "c"] {
        assert!(d.output_dir().join(format!("{k}.dzi")).is_file());
    }
}

#[test]
fn test_failures_still_count_toward_completion() {
    let dir = tempfile::tempdir().unwrap();
    let creator: Arc<dyn TileCreator> =
        Arc::new(|src: &Path, dst: &Path| -> Result<(), TileError> {
            let n: usize = dst.file_stem().unwrap().to_str().unwrap()[1..].parse().unwrap();
            if n % 2 == 1 {
                return Err(TileError::failed(src, "corrupt image"));
            }
            Ok(())
        });
    let d = Dispatcher::new(&opts(&dir, 4), creator, Arc::new(NoProgress)).unwrap();
    let outcomes = d.outcomes();
    d.start().unwrap();
    for i in 0..20 {
        d.submit(format!("k{i}"), format!("/src/{i}.png"));
    }
    d.join().unwrap();

    assert_eq!(d.completed_count(), 20);
    let all: Vec<JobOutcome> = outcomes.iter().collect();
    assert_eq!(all.len(), 20);
    let failed = all
        .iter()
        .filter(|o| matches!(o.status, JobStatus::Failed { .. }))
        .count();
    assert_eq!(failed, 10);
}

#[test]
fn test_creator_panic_is_an_ordinary_failure() {
    let dir = tempfile::tempdir().unwrap();
    let creator: Arc<dyn TileCreator> =
        Arc::new(|_src: &Path, dst: &Path| -> Result<(), TileError> {
            if dst.file_stem().and_then(|s| s.to_str()) == Some("boom") {
                panic!("decoder blew up");
            }
            Ok(())
        });
    let d = Dispatcher::new(&opts(&dir, 1), creator, Arc::new(NoProgress)).unwrap();
    let outcomes = d.outcomes();
    d.start().unwrap();
    d.submit("boom", "/src/boom.png");
    d.submit("fine", "/src/fine.png");
    d.join().unwrap();

    assert_eq!(d.completed_count(), 2);
    let all: Vec<JobOutcome> = outcomes.iter().collect();
    match &outcomes_for(&all, "boom")[..] {
        [JobStatus::Failed { reason }] => assert!(reason.contains("decoder blew up")),
        other => panic!("unexpected outcomes for boom: {other:?}"),
    }
    assert_eq!(outcomes_for(&all, "fine"), vec![JobStatus::Succeeded]);
}

// --- scenario B / P2: dedup before dequeue ---

#[test]
fn test_duplicate_key_before_start_is_queued_once() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Dispatcher::new(&opts(&dir, 2), writing_creator(calls.clone()), Arc::new(NoProgress))
        .unwrap();

    assert!(d.submit("a", "/src/a.png"));
    assert!(!d.submit("a", "/src/other.png"));
    assert_eq!(d.pending_count(), 1);
    assert_eq!(d.submitted_count(), 1);
    assert!(d.is_pending(&JobKey::from("a")));

    d.start().unwrap();
    d.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(d.completed_count(), 1);
}

// --- P3: resubmission after dequeue is a second unit of work ---

#[test]
fn test_resubmission_after_dequeue_is_processed_again() {
    let dir = tempfile::tempdir().unwrap();
    let (started_tx, started_rx) = unbounded::<PathBuf>();
    let (release_tx, release_rx) = unbounded::<()>();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in = calls.clone();
    let creator: Arc<dyn TileCreator> =
        Arc::new(move |_src: &Path, dst: &Path| -> Result<(), TileError> {
            calls_in.fetch_add(1, Ordering::SeqCst);
            let _ = started_tx.send(dst.to_path_buf());
            let _ = release_rx.recv();
            Ok(())
        });
    let d = Dispatcher::new(&opts(&dir, 1), creator, Arc::new(NoProgress)).unwrap();
    let outcomes = d.outcomes();
    d.start().unwrap();

    assert!(d.submit("a", "/src/a.png"));
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    // First instance is in flight, no longer pending: admitted again.
    assert!(d.submit("a", "/src/a.png"));
    assert_eq!(d.submitted_count(), 2);
    release_tx.send(()).unwrap();
    d.join().unwrap();

    assert_eq!(d.completed_count(), 2);
    assert_eq!(d.completed_outputs().len(), 1);
    let all: Vec<JobOutcome> = outcomes.iter().collect();
    // Single worker: the first completes before the second is dequeued, so the second
    // short-circuits on the completion set.
    assert_eq!(
        outcomes_for(&all, "a"),
        vec![JobStatus::Succeeded, JobStatus::Skipped]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// --- scenario C / P4: out of memory with two workers ---

#[test]
fn test_oom_with_two_workers_resigns_one_and_requeues_once() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Dispatcher::new(&opts(&dir, 2), oom_on_x(calls.clone()), Arc::new(NoProgress)).unwrap();
    let outcomes = d.outcomes();
    d.start().unwrap();
    assert_eq!(d.pool_size(), 2);

    d.submit("x", "/src/x.png");
    d.submit("y", "/src/y.png");
    d.wait_for_completion();

    assert_eq!(d.pool_size(), 1);
    let stats = d.stats();
    assert_eq!(stats.resignations, 1);
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.dequeued, 3);
    assert_eq!(stats.completed, 2);

    d.join().unwrap();
    assert_eq!(d.pool_size(), 0);
    let all: Vec<JobOutcome> = outcomes.iter().collect();
    assert_eq!(
        outcomes_for(&all, "x"),
        vec![JobStatus::Resigned, JobStatus::Dropped]
    );
    assert_eq!(outcomes_for(&all, "y"), vec![JobStatus::Succeeded]);
    assert!(!d.output_dir().join("x.dzi").exists());
}

// --- P5: the last worker never resigns ---

#[test]
fn test_oom_on_last_worker_drops_job_and_keeps_worker() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Dispatcher::new(&opts(&dir, 1), oom_on_x(calls.clone()), Arc::new(NoProgress)).unwrap();
    let outcomes = d.outcomes();
    d.start().unwrap();
    d.submit("x", "/src/x.png");
    d.submit("y", "/src/y.png");
    d.wait_for_completion();

    assert_eq!(d.pool_size(), 1);
    assert_eq!(d.stats().requeued, 0);
    assert_eq!(d.completed_count(), 2);
    assert!(d.completed_outputs().contains(&d.output_dir().join("x.dzi")));

    d.join().unwrap();
    let all: Vec<JobOutcome> = outcomes.iter().collect();
    assert_eq!(outcomes_for(&all, "x"), vec![JobStatus::Dropped]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// --- P6: progress never goes backwards ---

#[test]
fn test_progress_is_monotonic_under_contention() {
    let dir = tempfile::tempdir().unwrap();
    let creator: Arc<dyn TileCreator> =
        Arc::new(|_src: &Path, _dst: &Path| -> Result<(), TileError> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        });
    let sink = Arc::new(RecordingSink::default());
    let d = Dispatcher::new(&opts(&dir, 8), creator, sink.clone()).unwrap();
    d.set_total_expected(40);
    d.start().unwrap();
    for i in 0..40 {
        d.submit(format!("img{i}"), format!("/src/{i}.png"));
    }
    d.join().unwrap();

    let completed: Vec<usize> = sink.reports().iter().map(|r| r.1).collect();
    assert_eq!(completed.len(), 40);
    assert!(completed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(completed.last(), Some(&40));
}

#[test]
fn test_failing_and_panicking_sinks_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in = seen.clone();
    let sink: Arc<dyn ProgressSink> =
        Arc::new(move |_total: usize, completed: usize| -> anyhow::Result<()> {
            seen_in.fetch_add(1, Ordering::SeqCst);
            if completed % 2 == 0 {
                panic!("progress endpoint gone");
            }
            anyhow::bail!("progress endpoint unreachable")
        });
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Dispatcher::new(&opts(&dir, 3), writing_creator(calls.clone()), sink).unwrap();
    d.start().unwrap();
    for i in 0..6 {
        d.submit(format!("p{i}"), format!("/src/{i}.png"));
    }
    d.join().unwrap();

    assert_eq!(d.completed_count(), 6);
    assert_eq!(seen.load(Ordering::SeqCst), 6);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[test]
fn test_sink_may_read_dispatcher_state() {
    let dir = tempfile::tempdir().unwrap();
    let slot: Arc<OnceLock<Weak<Dispatcher>>> = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (slot_in, seen_in) = (slot.clone(), seen.clone());
    let sink: Arc<dyn ProgressSink> =
        Arc::new(move |_total: usize, completed: usize| -> anyhow::Result<()> {
            if let Some(d) = slot_in.get().and_then(Weak::upgrade) {
                let stats = d.stats();
                seen_in.lock().unwrap().push((
                    completed,
                    d.completed_count(),
                    d.completed_outputs().len(),
                    stats.submitted,
                ));
            }
            Ok(())
        });
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Arc::new(Dispatcher::new(&opts(&dir, 2), writing_creator(calls), sink).unwrap());
    slot.set(Arc::downgrade(&d)).unwrap();

    let (done_tx, done_rx) = unbounded();
    let runner = {
        let d = d.clone();
        std::thread::spawn(move || {
            d.start().unwrap();
            for key in ["a", "b", "c"] {
                d.submit(key, format!("/src/{key}.png"));
            }
            d.join().unwrap();
            done_tx.send(()).unwrap();
        })
    };
    assert!(
        done_rx.recv_timeout(Duration::from_secs(10)).is_ok(),
        "join did not return"
    );
    runner.join().unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    for (reported, completed, outputs, submitted) in seen {
        assert!(completed >= reported);
        assert!(outputs >= 1);
        assert!(submitted >= completed);
    }
}

// --- concurrent submission ---

#[test]
fn test_concurrent_submit_and_start() {
    let dir = tempfile::tempdir().unwrap();
    let slot: Arc<OnceLock<Weak<Dispatcher>>> = Arc::new(OnceLock::new());
    let reports = Arc::new(Mutex::new(Vec::new()));
    let (slot_in, reports_in) = (slot.clone(), reports.clone());
    let sink: Arc<dyn ProgressSink> =
        Arc::new(move |_total: usize, completed: usize| -> anyhow::Result<()> {
            if let Some(d) = slot_in.get().and_then(Weak::upgrade) {
                reports_in
                    .lock()
                    .unwrap()
                    .push((d.submitted_count(), completed));
            }
            Ok(())
        });
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Arc::new(Dispatcher::new(&opts(&dir, 4), writing_creator(calls), sink).unwrap());
    slot.set(Arc::downgrade(&d)).unwrap();

    // Four submitters over overlapping windows of 20 keys, racing the pool bring-up.
    std::thread::scope(|scope| {
        for t in 0..4 {
            let d = &d;
            scope.spawn(move || {
                for i in 0..10 {
                    let k = (t * 5 + i) % 20;
                    d.submit(format!("k{k}"), format!("/src/{k}.png"));
                }
            });
        }
        scope.spawn(|| d.start().unwrap());
    });
    d.join().unwrap();

    assert_eq!(d.submitted_count(), d.completed_count());
    assert!(d.submitted_count() >= 20);
    let keys: Vec<String> = (0..20).map(|k| format!("k{k}")).collect();
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    assert_eq!(d.completed_outputs(), expected_outputs(&d, &keys));

    let reports = reports.lock().unwrap().clone();
    assert_eq!(reports.len(), d.completed_count());
    for (submitted, completed) in reports {
        assert!(submitted >= completed, "{submitted} < {completed}");
    }
}

// --- cancellation ---

#[test]
fn test_cancel_mid_drain_withdraws_queued_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in = calls.clone();
    let creator: Arc<dyn TileCreator> =
        Arc::new(move |_src: &Path, _dst: &Path| -> Result<(), TileError> {
            calls_in.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        });
    let batch: Vec<Job> = (0..20)
        .map(|i| Job::new(format!("c{i}"), format!("/src/{i}.png")))
        .collect();
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_in = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(60));
        cancel_in.store(true, Ordering::Relaxed);
    });

    let summary = tilepool::run::run_batch(
        batch,
        &opts(&dir, 1),
        creator,
        Arc::new(NoProgress),
        Some(&cancel),
    )
    .unwrap();
    canceller.join().unwrap();

    let calls = calls.load(Ordering::SeqCst);
    assert!(calls < 10, "{calls} jobs ran after cancel");
    assert_eq!(summary.succeeded, calls);
    assert_eq!(summary.submitted, calls);
    assert_eq!(summary.cancelled, 20 - calls);
}

// --- scenario D: reset drains then clears ---

#[test]
fn test_reset_mid_batch_drains_then_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in = calls.clone();
    let creator: Arc<dyn TileCreator> =
        Arc::new(move |_src: &Path, _dst: &Path| -> Result<(), TileError> {
            std::thread::sleep(Duration::from_millis(5));
            calls_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    let d = Dispatcher::new(&opts(&dir, 2), creator, Arc::new(NoProgress)).unwrap();
    d.start().unwrap();
    for i in 0..10 {
        d.submit(format!("r{i}"), format!("/src/{i}.png"));
    }
    d.reset().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert_eq!(d.state(), LifecycleState::Idle);
    assert_eq!(d.pool_size(), 0);
    assert_eq!(d.submitted_count(), 0);
    assert_eq!(d.completed_count(), 0);
    assert_eq!(d.pending_count(), 0);
    assert!(d.completed_outputs().is_empty());

    // Same key as the first batch: nothing remembered, so it is tiled again.
    assert!(d.submit("r0", "/src/0.png"));
    assert_eq!(d.submitted_count(), 1);
    d.start().unwrap();
    d.join().unwrap();
    assert_eq!(d.completed_count(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 11);
}

// --- lifecycle ---

#[test]
fn test_start_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Dispatcher::new(&opts(&dir, 3), writing_creator(calls), Arc::new(NoProgress)).unwrap();
    assert_eq!(d.state(), LifecycleState::Idle);
    d.start().unwrap();
    d.start().unwrap();
    assert_eq!(d.pool_size(), 3);
    assert_eq!(d.state(), LifecycleState::Running);
    d.join().unwrap();
    assert_eq!(d.pool_size(), 0);
    assert_eq!(d.state(), LifecycleState::Idle);
}

#[test]
fn test_join_without_start_drains_submitted_work() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Dispatcher::new(&opts(&dir, 2), writing_creator(calls.clone()), Arc::new(NoProgress))
        .unwrap();
    d.submit("a", "/src/a.png");
    d.submit("b", "/src/b.png");
    d.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(d.pool_size(), 0);
}

#[test]
fn test_second_join_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Dispatcher::new(&opts(&dir, 2), writing_creator(calls.clone()), Arc::new(NoProgress))
        .unwrap();
    d.start().unwrap();
    d.submit("a", "/src/a.png");
    d.join().unwrap();
    d.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(d.state(), LifecycleState::Idle);
}

#[test]
fn test_outcome_stream_ends_after_join() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Dispatcher::new(&opts(&dir, 2), writing_creator(calls), Arc::new(NoProgress)).unwrap();
    let first = d.outcomes();
    d.start().unwrap();
    d.submit("a", "/src/a.png");
    d.join().unwrap();
    assert_eq!(first.iter().count(), 1);

    // Next session gets its own stream; the same key is already produced this run.
    let second = d.outcomes();
    d.start().unwrap();
    d.submit("a", "/src/a.png");
    d.join().unwrap();
    let statuses: Vec<JobStatus> = second.iter().map(|o| o.status).collect();
    assert_eq!(statuses, vec![JobStatus::Skipped]);
}

// --- configuration errors fail fast ---

#[test]
fn test_zero_threads_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let err = Dispatcher::new(&opts(&dir, 0), writing_creator(calls), Arc::new(NoProgress));
    assert!(err.is_err());
}

#[test]
fn test_output_path_that_is_a_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not_a_dir");
    std::fs::write(&file, b"x").unwrap();
    let o = DispatchOpts {
        output_dir: file,
        thread_count: Some(1),
        total_expected: 0,
    };
    let calls = Arc::new(AtomicUsize::new(0));
    assert!(Dispatcher::new(&o, writing_creator(calls), Arc::new(NoProgress)).is_err());
}

#[test]
fn test_missing_output_dir_is_created_and_default_threads_positive() {
    let dir = tempfile::tempdir().unwrap();
    let o = DispatchOpts {
        output_dir: dir.path().join("deep").join("tiles"),
        thread_count: None,
        total_expected: 0,
    };
    let calls = Arc::new(AtomicUsize::new(0));
    let d = Dispatcher::new(&o, writing_creator(calls), Arc::new(NoProgress)).unwrap();
    assert!(o.output_dir.is_dir());
    assert!(d.thread_count() >= 5);
    assert_eq!(d.thread_count(), tilepool::default_thread_count());
}
