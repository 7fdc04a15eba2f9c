//! Scheduler behaviour tests driven by a controllable executor

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::sync::oneshot;

use super::*;
use crate::collector::lifecycle::StartMode;

type Finish = oneshot::Sender<Result<(), RunError>>;

/// Executor whose runs block until the test finishes them or the run is
/// cancelled
#[derive(Clone, Default)]
struct Harness {
    pending: Arc<Mutex<HashMap<String, Finish>>>,
    started: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn executor(&self) -> Arc<dyn RunExecutor> {
        let harness = self.clone();
        Arc::new(move |run: Run, cancel: CancelToken| {
            let (tx, rx) = oneshot::channel();
            harness.pending.lock().insert(run.handle.clone(), tx);
            harness.started.lock().push(run.handle.clone());
            async move {
                tokio::select! {
                    result = rx => result.unwrap_or(Ok(())),
                    _ = cancel.cancelled() => Err(RunError::Cancelled),
                }
            }
        })
    }

    async fn finish(&self, handle: &str, result: Result<(), RunError>) {
        wait_for(|| self.pending.lock().contains_key(handle)).await;
        let tx = self.pending.lock().remove(handle).unwrap();
        tx.send(result).unwrap();
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}

fn scheduler(max_concurrent: usize, executor: Arc<dyn RunExecutor>) -> (Scheduler, TempDir) {
    let dir = tempdir().unwrap();
    let config = SchedulerConfig {
        max_concurrent,
        runs_dir: dir.path().join("runs"),
    };
    (Scheduler::new(config, executor).unwrap(), dir)
}

fn status_of(scheduler: &Scheduler, handle: &str) -> TaskStatus {
    scheduler.get_handle_state(handle).unwrap().status
}

#[tokio::test]
async fn test_fifo_queue_respects_concurrency() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(1, harness.executor());

    let a = scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    let b = scheduler.enqueue("bob", "start", json!({}), None).unwrap();
    let c = scheduler.enqueue("carol", "continue", json!({}), None).unwrap();

    assert_eq!(a.status, TaskStatus::Running);
    assert!(a.started_at.is_some());
    assert_eq!(b.status, TaskStatus::Queued);
    assert_eq!(c.status, TaskStatus::Queued);
    assert_eq!(scheduler.get_handle_state("bob").unwrap().queued_position, Some(1));
    assert_eq!(scheduler.get_handle_state("carol").unwrap().queued_position, Some(2));
    assert_eq!(scheduler.get_handle_state("alice").unwrap().queued_position, None);

    harness.finish("alice", Ok(())).await;
    wait_for(|| status_of(&scheduler, "bob") == TaskStatus::Running).await;

    assert_eq!(status_of(&scheduler, "alice"), TaskStatus::Done);
    assert_eq!(status_of(&scheduler, "carol"), TaskStatus::Queued);
    assert_eq!(scheduler.get_handle_state("carol").unwrap().queued_position, Some(1));

    harness.finish("bob", Ok(())).await;
    harness.finish("carol", Ok(())).await;
    wait_for(|| scheduler.is_idle()).await;
    assert_eq!(harness.started(), vec!["alice", "bob", "carol"]);
}

#[tokio::test]
async fn test_one_active_run_per_handle() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(2, harness.executor());

    scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    assert_eq!(
        scheduler.enqueue("alice", "continue", json!({}), None),
        Err(SchedulerError::Conflict("alice".to_string()))
    );

    harness.finish("alice", Ok(())).await;
    wait_for(|| status_of(&scheduler, "alice") == TaskStatus::Done).await;

    let again = scheduler.enqueue("alice", "continue", json!({}), None).unwrap();
    assert_eq!(again.status, TaskStatus::Running);
}

#[tokio::test]
async fn test_input_validation() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(1, harness.executor());

    assert_eq!(
        scheduler.enqueue("   ", "start", json!({}), None),
        Err(SchedulerError::InvalidHandle)
    );
    assert!(matches!(
        scheduler.enqueue("alice", "resume", json!({}), None),
        Err(SchedulerError::InvalidKind(_))
    ));
    assert_eq!(scheduler.cancel(""), Err(SchedulerError::InvalidHandle));
    assert_eq!(
        scheduler.set_max_concurrent(0),
        Err(SchedulerError::InvalidConcurrency(0))
    );

    let dir = tempdir().unwrap();
    let config = SchedulerConfig {
        max_concurrent: 0,
        runs_dir: dir.path().to_path_buf(),
    };
    assert!(Scheduler::new(config, harness.executor()).is_err());
    assert!(scheduler.is_idle());
}

#[tokio::test]
async fn test_start_mode_only_kept_for_start() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(1, harness.executor());

    let start = scheduler
        .enqueue("alice", "start", json!({}), Some(StartMode::Pack))
        .unwrap();
    let cont = scheduler
        .enqueue("bob", "continue", json!({}), Some(StartMode::Pack))
        .unwrap();

    assert_eq!(start.start_mode, Some(StartMode::Pack));
    assert_eq!(cont.start_mode, None);
}

#[tokio::test]
async fn test_cancel_queued_run() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(1, harness.executor());

    scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    let queued = scheduler.enqueue("bob", "start", json!({}), None).unwrap();

    assert_eq!(scheduler.cancel("bob"), Ok(TaskStatus::Idle));

    let state = scheduler.get_handle_state("bob").unwrap();
    assert_eq!(state.status, TaskStatus::Idle);
    assert_eq!(state.run_id, None);
    assert!(scheduler.get_run(queued.run_id).is_none());
    assert_eq!(scheduler.snapshot().queued_count, 0);
    assert_eq!(status_of(&scheduler, "alice"), TaskStatus::Running);

    // Nothing active any more: cancelling again is a no-op.
    assert_eq!(scheduler.cancel("bob"), Ok(TaskStatus::Idle));
    assert_eq!(scheduler.cancel("nobody"), Ok(TaskStatus::Idle));
}

#[tokio::test]
async fn test_cancel_running_run_frees_slot_after_termination() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(1, harness.executor());

    let running = scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    scheduler.enqueue("bob", "start", json!({}), None).unwrap();
    wait_for(|| harness.started().len() == 1).await;

    assert_eq!(scheduler.cancel("alice"), Ok(TaskStatus::Running));

    wait_for(|| status_of(&scheduler, "alice") == TaskStatus::Cancelled).await;
    wait_for(|| status_of(&scheduler, "bob") == TaskStatus::Running).await;

    let run = scheduler.get_run(running.run_id).unwrap();
    assert_eq!(run.status, TaskStatus::Cancelled);
    assert!(run.finished_at.is_some());
    assert_eq!(scheduler.get_handle_state("alice").unwrap().run_id, None);
}

#[tokio::test]
async fn test_runner_outcomes() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(3, harness.executor());

    let failed = scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    let cancelled = scheduler.enqueue("bob", "start", json!({}), None).unwrap();
    let done = scheduler.enqueue("carol", "start", json!({}), None).unwrap();

    harness.finish("alice", Err(RunError::failed("boom"))).await;
    harness.finish("bob", Err(RunError::Cancelled)).await;
    harness.finish("carol", Ok(())).await;
    wait_for(|| scheduler.is_idle()).await;

    let failed = scheduler.get_run(failed.run_id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("boom"));
    assert_eq!(scheduler.get_run(cancelled.run_id).unwrap().status, TaskStatus::Cancelled);
    let done = scheduler.get_run(done.run_id).unwrap();
    assert_eq!(done.status, TaskStatus::Done);
    assert_eq!(done.error, None);
}

#[tokio::test]
async fn test_panicking_runner_fails_the_run() {
    let executor: Arc<dyn RunExecutor> = Arc::new(|_run: Run, _cancel: CancelToken| async move {
        if true {
            panic!("runner exploded");
        }
        Ok::<(), RunError>(())
    });
    let (scheduler, _dir) = scheduler(1, executor);

    let run = scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    wait_for(|| status_of(&scheduler, "alice") == TaskStatus::Failed).await;

    let error = scheduler.get_run(run.run_id).unwrap().error.unwrap();
    assert!(error.contains("panicked"), "{error}");
}

#[tokio::test]
async fn test_raising_limit_starts_queued_runs() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(1, harness.executor());

    scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    scheduler.enqueue("bob", "start", json!({}), None).unwrap();
    scheduler.enqueue("carol", "start", json!({}), None).unwrap();

    scheduler.set_max_concurrent(2).unwrap();
    assert_eq!(status_of(&scheduler, "bob"), TaskStatus::Running);
    assert_eq!(status_of(&scheduler, "carol"), TaskStatus::Queued);

    // Lowering the limit never preempts.
    scheduler.set_max_concurrent(1).unwrap();
    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.max_concurrent, 1);
    assert_eq!(snapshot.running_count, 2);

    harness.finish("alice", Ok(())).await;
    wait_for(|| status_of(&scheduler, "alice") == TaskStatus::Done).await;
    assert_eq!(status_of(&scheduler, "carol"), TaskStatus::Queued);

    harness.finish("bob", Ok(())).await;
    wait_for(|| status_of(&scheduler, "carol") == TaskStatus::Running).await;
}

#[tokio::test]
async fn test_snapshot_view() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(1, harness.executor());

    let zed = scheduler.enqueue("zed", "start", json!({}), None).unwrap();
    let amy = scheduler.enqueue("amy", "start", json!({}), None).unwrap();

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.running_count, 1);
    assert_eq!(snapshot.queued_count, 1);
    assert_eq!(
        snapshot.running,
        vec![RunRef {
            run_id: zed.run_id,
            handle: "zed".to_string()
        }]
    );
    assert_eq!(snapshot.queued[0].run_id, amy.run_id);

    let handles: Vec<&str> = snapshot.handles.iter().map(|h| h.handle.as_str()).collect();
    assert_eq!(handles, vec!["amy", "zed"]);
    assert_eq!(snapshot.handles[0].queued_position, Some(1));
}

#[tokio::test]
async fn test_runs_are_persisted() {
    let harness = Harness::default();
    let (scheduler, dir) = scheduler(1, harness.executor());

    let run = scheduler
        .enqueue("alice", "start", json!({"mediaType": "videos"}), Some(StartMode::Delete))
        .unwrap();
    harness.finish("alice", Ok(())).await;
    wait_for(|| status_of(&scheduler, "alice") == TaskStatus::Done).await;
    scheduler.flush_persistence().await;

    let path = dir.path().join("runs").join(format!("{}.json", run.run_id));
    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(value["status"], "Done");
    assert_eq!(value["kind"], "start");
    assert_eq!(value["start_mode"], "delete");
    assert_eq!(value["account_config"]["mediaType"], "videos");
    assert!(value["created_at"].as_str().unwrap().ends_with('Z'));
    assert!(value["finished_at"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_cancel_all() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(1, harness.executor());

    scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    scheduler.enqueue("bob", "start", json!({}), None).unwrap();

    assert_eq!(scheduler.cancel_all(), 2);
    wait_for(|| scheduler.is_idle()).await;
    assert_eq!(status_of(&scheduler, "alice"), TaskStatus::Cancelled);
    assert_eq!(status_of(&scheduler, "bob"), TaskStatus::Idle);
    assert_eq!(harness.started(), vec!["alice"]);
}

/// Executor that needs a while to wind down after being cancelled
fn slow_to_stop(started: Arc<Mutex<Vec<String>>>) -> Arc<dyn RunExecutor> {
    Arc::new(move |run: Run, cancel: CancelToken| {
        started.lock().push(run.handle.clone());
        async move {
            cancel.cancelled().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err::<(), RunError>(RunError::Cancelled)
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_all_never_promotes_queued_runs() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let (scheduler, _dir) = scheduler(1, slow_to_stop(started.clone()));

    scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    scheduler.enqueue("bob", "start", json!({}), None).unwrap();
    scheduler.enqueue("carol", "continue", json!({}), None).unwrap();
    wait_for(|| started.lock().len() == 1).await;

    assert_eq!(scheduler.cancel_all(), 3);

    // Queued handles are back to Idle before the running one has stopped.
    assert_eq!(status_of(&scheduler, "alice"), TaskStatus::Running);
    assert_eq!(status_of(&scheduler, "bob"), TaskStatus::Idle);
    assert_eq!(status_of(&scheduler, "carol"), TaskStatus::Idle);
    assert_eq!(scheduler.snapshot().queued_count, 0);

    wait_for(|| scheduler.is_idle()).await;
    assert_eq!(status_of(&scheduler, "alice"), TaskStatus::Cancelled);
    assert_eq!(status_of(&scheduler, "bob"), TaskStatus::Idle);
    assert_eq!(status_of(&scheduler, "carol"), TaskStatus::Idle);
    assert_eq!(scheduler.get_handle_state("bob").unwrap().run_id, None);
    assert_eq!(*started.lock(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn test_cancelled_run_holds_handle_until_worker_returns() {
    let media = tempdir().unwrap();
    let root = media.path().to_path_buf();
    let executor: Arc<dyn RunExecutor> = Arc::new(move |run: Run, cancel: CancelToken| {
        let dir = root.join(&run.handle);
        async move {
            tokio::task::spawn_blocking(move || {
                std::fs::create_dir_all(&dir).unwrap();
                for index in 0..20 {
                    if cancel.is_cancelled() {
                        return Err(RunError::Cancelled);
                    }
                    std::thread::sleep(Duration::from_millis(100));
                    std::fs::write(dir.join(format!("{index}.jpg")), b"media").unwrap();
                }
                Ok(())
            })
            .await
            .unwrap_or_else(|e| Err(RunError::failed(e.to_string())))
        }
    });
    let (scheduler, _dir) = scheduler(2, executor);
    let files = || std::fs::read_dir(media.path().join("alice")).map(|d| d.count()).unwrap_or(0);

    scheduler.enqueue("alice", "start", json!({}), None).unwrap();
    wait_for(|| files() >= 1).await;

    assert_eq!(scheduler.cancel("alice"), Ok(TaskStatus::Running));
    assert_eq!(
        scheduler.enqueue("alice", "continue", json!({}), None),
        Err(SchedulerError::Conflict("alice".to_string()))
    );

    wait_for(|| status_of(&scheduler, "alice") == TaskStatus::Cancelled).await;
    let written = files();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(files(), written);
    assert!(written < 20);
}

#[tokio::test]
async fn test_admission_fills_slots_then_queues_in_order() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(3, harness.executor());

    for handle in ["a1", "a2", "a3", "a4", "a5"] {
        scheduler.enqueue(handle, "start", json!({}), None).unwrap();
    }

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.running_count, 3);
    assert_eq!(snapshot.queued_count, 2);
    for handle in ["a1", "a2", "a3"] {
        let state = scheduler.get_handle_state(handle).unwrap();
        assert_eq!(state.status, TaskStatus::Running);
        assert_eq!(state.queued_position, None);
    }
    assert_eq!(scheduler.get_handle_state("a4").unwrap().queued_position, Some(1));
    assert_eq!(scheduler.get_handle_state("a5").unwrap().queued_position, Some(2));

    harness.finish("a2", Ok(())).await;
    wait_for(|| status_of(&scheduler, "a4") == TaskStatus::Running).await;
    assert_eq!(scheduler.get_handle_state("a5").unwrap().queued_position, Some(1));
}

#[tokio::test]
async fn test_at_prefix_is_the_same_handle() {
    let harness = Harness::default();
    let (scheduler, _dir) = scheduler(2, harness.executor());

    let run = scheduler.enqueue(" @alice ", "start", json!({}), None).unwrap();
    assert_eq!(run.handle, "alice");
    assert_eq!(
        scheduler.enqueue("alice", "continue", json!({}), None),
        Err(SchedulerError::Conflict("alice".to_string()))
    );
    assert_eq!(status_of(&scheduler, "@alice"), TaskStatus::Running);
    assert_eq!(scheduler.enqueue("@", "start", json!({}), None), Err(SchedulerError::InvalidHandle));
}
