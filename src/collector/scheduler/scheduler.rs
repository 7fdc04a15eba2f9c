//! In-memory FIFO run scheduler
//!
//! The scheduler:
//! 1. Keeps one global FIFO queue of runs behind a max-concurrency gate
//! 2. Allows at most one Queued or Running run per handle
//! 3. Spawns each started run on the Tokio runtime under a supervisor
//!    that maps the runner's outcome to Done, Failed or Cancelled
//! 4. Persists run snapshots through [`RunStore`]
//!
//! All state sits behind one mutex. Critical sections never await and
//! never touch the filesystem.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinError;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::collector::lifecycle::StartMode;

use super::cancel::CancelToken;
use super::persistence::RunStore;
use super::run::{Run, RunError, RunKind, TaskStatus};
use super::{SchedulerError, SchedulerResult};

/// Executes one run. The future resolves when the run is over.
///
/// The token is cancelled when the run's handle is cancelled. The runner
/// is expected to notice it, stop its work (including work handed off to
/// other threads) and return [`RunError::Cancelled`]. The handle stays
/// claimed until the future resolves.
pub trait RunExecutor: Send + Sync + 'static {
    fn execute(&self, run: Run, cancel: CancelToken) -> BoxFuture<'static, Result<(), RunError>>;
}

impl<F, Fut> RunExecutor for F
where
    F: Fn(Run, CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RunError>> + Send + 'static,
{
    fn execute(&self, run: Run, cancel: CancelToken) -> BoxFuture<'static, Result<(), RunError>> {
        Box::pin(self(run, cancel))
    }
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub runs_dir: PathBuf,
}

/// Public view of one handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleState {
    pub handle: String,
    pub status: TaskStatus,
    pub run_id: Option<Uuid>,
    /// 1-based position in the global queue while Queued
    pub queued_position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRef {
    pub run_id: Uuid,
    pub handle: String,
}

/// Point-in-time view of the whole scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub max_concurrent: usize,
    pub running_count: usize,
    pub queued_count: usize,
    pub running: Vec<RunRef>,
    pub queued: Vec<RunRef>,
    /// Every handle ever seen, sorted
    pub handles: Vec<HandleState>,
}

struct RunningSlot {
    run_id: Uuid,
    token: CancelToken,
}

#[derive(Default)]
struct SchedulerState {
    max_concurrent: usize,
    queue: VecDeque<Uuid>,
    running: Vec<RunningSlot>,
    runs: HashMap<Uuid, Run>,
    active_by_handle: HashMap<String, Uuid>,
    handle_status: BTreeMap<String, TaskStatus>,
}

impl SchedulerState {
    fn queued_position(&self, run_id: Uuid) -> Option<usize> {
        self.queue.iter().position(|id| *id == run_id).map(|idx| idx + 1)
    }

    fn handle_state(&self, handle: &str) -> HandleState {
        let run_id = self.active_by_handle.get(handle).copied();
        HandleState {
            handle: handle.to_string(),
            status: self.handle_status.get(handle).copied().unwrap_or(TaskStatus::Idle),
            run_id,
            queued_position: run_id.and_then(|id| self.queued_position(id)),
        }
    }

    fn run_ref(&self, run_id: Uuid) -> Option<RunRef> {
        self.runs.get(&run_id).map(|run| RunRef {
            run_id,
            handle: run.handle.clone(),
        })
    }
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    executor: Arc<dyn RunExecutor>,
    store: RunStore,
}

impl SchedulerInner {
    fn start_run_locked(self: &Arc<Self>, state: &mut SchedulerState, run_id: Uuid) {
        let Some(run) = state.runs.get_mut(&run_id) else {
            return;
        };

        let now = Utc::now();
        run.status = TaskStatus::Running;
        run.updated_at = now;
        run.started_at = Some(now);
        self.store.persist(run);

        let handle = run.handle.clone();
        let snapshot = run.clone();
        state.handle_status.insert(handle.clone(), TaskStatus::Running);

        let token = CancelToken::new();
        state.running.push(RunningSlot {
            run_id,
            token: token.clone(),
        });

        info!(%run_id, handle = %handle, running = state.running.len(), "Run started");

        let span = info_span!("run", %run_id, handle = %handle);
        tokio::spawn(supervise(self.clone(), snapshot, token).instrument(span));
    }

    fn try_start_queued_locked(self: &Arc<Self>, state: &mut SchedulerState) {
        while state.running.len() < state.max_concurrent {
            let Some(run_id) = state.queue.pop_front() else {
                break;
            };
            let is_queued = state
                .runs
                .get(&run_id)
                .is_some_and(|run| run.status == TaskStatus::Queued);
            if is_queued {
                self.start_run_locked(state, run_id);
            }
        }
    }
}

/// Cloneable handle to the scheduler
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler. Must be called inside a Tokio runtime.
    pub fn new(config: SchedulerConfig, executor: Arc<dyn RunExecutor>) -> SchedulerResult<Self> {
        if config.max_concurrent < 1 {
            return Err(SchedulerError::InvalidConcurrency(config.max_concurrent));
        }

        let state = SchedulerState {
            max_concurrent: config.max_concurrent,
            ..SchedulerState::default()
        };

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(state),
                executor,
                store: RunStore::spawn(config.runs_dir),
            }),
        })
    }

    /// Submit a run for `handle`.
    ///
    /// The run starts immediately when the queue is empty and a slot is
    /// free; otherwise it joins the back of the queue. Fails when the
    /// handle is blank, the kind is unknown, or the handle already has an
    /// active run.
    pub fn enqueue(
        &self,
        handle: &str,
        kind: &str,
        account_config: Value,
        start_mode: Option<StartMode>,
    ) -> SchedulerResult<Run> {
        let handle = validate_handle(handle)?;
        let kind: RunKind = kind.parse()?;

        let mut state = self.inner.state.lock();

        if state.active_by_handle.contains_key(&handle) {
            return Err(SchedulerError::Conflict(handle));
        }

        let should_queue = !state.queue.is_empty() || state.running.len() >= state.max_concurrent;
        let status = if should_queue { TaskStatus::Queued } else { TaskStatus::Running };
        let run = Run::new(handle.clone(), kind, account_config, start_mode, status);
        let run_id = run.run_id;

        self.inner.store.persist(&run);
        state.active_by_handle.insert(handle.clone(), run_id);
        state.handle_status.insert(handle.clone(), status);
        state.runs.insert(run_id, run);

        if should_queue {
            state.queue.push_back(run_id);
            info!(%run_id, handle = %handle, position = state.queue.len(), "Run queued");
        } else {
            self.inner.start_run_locked(&mut state, run_id);
        }
        self.inner.try_start_queued_locked(&mut state);

        state
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(SchedulerError::UnknownRun(run_id))
    }

    /// Cancel the active run of `handle`.
    ///
    /// A queued run is dropped on the spot and the handle returns to Idle.
    /// A running run is signalled and `Running` is returned; its final
    /// state is recorded once the runner has stopped. Without an active
    /// run this is a no-op returning the handle's current state.
    pub fn cancel(&self, handle: &str) -> SchedulerResult<TaskStatus> {
        let handle = validate_handle(handle)?;
        let mut state = self.inner.state.lock();

        let Some(run_id) = state.active_by_handle.get(&handle).copied() else {
            return Ok(state.handle_status.get(&handle).copied().unwrap_or(TaskStatus::Idle));
        };

        let Some(status) = state.runs.get(&run_id).map(|run| run.status) else {
            state.active_by_handle.remove(&handle);
            state.handle_status.insert(handle, TaskStatus::Idle);
            return Ok(TaskStatus::Idle);
        };

        match status {
            TaskStatus::Queued => {
                state.queue.retain(|id| *id != run_id);
                state.runs.remove(&run_id);
                state.active_by_handle.remove(&handle);
                state.handle_status.insert(handle.clone(), TaskStatus::Idle);
                info!(%run_id, handle = %handle, "Queued run removed");
                Ok(TaskStatus::Idle)
            }
            TaskStatus::Running => {
                if let Some(slot) = state.running.iter().find(|slot| slot.run_id == run_id) {
                    slot.token.cancel();
                }
                info!(%run_id, handle = %handle, "Cancellation requested");
                Ok(TaskStatus::Running)
            }
            other => {
                state.active_by_handle.remove(&handle);
                state.handle_status.insert(handle, other);
                Ok(other)
            }
        }
    }

    /// Cancel every active run. Returns how many handles were affected.
    ///
    /// The queue is drained before any running run is signalled, in one
    /// critical section, so a run finishing meanwhile cannot promote a
    /// queued handle that was meant to go back to Idle.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.inner.state.lock();

        let queued: Vec<Uuid> = state.queue.drain(..).collect();
        for run_id in &queued {
            let Some(run) = state.runs.remove(run_id) else {
                continue;
            };
            if state.active_by_handle.get(&run.handle) == Some(run_id) {
                state.active_by_handle.remove(&run.handle);
            }
            state.handle_status.insert(run.handle.clone(), TaskStatus::Idle);
            info!(run_id = %run_id, handle = %run.handle, "Queued run removed");
        }

        for slot in &state.running {
            slot.token.cancel();
        }
        let signalled = state.running.len();
        if signalled > 0 {
            info!(running = signalled, "Cancellation requested for running runs");
        }

        queued.len() + signalled
    }

    pub fn get_handle_state(&self, handle: &str) -> SchedulerResult<HandleState> {
        let handle = validate_handle(handle)?;
        Ok(self.inner.state.lock().handle_state(&handle))
    }

    pub fn get_run(&self, run_id: Uuid) -> Option<Run> {
        self.inner.state.lock().runs.get(&run_id).cloned()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.inner.state.lock();

        SchedulerSnapshot {
            max_concurrent: state.max_concurrent,
            running_count: state.running.len(),
            queued_count: state.queue.len(),
            running: state.running.iter().filter_map(|slot| state.run_ref(slot.run_id)).collect(),
            queued: state.queue.iter().filter_map(|id| state.run_ref(*id)).collect(),
            handles: state.handle_status.keys().map(|handle| state.handle_state(handle)).collect(),
        }
    }

    /// True when nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.queue.is_empty() && state.running.is_empty()
    }

    /// Start queued runs while slots are free.
    pub fn reschedule(&self) {
        let mut state = self.inner.state.lock();
        self.inner.try_start_queued_locked(&mut state);
    }

    /// Change the concurrency limit. Running runs are never preempted;
    /// a higher limit starts queued runs right away.
    pub fn set_max_concurrent(&self, max_concurrent: usize) -> SchedulerResult<()> {
        if max_concurrent < 1 {
            return Err(SchedulerError::InvalidConcurrency(max_concurrent));
        }
        let mut state = self.inner.state.lock();
        if state.max_concurrent != max_concurrent {
            info!(from = state.max_concurrent, to = max_concurrent, "Concurrency limit changed");
            state.max_concurrent = max_concurrent;
        }
        self.inner.try_start_queued_locked(&mut state);
        Ok(())
    }

    /// Wait until every run snapshot issued so far has been written.
    pub async fn flush_persistence(&self) {
        self.inner.store.flush().await;
    }
}

/// Trim and drop a leading `@`, so `@alice` and `alice` share one lock.
fn validate_handle(handle: &str) -> SchedulerResult<String> {
    let handle = handle.trim().trim_start_matches('@').trim();
    if handle.is_empty() {
        return Err(SchedulerError::InvalidHandle);
    }
    Ok(handle.to_string())
}

fn outcome_of(joined: Result<Result<(), RunError>, JoinError>) -> (TaskStatus, Option<String>) {
    match joined {
        Ok(Ok(())) => (TaskStatus::Done, None),
        Ok(Err(RunError::Cancelled)) => (TaskStatus::Cancelled, None),
        Ok(Err(RunError::Failed(error))) => (TaskStatus::Failed, Some(error)),
        Err(e) if e.is_cancelled() => (TaskStatus::Cancelled, None),
        Err(e) => (TaskStatus::Failed, Some(format!("runner panicked: {e}"))),
    }
}

/// Drive one run to completion and record its final state.
///
/// Cancellation never aborts the runner task: its blocking workers would
/// outlive it. The run is finished only once the runner has returned.
async fn supervise(inner: Arc<SchedulerInner>, run: Run, token: CancelToken) {
    let run_id = run.run_id;
    let joined = tokio::spawn(inner.executor.execute(run, token)).await;

    let (status, error) = outcome_of(joined);
    finish_run(&inner, run_id, status, error);
}

fn finish_run(inner: &Arc<SchedulerInner>, run_id: Uuid, status: TaskStatus, error: Option<String>) {
    let mut state = inner.state.lock();
    state.running.retain(|slot| slot.run_id != run_id);

    let Some(run) = state.runs.get_mut(&run_id) else {
        debug!(%run_id, "Finished run is no longer tracked");
        return;
    };

    let now = Utc::now();
    run.status = status;
    run.error = error;
    run.updated_at = now;
    run.finished_at = Some(now);
    inner.store.persist(run);

    let handle = run.handle.clone();
    let runtime_secs = run.runtime_secs(now);
    match (&run.error, status) {
        (Some(error), _) => warn!(%run_id, handle = %handle, %status, runtime_secs, error = %error, "Run finished"),
        _ => info!(%run_id, handle = %handle, %status, runtime_secs, "Run finished"),
    }

    if state.active_by_handle.get(&handle) == Some(&run_id) {
        state.active_by_handle.remove(&handle);
    }
    state.handle_status.insert(handle, status);

    inner.try_start_queued_locked(&mut state);
}
