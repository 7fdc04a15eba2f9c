//! Best-effort persistence of run records
//!
//! Each run is written to `<runs_dir>/<run_id>.json` by a single background
//! task, so writes land in the order the scheduler issued them. Failures
//! are logged and otherwise ignored; in-memory state stays authoritative.

use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::run::{Run, RunRecord};

enum StoreCommand {
    Write(RunRecord),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background run writer
#[derive(Debug, Clone)]
pub struct RunStore {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl RunStore {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(runs_dir: impl Into<PathBuf>) -> Self {
        let runs_dir = runs_dir.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(runs_dir, rx));
        Self { tx }
    }

    /// Queue a snapshot of `run` for writing. Never blocks.
    pub fn persist(&self, run: &Run) {
        if self.tx.send(StoreCommand::Write(run.to_record())).is_err() {
            debug!(run_id = %run.run_id, "Run writer is gone; record not persisted");
        }
    }

    /// Wait until every write queued so far has been attempted.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(StoreCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn writer_loop(runs_dir: PathBuf, mut rx: mpsc::UnboundedReceiver<StoreCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            StoreCommand::Write(record) => match write_record(&runs_dir, &record).await {
                Ok(path) => trace!(path = %path.display(), status = %record.status, "Persisted run"),
                Err(e) => debug!(run_id = %record.run_id, error = %e, "Failed to persist run"),
            },
            StoreCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

async fn write_record(runs_dir: &Path, record: &RunRecord) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(runs_dir).await?;
    let path = runs_dir.join(format!("{}.json", record.run_id));
    let json = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
    tokio::fs::write(&path, json).await?;
    Ok(path)
}
