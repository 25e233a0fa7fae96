//! Background sync worker.
//!
//! Owns its own git2::Repository handle (which is !Sync) and runs on a
//! dedicated thread. Mutation callers never wait on it: a `Write` returns
//! as soon as the local commit lands, regardless of sync progress.
//!
//! At most one cycle is in flight. Nudges ride a bounded(1) channel, so a
//! request arriving mid-cycle coalesces into at most one follow-up cycle.
//! In auto mode nudges are debounced to batch rapid mutations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use git2::Repository;

use crate::config::Config;
use crate::git::sync::sync_with_retry;
use crate::git::{SyncError, SyncOutcome};
use crate::store::StoreError;

/// Caller-visible sync state. Failures never invalidate local state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    /// No cycle has run yet.
    Idle,
    /// A cycle is in flight.
    Syncing,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed; local commits are intact and will be
    /// pushed by a later cycle.
    Failed { reason: String },
}

enum Ctrl {
    Flush {
        respond: Sender<Result<SyncOutcome, SyncError>>,
    },
    Shutdown,
}

pub(crate) struct WorkerHandle {
    nudge_tx: Sender<()>,
    ctrl_tx: Sender<Ctrl>,
    status: Arc<Mutex<SyncStatus>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request an asynchronous cycle. A full queue means one is already
    /// pending - the request coalesces.
    pub fn nudge(&self) {
        let _ = self.nudge_tx.try_send(());
    }

    /// Run a cycle now and block until it completes or fails.
    pub fn flush(&self) -> Result<SyncOutcome, StoreError> {
        let (tx, rx) = bounded(1);
        self.ctrl_tx
            .send(Ctrl::Flush { respond: tx })
            .map_err(|_| StoreError::WorkerGone)?;
        rx.recv()
            .map_err(|_| StoreError::WorkerGone)?
            .map_err(StoreError::from)
    }

    pub fn status(&self) -> SyncStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or(SyncStatus::Idle)
    }

    pub fn shutdown(&mut self) {
        let _ = self.ctrl_tx.send(Ctrl::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn spawn(path: PathBuf, config: Config) -> WorkerHandle {
    let (nudge_tx, nudge_rx) = bounded(1);
    let (ctrl_tx, ctrl_rx) = unbounded();
    let status = Arc::new(Mutex::new(SyncStatus::Idle));

    let loop_status = Arc::clone(&status);
    let join = std::thread::Builder::new()
        .name("trove-sync".to_string())
        .spawn(move || run_loop(path, config, nudge_rx, ctrl_rx, loop_status))
        .ok();

    WorkerHandle {
        nudge_tx,
        ctrl_tx,
        status,
        join,
    }
}

fn run_loop(
    path: PathBuf,
    config: Config,
    nudge_rx: Receiver<()>,
    ctrl_rx: Receiver<Ctrl>,
    status: Arc<Mutex<SyncStatus>>,
) {
    // The worker's own handle, reused across cycles. Opened lazily so a
    // transient open failure surfaces per cycle instead of killing the
    // thread.
    let mut repo: Option<Repository> = None;

    loop {
        crossbeam::select! {
            recv(nudge_rx) -> msg => {
                if msg.is_err() {
                    break;
                }
                // Batch rapid mutations into one cycle.
                std::thread::sleep(Duration::from_millis(config.sync.debounce_ms));
                drain(&nudge_rx);
                let result = run_cycle(&mut repo, &path, &config, &status);
                log_outcome(&result);
            }
            recv(ctrl_rx) -> msg => {
                match msg {
                    Ok(Ctrl::Flush { respond }) => {
                        drain(&nudge_rx);
                        let result = run_cycle(&mut repo, &path, &config, &status);
                        log_outcome(&result);
                        let _ = respond.send(result);
                    }
                    Ok(Ctrl::Shutdown) | Err(_) => break,
                }
            }
        }
    }
}

fn drain(nudge_rx: &Receiver<()>) {
    while nudge_rx.try_recv().is_ok() {}
}

fn run_cycle(
    repo: &mut Option<Repository>,
    path: &Path,
    config: &Config,
    status: &Arc<Mutex<SyncStatus>>,
) -> Result<SyncOutcome, SyncError> {
    set_status(status, SyncStatus::Syncing);
    let result = open_repo(repo, path)
        .and_then(|repo| sync_with_retry(repo, &config.author, &config.sync));
    match &result {
        Ok(_) => set_status(status, SyncStatus::Synced),
        Err(e) => set_status(
            status,
            SyncStatus::Failed {
                reason: e.to_string(),
            },
        ),
    }
    result
}

fn open_repo<'a>(
    slot: &'a mut Option<Repository>,
    path: &Path,
) -> Result<&'a Repository, SyncError> {
    let repo = match slot.take() {
        Some(repo) => repo,
        None => Repository::open(path)
            .map_err(|e| SyncError::OpenRepo(path.to_path_buf(), e))?,
    };
    Ok(slot.insert(repo))
}

fn set_status(status: &Arc<Mutex<SyncStatus>>, value: SyncStatus) {
    if let Ok(mut guard) = status.lock() {
        *guard = value;
    }
}

fn log_outcome(result: &Result<SyncOutcome, SyncError>) {
    match result {
        Ok(SyncOutcome::UpToDate) => tracing::debug!("sync: up to date"),
        Ok(SyncOutcome::Pushed) => tracing::info!("sync: pushed local history"),
        Ok(SyncOutcome::FastForwarded) => tracing::info!("sync: fast-forwarded to remote"),
        Ok(SyncOutcome::Merged { diff }) => tracing::info!(
            added = diff.added,
            removed = diff.removed,
            changed = diff.changed,
            resolved = diff.conflicts_resolved,
            "sync: merged remote history"
        ),
        Err(e) => tracing::warn!("sync failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nudges_coalesce() {
        let (tx, rx) = bounded::<()>(1);
        assert!(tx.try_send(()).is_ok());
        // Second request while one is pending is a no-op, not an error path.
        assert!(tx.try_send(()).is_err());
        drain(&rx);
        assert!(rx.try_recv().is_err());
    }
}
