//! Sync typestate machine.
//!
//! The fetch→merge→commit→push cycle as a typestate chain: Idle →
//! Fetched → Merged → Committed. Each transition consumes `self` and
//! returns the next phase, so a cycle cannot skip or reorder steps.
//!
//! Key design:
//! - One storage object per entity: independent adds and unrelated
//!   deletions merge cleanly; only same-object edits reach the resolver
//! - Divergent histories produce a two-parent merge commit whose tree
//!   comes from a three-way tree merge plus the resolution policy
//! - Retry on non-fast-forward: fetch again, re-merge, with bounded
//!   exponential backoff
//! - Local commits are never rolled back by a failed sync

use std::path::Path;
use std::time::Duration;

use git2::{Delta, Oid, Repository, Signature, Tree};

use super::error::{PushRejected, SyncError};
use super::resolve::{resolve, Resolution};
use crate::config::{AuthorConfig, SyncConfig};

/// The local store ref. Mutations commit here; sync merges and pushes it.
pub const STORE_REF: &str = "refs/heads/trove/store";
/// Remote-tracking ref updated by fetch.
pub const REMOTE_TRACKING_REF: &str = "refs/remotes/origin/trove/store";
pub const REMOTE_NAME: &str = "origin";

const FETCH_REFSPEC: &str = "+refs/heads/trove/store:refs/remotes/origin/trove/store";
const PUSH_REFSPEC: &str = "refs/heads/trove/store:refs/heads/trove/store";
const COMMIT_PREFIX: &str = "trove(store):";

// =============================================================================
// Phase markers (zero-sized or data-carrying types for typestate)
// =============================================================================

/// Initial phase - ready to start sync.
pub struct Idle;

/// Fetched phase - know where local and remote stand.
pub struct Fetched {
    /// Local store ref at cycle start.
    pub local_oid: Oid,
    /// Remote store ref, if the remote has one.
    pub remote_oid: Option<Oid>,
    /// False for a repository with no `origin` remote (local-only store).
    pub has_remote: bool,
}

/// Merged phase - know what to commit and whether to push.
pub struct Merged {
    local_oid: Oid,
    plan: MergePlan,
}

enum MergePlan {
    UpToDate,
    /// Local strictly ahead of remote (or remote ref absent): push as-is.
    LocalAhead,
    /// Remote strictly ahead: move the local ref, nothing to push.
    FastForward { remote_oid: Oid },
    /// True divergence: commit the merged tree with both parents.
    MergeCommit {
        tree_oid: Oid,
        remote_oid: Oid,
        diff: MergeDiff,
    },
}

/// Committed phase - local ref points at the cycle result.
pub struct Committed {
    pub head_oid: Oid,
    push_needed: bool,
    outcome: SyncOutcome,
}

/// What a completed sync cycle did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local and remote already agreed.
    UpToDate,
    /// Local was strictly ahead; pushed without merging.
    Pushed,
    /// Remote was strictly ahead; local ref fast-forwarded, nothing pushed.
    FastForwarded,
    /// Histories diverged; merged and pushed.
    Merged { diff: MergeDiff },
}

/// Summary of a merge for the commit message and for callers.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct MergeDiff {
    /// Objects the merge added relative to the remote side.
    pub added: usize,
    /// Objects the merge removed relative to the remote side.
    pub removed: usize,
    /// Objects whose bytes changed relative to the remote side.
    pub changed: usize,
    /// Overlapping objects decided by the resolution policy.
    pub conflicts_resolved: usize,
}

impl MergeDiff {
    /// "trove(store): merge +2 added, -1 removed (1 resolved)"
    pub fn to_commit_message(&self) -> String {
        let mut parts = Vec::new();
        if self.added > 0 {
            parts.push(format!("+{} added", self.added));
        }
        if self.removed > 0 {
            parts.push(format!("-{} removed", self.removed));
        }
        if self.changed > 0 {
            parts.push(format!("~{} changed", self.changed));
        }
        let summary = if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        };
        if self.conflicts_resolved > 0 {
            format!(
                "{COMMIT_PREFIX} merge {summary} ({} resolved)",
                self.conflicts_resolved
            )
        } else {
            format!("{COMMIT_PREFIX} merge {summary}")
        }
    }
}

// =============================================================================
// SyncProcess - the typestate machine
// =============================================================================

/// Sync process with typestate-enforced phases.
///
/// Use `SyncProcess::new()` to start, then chain transitions:
/// ```ignore
/// let outcome = SyncProcess::new()
///     .fetch(&repo)?
///     .merge(&repo)?
///     .commit(&repo, &author)?
///     .push(&repo)?;
/// ```
pub struct SyncProcess<Phase> {
    pub phase: Phase,
}

impl SyncProcess<Idle> {
    pub fn new() -> Self {
        SyncProcess { phase: Idle }
    }

    /// Fetch the store ref from origin, transition to Fetched.
    pub fn fetch(self, repo: &Repository) -> Result<SyncProcess<Fetched>, SyncError> {
        let local_oid = repo
            .refname_to_id(STORE_REF)
            .map_err(|_| SyncError::NoLocalRef(STORE_REF.to_string()))?;

        let has_remote = match repo.find_remote(REMOTE_NAME) {
            Ok(mut remote) => {
                let mut fo = git2::FetchOptions::new();
                fo.remote_callbacks(credential_callbacks(repo));
                remote
                    .fetch(&[FETCH_REFSPEC], Some(&mut fo), None)
                    .map_err(SyncError::Fetch)?;
                true
            }
            Err(_) => false,
        };

        let remote_oid = repo.refname_to_id(REMOTE_TRACKING_REF).ok();

        Ok(SyncProcess {
            phase: Fetched {
                local_oid,
                remote_oid,
                has_remote,
            },
        })
    }
}

impl Default for SyncProcess<Idle> {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncProcess<Fetched> {
    /// Decide the merge plan, transition to Merged.
    ///
    /// Three-way tree merge for true divergence; every index conflict is
    /// handed to the resolution policy.
    pub fn merge(self, repo: &Repository) -> Result<SyncProcess<Merged>, SyncError> {
        let Fetched {
            local_oid,
            remote_oid,
            has_remote,
        } = self.phase;

        let plan = match remote_oid {
            None => {
                if has_remote {
                    // Remote exists but has no store ref yet.
                    MergePlan::LocalAhead
                } else {
                    MergePlan::UpToDate
                }
            }
            Some(remote_oid) if remote_oid == local_oid => MergePlan::UpToDate,
            Some(remote_oid) => {
                match repo.merge_base(local_oid, remote_oid) {
                    Ok(base) if base == remote_oid => MergePlan::LocalAhead,
                    Ok(base) if base == local_oid => MergePlan::FastForward { remote_oid },
                    base => {
                        // Unrelated histories (two independent inits that
                        // both reached the remote) merge from an empty base.
                        let ancestor_tree = match base {
                            Ok(oid) => repo.find_commit(oid)?.tree()?,
                            Err(_) => empty_tree(repo)?,
                        };
                        let (tree_oid, diff) =
                            merge_divergent(repo, &ancestor_tree, local_oid, remote_oid)?;
                        MergePlan::MergeCommit {
                            tree_oid,
                            remote_oid,
                            diff,
                        }
                    }
                }
            }
        };

        Ok(SyncProcess {
            phase: Merged { local_oid, plan },
        })
    }
}

impl SyncProcess<Merged> {
    /// Land the plan on the local ref, transition to Committed.
    ///
    /// The ref moves via compare-and-swap against the oid this cycle read:
    /// if a mutation committed in the meantime the swap fails with
    /// `LocalMoved` and the caller re-runs the cycle against the new tip.
    pub fn commit(
        self,
        repo: &Repository,
        author: &AuthorConfig,
    ) -> Result<SyncProcess<Committed>, SyncError> {
        let Merged { local_oid, plan } = self.phase;

        let phase = match plan {
            MergePlan::UpToDate => Committed {
                head_oid: local_oid,
                push_needed: false,
                outcome: SyncOutcome::UpToDate,
            },

            MergePlan::LocalAhead => Committed {
                head_oid: local_oid,
                push_needed: true,
                outcome: SyncOutcome::Pushed,
            },

            MergePlan::FastForward { remote_oid } => {
                repo.reference_matching(
                    STORE_REF,
                    remote_oid,
                    true,
                    local_oid,
                    "trove(store): fast-forward to remote",
                )
                .map_err(|_| SyncError::LocalMoved)?;
                Committed {
                    head_oid: remote_oid,
                    push_needed: false,
                    outcome: SyncOutcome::FastForwarded,
                }
            }

            MergePlan::MergeCommit {
                tree_oid,
                remote_oid,
                diff,
            } => {
                let tree = repo.find_tree(tree_oid)?;
                let local_commit = repo.find_commit(local_oid)?;
                let remote_commit = repo.find_commit(remote_oid)?;
                let sig = Signature::now(&author.name, &author.email)?;
                let message = diff.to_commit_message();

                let commit_oid = repo
                    .commit(
                        None,
                        &sig,
                        &sig,
                        &message,
                        &tree,
                        &[&local_commit, &remote_commit],
                    )
                    .map_err(SyncError::Commit)?;

                repo.reference_matching(
                    STORE_REF,
                    commit_oid,
                    true,
                    local_oid,
                    "trove(store): merge remote",
                )
                .map_err(|_| SyncError::LocalMoved)?;

                Committed {
                    head_oid: commit_oid,
                    push_needed: true,
                    outcome: SyncOutcome::Merged { diff },
                }
            }
        };

        Ok(SyncProcess { phase })
    }
}

impl SyncProcess<Committed> {
    /// Push to origin, completing the cycle.
    ///
    /// Returns NonFastForward if the remote advanced - caller retries.
    /// A repository with no remote completes locally.
    pub fn push(self, repo: &Repository) -> Result<SyncOutcome, SyncError> {
        if !self.phase.push_needed {
            return Ok(self.phase.outcome);
        }

        let mut remote = match repo.find_remote(REMOTE_NAME) {
            Ok(r) => r,
            Err(_) => return Ok(self.phase.outcome),
        };

        use std::cell::RefCell;
        let push_error: RefCell<Option<String>> = RefCell::new(None);

        {
            let mut callbacks = credential_callbacks(repo);
            callbacks.push_update_reference(|_ref_name, status| {
                if let Some(msg) = status {
                    *push_error.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });

            let mut push_options = git2::PushOptions::new();
            push_options.remote_callbacks(callbacks);

            if let Err(e) = remote.push(&[PUSH_REFSPEC], Some(&mut push_options)) {
                if is_contention_error(&e) {
                    return Err(SyncError::NonFastForward);
                }
                return Err(SyncError::Push(e));
            }
        }

        if let Some(err) = push_error.into_inner() {
            if is_contention(&err) {
                return Err(SyncError::NonFastForward);
            }
            return Err(PushRejected { message: err }.into());
        }

        Ok(self.phase.outcome)
    }
}

// =============================================================================
// Divergent merge
// =============================================================================

fn merge_divergent(
    repo: &Repository,
    ancestor_tree: &Tree<'_>,
    local_oid: Oid,
    remote_oid: Oid,
) -> Result<(Oid, MergeDiff), SyncError> {
    let our_tree = repo.find_commit(local_oid)?.tree()?;
    let their_tree = repo.find_commit(remote_oid)?.tree()?;

    let mut index = repo.merge_trees(ancestor_tree, &our_tree, &their_tree, None)?;

    let mut conflicts_resolved = 0;
    if index.has_conflicts() {
        // Collect first: resolution mutates the index.
        let mut pending = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref());
            let path = match entry {
                Some(e) => String::from_utf8_lossy(&e.path).into_owned(),
                None => continue,
            };
            let ancestor = conflict_bytes(repo, conflict.ancestor.as_ref())?;
            let ours = conflict_bytes(repo, conflict.our.as_ref())?;
            let theirs = conflict_bytes(repo, conflict.their.as_ref())?;
            pending.push((path, ancestor, ours, theirs));
        }

        for (path, ancestor, ours, theirs) in pending {
            let resolution = resolve(
                &path,
                ancestor.as_deref(),
                ours.as_deref(),
                theirs.as_deref(),
            )?;
            index.remove_path(Path::new(&path))?;
            if let Resolution::Keep(bytes) = resolution {
                let blob_oid = repo.blob(&bytes).map_err(SyncError::WriteBlob)?;
                index.add(&memory_entry(&path, blob_oid, bytes.len()))?;
            }
            conflicts_resolved += 1;
        }
    }

    let tree_oid = index.write_tree_to(repo).map_err(SyncError::BuildTree)?;
    let merged_tree = repo.find_tree(tree_oid)?;

    let mut diff = compute_diff(repo, &their_tree, &merged_tree)?;
    diff.conflicts_resolved = conflicts_resolved;

    Ok((tree_oid, diff))
}

fn conflict_bytes(
    repo: &Repository,
    entry: Option<&git2::IndexEntry>,
) -> Result<Option<Vec<u8>>, SyncError> {
    match entry {
        Some(e) => Ok(Some(repo.find_blob(e.id)?.content().to_vec())),
        None => Ok(None),
    }
}

/// Index entry for an in-memory (non-checkout) index.
fn memory_entry(path: &str, id: Oid, size: usize) -> git2::IndexEntry {
    git2::IndexEntry {
        ctime: git2::IndexTime::new(0, 0),
        mtime: git2::IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: 0o100_644,
        uid: 0,
        gid: 0,
        file_size: size as u32,
        id,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

/// Diff the merged tree against the remote side for the commit message.
fn compute_diff(
    repo: &Repository,
    before: &Tree<'_>,
    after: &Tree<'_>,
) -> Result<MergeDiff, SyncError> {
    let mut diff = MergeDiff::default();
    let changes = repo.diff_tree_to_tree(Some(before), Some(after), None)?;
    for delta in changes.deltas() {
        match delta.status() {
            Delta::Added => diff.added += 1,
            Delta::Deleted => diff.removed += 1,
            Delta::Modified => diff.changed += 1,
            _ => {}
        }
    }
    Ok(diff)
}

fn empty_tree(repo: &Repository) -> Result<Tree<'_>, SyncError> {
    let oid = repo
        .treebuilder(None)
        .and_then(|b| b.write())
        .map_err(SyncError::BuildTree)?;
    Ok(repo.find_tree(oid)?)
}

// =============================================================================
// Credentials and contention detection
// =============================================================================

/// Credential chain: ssh agent, then the configured credential helper.
pub(crate) fn credential_callbacks<'cb>(repo: &Repository) -> git2::RemoteCallbacks<'cb> {
    let cfg = repo.config().ok();
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        if allowed.is_ssh_key() {
            if let Some(user) = username_from_url {
                return git2::Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.is_user_pass_plaintext() {
            if let Some(ref cfg) = cfg {
                if let Ok(cred) = git2::Cred::credential_helper(cfg, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        git2::Cred::default()
    });
    callbacks
}

fn is_contention_error(e: &git2::Error) -> bool {
    e.code() == git2::ErrorCode::NotFastForward || is_contention(&e.to_string())
}

/// Receive-pack status strings have no error code to inspect.
fn is_contention(msg: &str) -> bool {
    msg.contains("non-fast-forward")
        || msg.contains("non-fastforwardable")
        || msg.contains("fetch first")
        || msg.contains("cannot lock ref")
        || msg.contains("failed to update ref")
}

// =============================================================================
// Entry points
// =============================================================================

/// Run a full sync cycle with retry on contention.
///
/// NonFastForward re-fetches and re-merges with bounded exponential
/// backoff; LocalMoved (a mutation landed mid-cycle) retries immediately
/// against the new tip. After the retry ceiling, TooManyRetries.
pub fn sync_with_retry(
    repo: &Repository,
    author: &AuthorConfig,
    cfg: &SyncConfig,
) -> Result<SyncOutcome, SyncError> {
    let mut attempts = 0;

    loop {
        let result = SyncProcess::new()
            .fetch(repo)?
            .merge(repo)?
            .commit(repo, author)?
            .push(repo);

        match result {
            Ok(outcome) => return Ok(outcome),
            Err(e @ (SyncError::NonFastForward | SyncError::LocalMoved)) => {
                attempts += 1;
                if attempts > cfg.max_retries {
                    return Err(SyncError::TooManyRetries(attempts));
                }
                if matches!(e, SyncError::NonFastForward) {
                    let delay = backoff_delay(cfg, attempts);
                    tracing::debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "push contention, backing off");
                    std::thread::sleep(delay);
                }
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(cfg: &SyncConfig, attempt: usize) -> Duration {
    let exp = attempt.saturating_sub(1).min(16) as u32;
    let ms = cfg
        .backoff_base_ms
        .saturating_mul(1u64 << exp)
        .min(cfg.backoff_max_ms);
    Duration::from_millis(ms)
}

/// Initialize the store ref if it doesn't exist.
///
/// A reopened store keeps its ref untouched - any unpushed commits are
/// reconciled by the first sync cycle, never discarded here. For a fresh
/// store, handles the race where multiple instances init against one
/// remote:
/// - Fetch first (the remote may already have the ref)
/// - If the remote has it, point local at it
/// - If not, create an orphan commit on an empty tree and push
/// - On rejection, drop the orphan and retry (lost the race)
pub fn init_store_ref(
    repo: &Repository,
    author: &AuthorConfig,
    max_retries: usize,
) -> Result<(), SyncError> {
    if repo.refname_to_id(STORE_REF).is_ok() {
        return Ok(());
    }

    let mut retries = 0;

    loop {
        if let Ok(mut remote) = repo.find_remote(REMOTE_NAME) {
            // Offline init is fine; the first sync will reconcile.
            let mut fo = git2::FetchOptions::new();
            fo.remote_callbacks(credential_callbacks(repo));
            let _ = remote.fetch(&[FETCH_REFSPEC], Some(&mut fo), None);

            if let Ok(remote_oid) = repo.refname_to_id(REMOTE_TRACKING_REF) {
                repo.reference(STORE_REF, remote_oid, false, "trove init from remote")?;
                return Ok(());
            }
        }

        let tree = empty_tree(repo)?;
        let sig = Signature::now(&author.name, &author.email)?;
        repo.commit(
            Some(STORE_REF),
            &sig,
            &sig,
            "trove(store): init",
            &tree,
            &[],
        )
        .map_err(SyncError::Commit)?;

        let mut remote = match repo.find_remote(REMOTE_NAME) {
            Ok(r) => r,
            // Local-only store: the orphan commit is the whole init.
            Err(_) => return Ok(()),
        };

        use std::cell::RefCell;
        let push_error: RefCell<Option<String>> = RefCell::new(None);
        let push_result = {
            let mut callbacks = credential_callbacks(repo);
            callbacks.push_update_reference(|_ref_name, status| {
                if let Some(msg) = status {
                    *push_error.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut push_options = git2::PushOptions::new();
            push_options.remote_callbacks(callbacks);
            remote.push(&[PUSH_REFSPEC], Some(&mut push_options))
        };

        let rejected = match push_result {
            Err(e) if is_contention_error(&e) => true,
            Err(e) => {
                // Remote unreachable. The orphan commit is a valid local
                // store; the first sync cycle retries the push.
                tracing::warn!("init push failed, deferring to sync: {e}");
                return Ok(());
            }
            Ok(()) => match push_error.into_inner() {
                Some(err) if is_contention(&err) => true,
                Some(err) => return Err(PushRejected { message: err }.into()),
                None => false,
            },
        };

        if rejected {
            retries += 1;
            if retries > max_retries {
                return Err(SyncError::TooManyRetries(retries));
            }
            // Drop our orphan so the next pass adopts the remote's history.
            if let Ok(mut r) = repo.find_reference(STORE_REF) {
                let _ = r.delete();
            }
            continue;
        }

        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_diff_messages() {
        let diff = MergeDiff {
            added: 2,
            removed: 1,
            changed: 0,
            conflicts_resolved: 0,
        };
        assert_eq!(
            diff.to_commit_message(),
            "trove(store): merge +2 added, -1 removed"
        );

        let diff = MergeDiff {
            added: 0,
            removed: 0,
            changed: 3,
            conflicts_resolved: 2,
        };
        assert_eq!(
            diff.to_commit_message(),
            "trove(store): merge ~3 changed (2 resolved)"
        );

        let diff = MergeDiff::default();
        assert_eq!(diff.to_commit_message(), "trove(store): merge no changes");
    }

    #[test]
    fn backoff_is_bounded() {
        let cfg = SyncConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..SyncConfig::default()
        };
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&cfg, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&cfg, 10), Duration::from_millis(1_000));
    }
}
