//! Isolated worktree lifecycle and the per-repository run lock.
//!
//! A [`WorktreeSession`] is a detached `git worktree` outside the project
//! tree. Its location is derived from the repository path so that a session
//! left behind by a crashed run can be found and removed by the next one
//! ([`recover_stale_worktrees`]). [`RunLock`] keeps two runs from sharing a
//! repository's worktree at the same time.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::SyncError;
use crate::git::GitCli;

/// Directory under the system temp dir holding all session worktrees.
pub const WORKTREE_ROOT_DIR: &str = "forksync-worktrees";

/// Lock file name, created in the repository's common git directory.
pub const LOCK_FILE: &str = "forksync.lock";

const PATH_HASH_LEN: usize = 16;

/// Deterministic worktree location for the repository at `repo_workdir`.
pub fn worktree_path_for(repo_workdir: &Path) -> PathBuf {
    let temp = std::env::temp_dir();
    let temp = fs::canonicalize(&temp).unwrap_or(temp);
    worktree_path_in(&temp.join(WORKTREE_ROOT_DIR), repo_workdir)
}

/// Same as [`worktree_path_for`] with an explicit root directory.
pub fn worktree_path_in(root: &Path, repo_workdir: &Path) -> PathBuf {
    let digest = Sha256::digest(repo_workdir.to_string_lossy().as_bytes());
    let hash = hex::encode(digest);
    root.join(&hash[..PATH_HASH_LEN])
}

// ---------------------------------------------------------------------------
// Run lock
// ---------------------------------------------------------------------------

/// Exclusive per-repository run lock. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock in `common_dir`, failing fast if a live process holds it.
    /// A lock left by a dead process is removed and retaken.
    pub fn acquire(common_dir: &Path) -> Result<Self, SyncError> {
        let path = common_dir.join(LOCK_FILE);
        let lock_err = |source| SyncError::Lock {
            path: path.clone(),
            source,
        };

        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let pid = std::process::id();
                    file.write_all(pid.to_string().as_bytes())
                        .map_err(lock_err)?;
                    info!(pid, path = %path.display(), "acquired run lock");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let contents = match fs::read_to_string(&path) {
                        Ok(c) => c,
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => return Err(lock_err(e)),
                    };
                    if let Ok(pid) = contents.trim().parse::<u32>() {
                        if is_process_alive(pid) {
                            return Err(SyncError::AlreadyRunning {
                                lock_path: path.clone(),
                                pid,
                            });
                        }
                    }
                    warn!(
                        path = %path.display(),
                        holder = contents.trim(),
                        "removing stale run lock"
                    );
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(lock_err(e)),
                    }
                }
                Err(e) => return Err(lock_err(e)),
            }
        }

        Err(lock_err(std::io::Error::new(
            ErrorKind::WouldBlock,
            "lock changed hands while acquiring",
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "released run lock"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to release run lock"),
        }
    }
}

/// Check whether a process with the given PID is alive.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // Signal 0 only checks that the process exists.
        unsafe { libc::kill(pid, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One run's isolated working copy.
///
/// Call [`WorktreeSession::remove`] on every exit path. If a session is
/// dropped without it, `Drop` removes the worktree synchronously.
#[derive(Debug)]
pub struct WorktreeSession {
    path: PathBuf,
    base_repo_path: PathBuf,
    registered_at: DateTime<Utc>,
    base: GitCli,
    git: GitCli,
    removed: bool,
}

impl WorktreeSession {
    /// Check out `rev` as a detached worktree at `path`.
    pub async fn create(base: &GitCli, path: PathBuf, rev: &str) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::Worktree {
                    path: parent.to_path_buf(),
                    detail: e.to_string(),
                })?;
        }
        base.worktree_add_detached(&path, rev)
            .await
            .map_err(|e| SyncError::Worktree {
                path: path.clone(),
                detail: e.to_string(),
            })?;

        let session = Self {
            git: GitCli::new(&path),
            base: base.clone(),
            base_repo_path: base.dir().to_path_buf(),
            registered_at: Utc::now(),
            path,
            removed: false,
        };
        info!(path = %session.path.display(), rev, "worktree session started");
        Ok(session)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_repo_path(&self) -> &Path {
        &self.base_repo_path
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Client bound to the worktree directory.
    pub fn git(&self) -> &GitCli {
        &self.git
    }

    /// Unregister and delete the worktree.
    pub async fn remove(mut self) -> Result<(), SyncError> {
        self.removed = true;
        let result = self.base.worktree_remove(&self.path).await;
        if self.path.exists() {
            tokio::fs::remove_dir_all(&self.path)
                .await
                .map_err(|e| SyncError::Worktree {
                    path: self.path.clone(),
                    detail: e.to_string(),
                })?;
        }
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "worktree remove failed, pruning");
            self.base.worktree_prune().await?;
        }
        info!(
            path = %self.path.display(),
            held_for_ms = (Utc::now() - self.registered_at).num_milliseconds(),
            "worktree session removed"
        );
        Ok(())
    }
}

impl Drop for WorktreeSession {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        warn!(path = %self.path.display(), "worktree session dropped without removal, cleaning up");
        let path = self.path.to_string_lossy().to_string();
        let _ = std::process::Command::new("git")
            .args(["worktree", "remove", "--force", &path])
            .current_dir(&self.base_repo_path)
            .output();
        if self.path.exists() {
            let _ = fs::remove_dir_all(&self.path);
        }
        let _ = std::process::Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.base_repo_path)
            .output();
    }
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

/// Remove a worktree at `path` left behind by an earlier run, registered or
/// not. Returns `true` when something was cleaned up.
pub async fn recover_stale_worktrees(base: &GitCli, path: &Path) -> Result<bool, SyncError> {
    let mut recovered = false;

    for entry in base.worktree_list().await? {
        if !same_path(&entry.path, path) {
            continue;
        }
        warn!(path = %entry.path.display(), "found worktree from an interrupted run");
        if let Err(e) = base.worktree_remove(&entry.path).await {
            debug!(error = %e, "stale worktree not removable by git, deleting directly");
        }
        recovered = true;
    }

    if path.exists() {
        warn!(path = %path.display(), "deleting leftover worktree directory");
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| SyncError::Worktree {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        recovered = true;
    }

    if recovered {
        base.worktree_prune().await?;
        info!(path = %path.display(), "recovered from interrupted run");
    }
    Ok(recovered)
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
