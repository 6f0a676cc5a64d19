//! Asynchronous git CLI client.
//!
//! All version-control access goes through the `git` binary via
//! `tokio::process`. Read-only queries run concurrently; commands that mutate
//! the index, refs, or working tree of a directory are serialized through a
//! per-client lock, so one client must be used per working directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::parser::{
    parse_change_log, parse_change_summaries, parse_ls_tree, parse_name_list, parse_rev_count,
    parse_unmerged, parse_worktree_list, ChangeSummary, WorktreeEntry, CHANGE_LOG_FORMAT,
    CHANGE_SUMMARY_FORMAT,
};
use crate::errors::GitError;
use crate::models::ChangeEntry;

/// Where a repository keeps its working tree and git data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    /// Root of the working tree.
    pub workdir: PathBuf,
    /// This checkout's own git directory.
    pub git_dir: PathBuf,
}

/// Locate the repository containing `path`.
pub fn discover_repository(path: &Path) -> Result<RepoLayout, GitError> {
    let repo = git2::Repository::discover(path).map_err(|e| GitError::CommandFailed {
        operation: "discover".into(),
        dir: path.to_path_buf(),
        exit_code: -1,
        stderr: e.message().to_string(),
    })?;
    let workdir = repo
        .workdir()
        .ok_or_else(|| GitError::CommandFailed {
            operation: "discover".into(),
            dir: path.to_path_buf(),
            exit_code: -1,
            stderr: "bare repositories have no working tree".into(),
        })?
        .to_path_buf();
    let layout = RepoLayout {
        workdir: canonical(&workdir),
        git_dir: canonical(repo.path()),
    };
    debug!(
        workdir = %layout.workdir.display(),
        git_dir = %layout.git_dir.display(),
        "discovered repository"
    );
    Ok(layout)
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Result of `git merge --no-commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean,
    Conflicted(Vec<String>),
}

/// Asynchronous git client bound to one working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl GitCli {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let client = Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        };
        debug!(dir = %client.dir.display(), "created GitCli");
        client
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Verify that the `git` binary can be executed.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn version(&self) -> Result<String, GitError> {
        let out = self.run("version", &["version"]).await?;
        Ok(out.trim().to_string())
    }

    /// Git directory shared by every worktree of this repository.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn common_dir(&self) -> Result<PathBuf, GitError> {
        let out = self
            .run("rev-parse", &["rev-parse", "--git-common-dir"])
            .await?;
        let path = PathBuf::from(out.trim());
        let path = if path.is_absolute() {
            path
        } else {
            self.dir.join(path)
        };
        Ok(canonical(&path))
    }

    // -- refs ---------------------------------------------------------------

    /// Resolve `rev` to a commit id. `None` when it does not exist.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn resolve_ref(&self, rev: &str) -> Result<Option<String>, GitError> {
        let revision = format!("{}^{{commit}}", rev);
        let output = self
            .output("rev-parse", &["rev-parse", "--verify", "--quiet", &revision])
            .await?;
        if output.status.success() {
            return Ok(Some(stdout(&output).trim().to_string()));
        }
        if output.status.code() == Some(1) {
            debug!(rev, "ref does not resolve");
            return Ok(None);
        }
        Err(self.failure("rev-parse", &output))
    }

    /// Most recent common ancestor. `None` when the histories are unrelated.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, GitError> {
        let output = self.output("merge-base", &["merge-base", a, b]).await?;
        if output.status.success() {
            return Ok(Some(stdout(&output).trim().to_string()));
        }
        if output.status.code() == Some(1) {
            debug!(a, b, "no merge base");
            return Ok(None);
        }
        Err(self.failure("merge-base", &output))
    }

    /// Blob id of `path` at `rev`. `None` when the path is absent there.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn blob_hash(&self, rev: &str, path: &str) -> Result<Option<String>, GitError> {
        let revision = format!("{}:{}", rev, path);
        let output = self
            .output("rev-parse", &["rev-parse", "--verify", "--quiet", &revision])
            .await?;
        if output.status.success() {
            return Ok(Some(stdout(&output).trim().to_string()));
        }
        if matches!(output.status.code(), Some(1) | Some(128)) {
            return Ok(None);
        }
        Err(self.failure("rev-parse", &output))
    }

    // -- trees and history --------------------------------------------------

    /// Every blob reachable from `rev`, as `path -> blob id`.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn ls_tree(&self, rev: &str) -> Result<BTreeMap<String, String>, GitError> {
        let out = self
            .run("ls-tree", &["ls-tree", "-r", "-z", "--full-tree", rev])
            .await?;
        let tree = parse_ls_tree(&out)?;
        debug!(rev, count = tree.len(), "listed tree");
        Ok(tree)
    }

    /// Paths whose content differs between `from` and `to`.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn changed_paths(&self, from: &str, to: &str) -> Result<BTreeSet<String>, GitError> {
        let out = self
            .run(
                "diff",
                &["diff", "--name-only", "-z", "--no-renames", from, to, "--"],
            )
            .await?;
        Ok(parse_name_list(&out))
    }

    /// Changes touching `path` reachable from `rev`, newest first.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn file_history(&self, rev: &str, path: &str) -> Result<Vec<ChangeEntry>, GitError> {
        let out = self
            .run("log", &["log", CHANGE_LOG_FORMAT, rev, "--", path])
            .await?;
        parse_change_log(&out)
    }

    /// Subjects of the newest `limit` changes in `base..tip`, newest first.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn change_summaries(
        &self,
        base: &str,
        tip: &str,
        limit: usize,
    ) -> Result<Vec<ChangeSummary>, GitError> {
        let range = format!("{}..{}", base, tip);
        let max_count = format!("--max-count={}", limit);
        let out = self
            .run("log", &["log", CHANGE_SUMMARY_FORMAT, &max_count, &range])
            .await?;
        parse_change_summaries(&out)
    }

    /// Number of changes in `base..tip`.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn rev_count(&self, base: &str, tip: &str) -> Result<usize, GitError> {
        let range = format!("{}..{}", base, tip);
        let out = self
            .run("rev-list", &["rev-list", "--count", &range])
            .await?;
        parse_rev_count(&out)
    }

    // -- index state --------------------------------------------------------

    /// Paths left unmerged by the last merge.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn conflicted_paths(&self) -> Result<Vec<String>, GitError> {
        let out = self
            .run(
                "diff",
                &["diff", "--name-only", "-z", "--diff-filter=U"],
            )
            .await?;
        Ok(parse_name_list(&out).into_iter().collect())
    }

    /// Unmerged index entries with the stages present for each path.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn unmerged_entries(&self) -> Result<BTreeMap<String, BTreeSet<u8>>, GitError> {
        let out = self.run("ls-files", &["ls-files", "-u", "-z"]).await?;
        parse_unmerged(&out)
    }

    /// Every path tracked in the index.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn tracked_files(&self) -> Result<BTreeSet<String>, GitError> {
        let out = self.run("ls-files", &["ls-files", "-z"]).await?;
        Ok(parse_name_list(&out))
    }

    // -- remotes ------------------------------------------------------------

    /// URL of remote `name`. `None` when no such remote is configured.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn remote_url(&self, name: &str) -> Result<Option<String>, GitError> {
        let output = self
            .output("remote", &["remote", "get-url", name])
            .await?;
        if output.status.success() {
            return Ok(Some(stdout(&output).trim().to_string()));
        }
        if output.status.code() == Some(2) {
            return Ok(None);
        }
        Err(self.failure("remote", &output))
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn add_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.run_locked("remote", &["remote", "add", name, url])
            .await?;
        info!(remote = name, url, "added remote");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn set_remote_url(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.run_locked("remote", &["remote", "set-url", name, url])
            .await?;
        info!(remote = name, url, "updated remote url");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn fetch(&self, remote: &str) -> Result<(), GitError> {
        self.run_locked("fetch", &["fetch", "--quiet", "--no-tags", remote])
            .await?;
        info!(remote, "fetch completed");
        Ok(())
    }

    // -- worktrees ----------------------------------------------------------

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn worktree_list(&self) -> Result<Vec<WorktreeEntry>, GitError> {
        let out = self
            .run("worktree", &["worktree", "list", "--porcelain"])
            .await?;
        Ok(parse_worktree_list(&out))
    }

    /// Check out `rev` into a new detached worktree at `path`.
    #[instrument(skip(self, path), fields(dir = %self.dir.display(), path = %path.display()))]
    pub async fn worktree_add_detached(&self, path: &Path, rev: &str) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        self.run_locked(
            "worktree",
            &["worktree", "add", "--detach", "--quiet", &path_str, rev],
        )
        .await?;
        info!(rev, "worktree created");
        Ok(())
    }

    #[instrument(skip(self, path), fields(dir = %self.dir.display(), path = %path.display()))]
    pub async fn worktree_remove(&self, path: &Path) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        self.run_locked("worktree", &["worktree", "remove", "--force", &path_str])
            .await?;
        info!("worktree removed");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn worktree_prune(&self) -> Result<(), GitError> {
        self.run_locked("worktree", &["worktree", "prune"]).await?;
        Ok(())
    }

    // -- merge and staging --------------------------------------------------

    /// Merge `rev` without committing. Conflicts are an outcome, not an error.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn merge_no_commit(
        &self,
        rev: &str,
        allow_unrelated_histories: bool,
    ) -> Result<MergeOutcome, GitError> {
        let mut args = vec!["merge", "--no-commit", "--no-ff"];
        if allow_unrelated_histories {
            args.push("--allow-unrelated-histories");
        }
        args.push(rev);

        let _guard = self.write_lock.lock().await;
        let output = self.output("merge", &args).await?;
        if output.status.success() {
            info!(rev, "merge applied cleanly");
            return Ok(MergeOutcome::Clean);
        }
        let conflicts = self.conflicted_paths().await?;
        if conflicts.is_empty() {
            return Err(self.failure("merge", &output));
        }
        info!(rev, count = conflicts.len(), "merge stopped with conflicts");
        Ok(MergeOutcome::Conflicted(conflicts))
    }

    /// Stage a squash of `rev` onto the current branch.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn merge_squash(&self, rev: &str) -> Result<(), GitError> {
        self.run_locked("merge", &["merge", "--squash", "--quiet", rev])
            .await?;
        info!(rev, "squash staged");
        Ok(())
    }

    /// Take our side of each path during a merge.
    pub async fn checkout_ours(&self, paths: &[String]) -> Result<(), GitError> {
        self.with_paths("checkout", &["checkout", "--ours", "--"], paths)
            .await
    }

    /// Replace each path in index and working tree with its content at `rev`.
    pub async fn checkout_from(&self, rev: &str, paths: &[String]) -> Result<(), GitError> {
        self.with_paths("checkout", &["checkout", rev, "--"], paths)
            .await
    }

    pub async fn add(&self, paths: &[String]) -> Result<(), GitError> {
        self.with_paths("add", &["add", "--"], paths).await
    }

    /// Remove paths from index and working tree.
    pub async fn remove(&self, paths: &[String]) -> Result<(), GitError> {
        self.with_paths(
            "rm",
            &["rm", "-q", "-f", "--ignore-unmatch", "--"],
            paths,
        )
        .await
    }

    async fn with_paths(
        &self,
        operation: &str,
        prefix: &[&str],
        paths: &[String],
    ) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args: Vec<&str> = prefix.to_vec();
        args.extend(paths.iter().map(String::as_str));
        self.run_locked(operation, &args).await?;
        debug!(operation, count = paths.len(), "updated paths");
        Ok(())
    }

    // -- process plumbing ---------------------------------------------------

    async fn run_locked(&self, operation: &str, args: &[&str]) -> Result<String, GitError> {
        let _guard = self.write_lock.lock().await;
        self.run(operation, args).await
    }

    async fn run(&self, operation: &str, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(operation, args).await?;
        if !output.status.success() {
            return Err(self.failure(operation, &output));
        }
        Ok(stdout(&output))
    }

    async fn output(&self, operation: &str, args: &[&str]) -> Result<Output, GitError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_MERGE_AUTOEDIT", "no")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            cmd = ?format!("git {}", args.join(" ")),
            dir = %self.dir.display(),
            "running git command"
        );
        cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound && self.dir.is_dir() {
                GitError::BinaryNotFound("git".into())
            } else {
                GitError::Io {
                    operation: operation.into(),
                    path: self.dir.clone(),
                    source: e,
                }
            }
        })
    }

    fn failure(&self, operation: &str, output: &Output) -> GitError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code().unwrap_or(-1);
        warn!(operation, exit_code, %stderr, dir = %self.dir.display(), "git command failed");
        GitError::CommandFailed {
            operation: operation.into(),
            dir: self.dir.clone(),
            exit_code,
            stderr,
        }
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}
