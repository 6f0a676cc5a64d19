//! Worktree merge orchestrator.
//!
//! One run walks a fixed state machine:
//!
//! `Init → RemoteConfigured → Fetched → WorktreeCreated →
//!  MergeSucceeded | MergeConflicted → ConflictsResolved → Analyzed →
//!  Applied | Discarded → CleanedUp`
//!
//! The merge happens in a detached worktree outside the project. The live
//! checkout is only written in the `Applied` step, and only after every
//! conflict is resolved. The worktree is removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::analyzer::{AnalysisRefs, Analyzer};
use crate::config::ForkSyncConfig;
use crate::errors::{GitError, SyncError};
use crate::escalation::{escalate, ConflictPrompt};
use crate::git::{discover_repository, GitCli, MergeOutcome, RepoLayout};
use crate::models::{FileAnalysis, MergeAction, SyncCategory, SyncSummary};
use crate::overrides::OverridePolicy;
use crate::report;
use crate::squash::{SquashComposer, SquashPlan};
use crate::strategy::{categorize, resolve, resolve_all};
use crate::worktree::{recover_stale_worktrees, worktree_path_for, RunLock, WorktreeSession};

/// File in the git directory that `git commit` uses as its message template.
pub const SQUASH_MSG_FILE: &str = "SQUASH_MSG";

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Init,
    RemoteConfigured,
    Fetched,
    WorktreeCreated,
    MergeSucceeded,
    MergeConflicted,
    ConflictsResolved,
    Analyzed,
    Applied,
    Discarded,
    CleanedUp,
    Failed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::RemoteConfigured => write!(f, "remote_configured"),
            Self::Fetched => write!(f, "fetched"),
            Self::WorktreeCreated => write!(f, "worktree_created"),
            Self::MergeSucceeded => write!(f, "merge_succeeded"),
            Self::MergeConflicted => write!(f, "merge_conflicted"),
            Self::ConflictsResolved => write!(f, "conflicts_resolved"),
            Self::Analyzed => write!(f, "analyzed"),
            Self::Applied => write!(f, "applied"),
            Self::Discarded => write!(f, "discarded"),
            Self::CleanedUp => write!(f, "cleaned_up"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Receives every phase transition, e.g. to drive a spinner.
pub trait PhaseListener: Send + Sync {
    fn on_phase(&self, phase: SyncPhase);
}

impl<F> PhaseListener for F
where
    F: Fn(SyncPhase) + Send + Sync,
{
    fn on_phase(&self, phase: SyncPhase) {
        self(phase)
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub upstream_ref: String,
    pub fork_ref: String,
    pub files: Vec<FileAnalysis>,
    pub summary: SyncSummary,
    /// Paths the merge conflicted on that policy could not resolve.
    pub unresolved_conflicts: Vec<String>,
}

/// Result of a sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub upstream_ref: String,
    pub fork_ref: String,
    pub files: Vec<FileAnalysis>,
    pub summary: SyncSummary,
    /// Non-empty only when no prompt was available; nothing was applied.
    pub unresolved_conflicts: Vec<String>,
    pub manually_resolved: Vec<String>,
    /// Paths written into the live checkout and staged.
    pub applied: Vec<String>,
    /// Paths deleted from the live checkout and staged.
    pub removed: Vec<String>,
    /// Message left in `SQUASH_MSG` for the operator's commit.
    pub squash_message: Option<String>,
}

impl SyncReport {
    pub fn is_applied(&self) -> bool {
        self.unresolved_conflicts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Analyze,
    Sync,
}

struct RunOutcome {
    files: Vec<FileAnalysis>,
    summary: SyncSummary,
    unresolved: Vec<String>,
    manually_resolved: Vec<String>,
    applied: Vec<String>,
    removed: Vec<String>,
    squash_message: Option<String>,
}

enum LiveChange {
    Written,
    Removed,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs analysis and synchronization for one fork.
pub struct Orchestrator<'a> {
    config: &'a ForkSyncConfig,
    layout: RepoLayout,
    live: GitCli,
    policy: OverridePolicy,
    worktree_path: PathBuf,
    phase: Mutex<SyncPhase>,
    listener: Option<Arc<dyn PhaseListener>>,
}

impl<'a> Orchestrator<'a> {
    /// Validate `config` and locate the fork repository.
    pub fn new(config: &'a ForkSyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let layout = discover_repository(&config.fork.path)?;
        let worktree_path = worktree_path_for(&layout.workdir);
        info!(
            repo = %layout.workdir.display(),
            worktree = %worktree_path.display(),
            "orchestrator ready"
        );
        Ok(Self {
            live: GitCli::new(&layout.workdir),
            policy: OverridePolicy::from(&config.overrides),
            config,
            layout,
            worktree_path,
            phase: Mutex::new(SyncPhase::Init),
            listener: None,
        })
    }

    pub fn with_listener(mut self, listener: Arc<dyn PhaseListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Place the session worktree somewhere other than the default location.
    pub fn with_worktree_path(mut self, path: PathBuf) -> Self {
        self.worktree_path = path;
        self
    }

    pub fn worktree_path(&self) -> &Path {
        &self.worktree_path
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the run lock in the repository's shared git directory.
    async fn lock(&self) -> Result<RunLock, SyncError> {
        let common_dir = self.live.common_dir().await?;
        RunLock::acquire(&common_dir)
    }

    fn upstream_ref(&self) -> String {
        self.config.upstream.upstream_ref()
    }

    fn refs(&self) -> AnalysisRefs {
        AnalysisRefs::new(self.upstream_ref(), &self.config.fork.fork_ref)
            .with_fork_history(self.config.fork.history_ref())
    }

    fn analyzer(&self) -> Analyzer {
        Analyzer::new(
            self.live.clone(),
            self.policy.clone(),
            self.config.analysis.concurrency,
        )
    }

    // -- public operations --------------------------------------------------

    /// Dry run: merge in a worktree, classify every file, touch nothing live.
    pub async fn analyze(&self) -> Result<AnalysisReport, SyncError> {
        let outcome = self.run(RunMode::Analyze, None).await?;
        self.write_report("analyze", &outcome.files)?;
        Ok(AnalysisReport {
            upstream_ref: self.upstream_ref(),
            fork_ref: self.config.fork.fork_ref.clone(),
            files: outcome.files,
            summary: outcome.summary,
            unresolved_conflicts: outcome.unresolved,
        })
    }

    /// Merge upstream, resolve conflicts, and stage the result in the live
    /// checkout. Nothing is committed. Without a prompt, conflicts that need
    /// a human are returned instead and the live checkout is left alone.
    pub async fn sync(
        &self,
        prompt: Option<&mut dyn ConflictPrompt>,
    ) -> Result<SyncReport, SyncError> {
        let outcome = self.run(RunMode::Sync, prompt).await?;
        self.write_report("sync", &outcome.files)?;
        Ok(SyncReport {
            upstream_ref: self.upstream_ref(),
            fork_ref: self.config.fork.fork_ref.clone(),
            files: outcome.files,
            summary: outcome.summary,
            unresolved_conflicts: outcome.unresolved,
            manually_resolved: outcome.manually_resolved,
            applied: outcome.applied,
            removed: outcome.removed,
            squash_message: outcome.squash_message,
        })
    }

    /// Analyze and resolve one path against the current refs, without a
    /// worktree or fetch.
    pub async fn analyze_file(&self, path: &str) -> Result<FileAnalysis, SyncError> {
        let mut analysis = self.analyzer().analyze_file(&self.refs(), path).await?;
        analysis.merge_strategy = Some(resolve(&analysis));
        Ok(analysis)
    }

    /// Stage a squash of the upstream branch onto the live checkout and
    /// return the commit message for it.
    pub async fn squash(&self) -> Result<Option<SquashPlan>, SyncError> {
        let _lock = self.lock().await?;
        self.configure_remote().await?;
        self.fetch_upstream().await?;

        let composer = SquashComposer::from(&self.config.squash);
        let plan = composer.stage(&self.live, &self.upstream_ref()).await?;
        if let Some(plan) = &plan {
            self.write_squash_msg(&plan.message).await?;
        }
        Ok(plan)
    }

    // -- run ----------------------------------------------------------------

    async fn run(
        &self,
        mode: RunMode,
        prompt: Option<&mut dyn ConflictPrompt>,
    ) -> Result<RunOutcome, SyncError> {
        let _lock = self.lock().await?;
        self.set_phase(SyncPhase::Init);

        let session = match self.prepare().await {
            Ok(session) => session,
            Err(e) => {
                self.set_phase(SyncPhase::Failed);
                error!(error = %e, "sync preparation failed");
                return Err(e);
            }
        };

        let result = self.run_in_worktree(&session, mode, prompt).await;
        if let Err(e) = &result {
            self.set_phase(SyncPhase::Failed);
            error!(error = %e, "sync run failed");
        }

        let cleanup = session.remove().await;
        self.set_phase(SyncPhase::CleanedUp);

        match (result, cleanup) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                warn!(error = %cleanup_err, "worktree cleanup also failed");
                Err(e)
            }
        }
    }

    /// Recover, configure the remote, fetch, and create the session worktree.
    async fn prepare(&self) -> Result<WorktreeSession, SyncError> {
        self.live.version().await?;
        if recover_stale_worktrees(&self.live, &self.worktree_path).await? {
            info!("removed worktree left by an interrupted run");
        }

        self.configure_remote().await?;
        self.set_phase(SyncPhase::RemoteConfigured);

        self.fetch_upstream().await?;
        self.set_phase(SyncPhase::Fetched);

        let fork_ref = &self.config.fork.fork_ref;
        let fork_commit = self
            .live
            .resolve_ref(fork_ref)
            .await?
            .ok_or_else(|| GitError::RefNotFound(fork_ref.clone()))?;
        let history_ref = self.config.fork.history_ref();
        if self.live.resolve_ref(history_ref).await?.is_none() {
            return Err(GitError::RefNotFound(history_ref.to_string()).into());
        }

        let session =
            WorktreeSession::create(&self.live, self.worktree_path.clone(), &fork_commit).await?;
        self.set_phase(SyncPhase::WorktreeCreated);
        Ok(session)
    }

    async fn run_in_worktree(
        &self,
        session: &WorktreeSession,
        mode: RunMode,
        prompt: Option<&mut dyn ConflictPrompt>,
    ) -> Result<RunOutcome, SyncError> {
        let wt = session.git();
        let upstream_ref = self.upstream_ref();

        let conflicts = match wt
            .merge_no_commit(&upstream_ref, self.config.options.allow_unrelated_histories)
            .await?
        {
            MergeOutcome::Clean => {
                self.set_phase(SyncPhase::MergeSucceeded);
                Vec::new()
            }
            MergeOutcome::Conflicted(conflicts) => {
                self.set_phase(SyncPhase::MergeConflicted);
                conflicts
            }
        };

        let mut unresolved = self.resolve_conflicts(wt, &conflicts).await?;
        self.restore_protected(wt).await?;
        self.sweep_ignored(wt).await?;

        let mut manually_resolved = Vec::new();
        if mode == RunMode::Sync && !unresolved.is_empty() {
            if let Some(prompt) = prompt {
                let outcome = escalate(
                    wt,
                    prompt,
                    session.path(),
                    std::mem::take(&mut unresolved),
                    self.config.options.max_escalation_rounds,
                )
                .await?;
                manually_resolved = outcome.resolved;
                // Manual edits may reintroduce ignored paths.
                self.sweep_ignored(wt).await?;
            } else {
                warn!(
                    count = unresolved.len(),
                    "conflicts need manual resolution and no prompt is available"
                );
            }
        }
        if unresolved.is_empty() {
            self.set_phase(SyncPhase::ConflictsResolved);
        }

        let mut files = self.analyzer().analyze_tree(&self.refs()).await?;
        resolve_all(&mut files);
        let summary = report::summarize(&files);
        self.set_phase(SyncPhase::Analyzed);
        info!(
            total = summary.total,
            behind = summary.behind,
            diverged = summary.diverged,
            drifted = summary.drifted,
            deleted = summary.deleted,
            "merge result classified"
        );

        let mut outcome = RunOutcome {
            files,
            summary,
            unresolved,
            manually_resolved,
            applied: Vec::new(),
            removed: Vec::new(),
            squash_message: None,
        };

        if mode == RunMode::Analyze || !outcome.unresolved.is_empty() {
            self.set_phase(SyncPhase::Discarded);
            return Ok(outcome);
        }

        let (applied, removed) = self.apply(session, &outcome.files).await?;
        outcome.applied = applied;
        outcome.removed = removed;

        if !outcome.applied.is_empty() || !outcome.removed.is_empty() {
            let composer = SquashComposer::from(&self.config.squash);
            if let Some(plan) = composer
                .plan(&self.live, &self.config.fork.fork_ref, &upstream_ref)
                .await?
            {
                self.write_squash_msg(&plan.message).await?;
                outcome.squash_message = Some(plan.message);
            }
        }
        self.set_phase(SyncPhase::Applied);
        Ok(outcome)
    }

    // -- steps --------------------------------------------------------------

    async fn configure_remote(&self) -> Result<(), SyncError> {
        let remote = &self.config.upstream.remote;
        let wanted = self.config.upstream.url.as_deref();

        match (self.live.remote_url(remote).await?, wanted) {
            (None, Some(url)) => self.live.add_remote(remote, url).await?,
            (None, None) => {
                return Err(SyncError::Connectivity {
                    remote: remote.clone(),
                    detail: "remote is not configured and upstream.url is not set".into(),
                })
            }
            (Some(current), Some(url)) if current != url => {
                self.live.set_remote_url(remote, url).await?
            }
            (Some(current), _) => debug!(
                remote = remote.as_str(),
                url = current.as_str(),
                "remote already configured"
            ),
        }
        Ok(())
    }

    async fn fetch_upstream(&self) -> Result<(), SyncError> {
        let remote = &self.config.upstream.remote;
        self.live
            .fetch(remote)
            .await
            .map_err(|e| SyncError::Connectivity {
                remote: remote.clone(),
                detail: match e {
                    GitError::CommandFailed { stderr, .. } => stderr,
                    other => other.to_string(),
                },
            })?;

        let upstream_ref = self.upstream_ref();
        if self.live.resolve_ref(&upstream_ref).await?.is_none() {
            return Err(SyncError::Connectivity {
                remote: remote.clone(),
                detail: format!(
                    "branch '{}' not found on remote",
                    self.config.upstream.branch
                ),
            });
        }
        Ok(())
    }

    /// Settle conflicts that override policy decides. Returns the rest.
    #[instrument(skip_all, fields(conflicts = conflicts.len()))]
    async fn resolve_conflicts(
        &self,
        wt: &GitCli,
        conflicts: &[String],
    ) -> Result<Vec<String>, SyncError> {
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }
        let unmerged = wt.unmerged_entries().await?;

        let mut drop_paths = Vec::new();
        let mut ours = Vec::new();
        let mut ours_deleted = Vec::new();
        let mut unresolved = Vec::new();

        for path in conflicts {
            let status = self.policy.classify(path);
            if status.is_ignored() {
                drop_paths.push(path.clone());
            } else if status.is_protected() {
                let has_ours = unmerged.get(path).is_some_and(|stages| stages.contains(&2));
                if has_ours {
                    ours.push(path.clone());
                } else {
                    ours_deleted.push(path.clone());
                }
            } else {
                unresolved.push(path.clone());
            }
        }

        wt.remove(&drop_paths).await?;
        wt.checkout_ours(&ours).await?;
        wt.add(&ours).await?;
        wt.remove(&ours_deleted).await?;

        info!(
            ignored = drop_paths.len(),
            kept_fork = ours.len() + ours_deleted.len(),
            unresolved = unresolved.len(),
            "conflicts resolved by policy"
        );
        Ok(unresolved)
    }

    /// Put every pinned or customized path back to the fork's version,
    /// including upstream edits and deletions that merged cleanly.
    async fn restore_protected(&self, wt: &GitCli) -> Result<(), SyncError> {
        let fork_tree = wt.ls_tree("HEAD").await?;
        let merged = wt.tracked_files().await?;
        let protected = |p: &&String| self.policy.classify(p).is_protected();

        let restore: Vec<String> = fork_tree.keys().filter(protected).cloned().collect();
        let drop_paths: Vec<String> = merged
            .iter()
            .filter(protected)
            .filter(|p| !fork_tree.contains_key(p.as_str()))
            .cloned()
            .collect();

        wt.checkout_from("HEAD", &restore).await?;
        wt.remove(&drop_paths).await?;
        if !restore.is_empty() || !drop_paths.is_empty() {
            info!(
                restored = restore.len(),
                dropped = drop_paths.len(),
                "protected paths kept at fork version"
            );
        }
        Ok(())
    }

    /// Delete every ignored path from the merge result.
    async fn sweep_ignored(&self, wt: &GitCli) -> Result<(), SyncError> {
        let ignored: Vec<String> = wt
            .tracked_files()
            .await?
            .into_iter()
            .filter(|p| self.policy.is_ignored(p))
            .collect();
        if !ignored.is_empty() {
            wt.remove(&ignored).await?;
            info!(count = ignored.len(), "removed ignored files from merge result");
        }
        Ok(())
    }

    /// Copy changed files from the worktree into the live checkout and stage
    /// them.
    async fn apply(
        &self,
        session: &WorktreeSession,
        files: &[FileAnalysis],
    ) -> Result<(Vec<String>, Vec<String>), SyncError> {
        let mut applied = Vec::new();
        let mut removed = Vec::new();

        for analysis in files {
            let category = categorize(analysis);
            if !category.implies_change() {
                continue;
            }
            if analysis.override_status.is_protected()
                && analysis.action() == Some(MergeAction::KeepFork)
            {
                continue;
            }
            let rel = analysis.file_path.as_str();
            match self.apply_file(session, rel, category).await {
                Ok(Some(LiveChange::Written)) => applied.push(rel.to_string()),
                Ok(Some(LiveChange::Removed)) => removed.push(rel.to_string()),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        path = rel,
                        written = ?applied,
                        removed = ?removed,
                        "apply stopped partway, live checkout has unstaged changes"
                    );
                    return Err(e);
                }
            }
        }

        self.live.add(&applied).await?;
        self.live.remove(&removed).await?;
        info!(
            applied = applied.len(),
            removed = removed.len(),
            "merge result staged in live checkout"
        );
        Ok((applied, removed))
    }

    async fn apply_file(
        &self,
        session: &WorktreeSession,
        rel: &str,
        category: SyncCategory,
    ) -> Result<Option<LiveChange>, SyncError> {
        let source = session.path().join(rel);
        let target = self.layout.workdir.join(rel);
        let apply_err = |source: std::io::Error| SyncError::Apply {
            path: target.clone(),
            source,
        };

        let source_exists = tokio::fs::try_exists(&source).await.map_err(apply_err)?;
        if category == SyncCategory::Deleted || !source_exists {
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(apply_err(e)),
            }
            debug!(path = rel, "removed from live checkout");
            return Ok(Some(LiveChange::Removed));
        }

        let new_contents = tokio::fs::read(&source).await.map_err(apply_err)?;
        if let Ok(current) = tokio::fs::read(&target).await {
            if current == new_contents {
                return Ok(None);
            }
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(apply_err)?;
        }
        tokio::fs::write(&target, &new_contents)
            .await
            .map_err(apply_err)?;
        debug!(path = rel, category = %category, "copied into live checkout");
        Ok(Some(LiveChange::Written))
    }

    async fn write_squash_msg(&self, message: &str) -> Result<(), SyncError> {
        let path = self.layout.git_dir.join(SQUASH_MSG_FILE);
        tokio::fs::write(&path, message)
            .await
            .map_err(|source| SyncError::Apply {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "wrote squash message");
        Ok(())
    }

    fn write_report(&self, title: &str, files: &[FileAnalysis]) -> Result<(), SyncError> {
        let Some(log_file) = &self.config.report.log_file else {
            return Ok(());
        };
        let path = if log_file.is_absolute() {
            log_file.clone()
        } else {
            self.layout.workdir.join(log_file)
        };
        report::write_log(&path, title, files)
    }

    fn set_phase(&self, new_phase: SyncPhase) {
        {
            let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
            info!(from = %*phase, to = %new_phase, "state transition");
            *phase = new_phase;
        }
        if let Some(listener) = &self.listener {
            listener.on_phase(new_phase);
        }
    }
}
