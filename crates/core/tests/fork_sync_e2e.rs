//! End-to-end tests for fork synchronization.
//!
//! These tests drive the real `Orchestrator` against throwaway repositories:
//! - a "template" repository playing upstream
//! - a "fork" cloned from it, with its own commits on top
//!
//! No network I/O: the upstream remote is a local path.
//!
//! Tests skip gracefully if `git` is not installed.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use forksync_core::config::ForkSyncConfig;
use forksync_core::escalation::{ConflictPrompt, Decision, EscalationRequest};
use forksync_core::models::{BlobStatus, CommitStatus, MergeAction, SyncCategory};
use forksync_core::orchestrator::{Orchestrator, SQUASH_MSG_FILE};
use forksync_core::strategy::categorize;
use forksync_core::worktree::{RunLock, LOCK_FILE};
use forksync_core::SyncError;

// ===========================================================================
// Helpers
// ===========================================================================

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.name", "Fork Tester"]);
    git(dir, &["config", "user.email", "tester@example.com"]);
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn commit_all(dir: &Path, message: &str) {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", message]);
}

fn read(dir: &Path, rel: &str) -> String {
    std::fs::read_to_string(dir.join(rel)).unwrap()
}

/// A template repository and a fork cloned from it, each with commits made
/// after the fork was created.
struct Fixture {
    tmp: TempDir,
    template: PathBuf,
    fork: PathBuf,
}

impl Fixture {
    /// With `manual_conflict`, `m.txt` is edited on both sides without any
    /// override, so the merge needs a human.
    fn new(manual_conflict: bool) -> Self {
        let tmp = TempDir::new().unwrap();
        let template = tmp.path().join("template");
        std::fs::create_dir(&template).unwrap();
        git(&template, &["init", "-q", "-b", "main"]);
        configure_identity(&template);

        write(&template, "README.md", "hello\n");
        write(&template, "b.txt", "b base\n");
        write(&template, "w.txt", "w base\n");
        write(&template, "m.txt", "m base\n");
        write(&template, "z.lock", "z base\n");
        commit_all(&template, "Initial template");

        let fork = tmp.path().join("fork");
        git(
            tmp.path(),
            &["clone", "-q", template.to_str().unwrap(), fork.to_str().unwrap()],
        );
        configure_identity(&fork);

        write(&fork, "w.txt", "w fork\n");
        write(&fork, "z.lock", "z fork\n");
        if manual_conflict {
            write(&fork, "m.txt", "m fork\n");
        }
        commit_all(&fork, "Customize fork");

        write(&template, "b.txt", "b upstream\n");
        write(&template, "w.txt", "w upstream\n");
        write(&template, "z.lock", "z upstream\n");
        write(&template, "y.txt", "new upstream file\n");
        write(&template, "docs/gen.md", "generated\n");
        if manual_conflict {
            write(&template, "m.txt", "m upstream\n");
        }
        commit_all(&template, "Upstream improvements");

        Self {
            tmp,
            template,
            fork,
        }
    }

    fn config(&self) -> ForkSyncConfig {
        let mut config = ForkSyncConfig::default();
        config.upstream.url = Some(self.template.to_string_lossy().to_string());
        config.fork.path = self.fork.clone();
        config.overrides.ignored = vec!["z.lock".into(), "docs/**".into()];
        config.overrides.pinned = vec!["w.txt".into()];
        config
    }

    fn worktree_path(&self) -> PathBuf {
        self.tmp.path().join("worktrees").join("session")
    }

    fn orchestrator<'a>(&self, config: &'a ForkSyncConfig) -> Orchestrator<'a> {
        Orchestrator::new(config)
            .expect("orchestrator")
            .with_worktree_path(self.worktree_path())
    }

    fn registered_worktrees(&self) -> usize {
        let repo = git2::Repository::open(&self.fork).unwrap();
        repo.worktrees().unwrap().len()
    }
}

/// Writes a resolution into the worktree and stages it.
struct ResolvingPrompt {
    calls: u32,
}

impl ConflictPrompt for ResolvingPrompt {
    fn confirm_resolution(&mut self, request: &EscalationRequest<'_>) -> Decision {
        self.calls += 1;
        for path in request.remaining {
            write(request.worktree, path, "m resolved\n");
            git(request.worktree, &["add", path.as_str()]);
        }
        Decision::Resolved
    }
}

struct AbortingPrompt;

impl ConflictPrompt for AbortingPrompt {
    fn confirm_resolution(&mut self, _request: &EscalationRequest<'_>) -> Decision {
        Decision::Abort
    }
}

// ===========================================================================
// Analysis
// ===========================================================================

#[tokio::test]
async fn test_analyze_classifies_every_file() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    let config = fx.config();
    let report = fx.orchestrator(&config).analyze().await.expect("analyze failed");

    let file = |p: &str| {
        report
            .files
            .iter()
            .find(|f| f.file_path == p)
            .unwrap_or_else(|| panic!("{p} not analyzed"))
    };

    let readme = file("README.md");
    assert_eq!(readme.blob_status, BlobStatus::Identical);
    assert_eq!(readme.status(), Some(CommitStatus::UpToDate));
    assert_eq!(readme.action(), Some(MergeAction::KeepFork));

    let behind = file("b.txt");
    assert_eq!(behind.status(), Some(CommitStatus::Behind));
    assert_eq!(behind.action(), Some(MergeAction::KeepUpstream));
    assert_eq!(categorize(behind), SyncCategory::Behind);

    let new_file = file("y.txt");
    assert!(new_file.missing_in_fork());
    assert_eq!(new_file.action(), Some(MergeAction::KeepUpstream));
    assert!(new_file.merge_strategy.as_ref().unwrap().reason.contains("new file"));

    let ignored = file("z.lock");
    assert_eq!(ignored.blob_status, BlobStatus::Different);
    assert_eq!(ignored.action(), Some(MergeAction::SkipUpstream));
    assert_eq!(file("docs/gen.md").action(), Some(MergeAction::SkipUpstream));

    let pinned = file("w.txt");
    assert_eq!(pinned.status(), Some(CommitStatus::Diverged));
    assert_eq!(pinned.action(), Some(MergeAction::KeepFork));
    assert_eq!(categorize(pinned), SyncCategory::Pinned);

    assert_eq!(report.summary.total, report.files.len());
    assert!(report.unresolved_conflicts.is_empty());

    // Dry run leaves the live checkout and worktree registry untouched.
    assert_eq!(read(&fx.fork, "b.txt"), "b base\n");
    assert!(!fx.fork.join("y.txt").exists());
    assert!(!fx.worktree_path().exists());
    assert_eq!(fx.registered_worktrees(), 0);
}

#[tokio::test]
async fn test_analyze_is_idempotent() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(true);
    let config = fx.config();
    let orchestrator = fx.orchestrator(&config);

    let first = orchestrator.analyze().await.unwrap();
    let second = orchestrator.analyze().await.unwrap();
    assert_eq!(first.files, second.files);
    assert_eq!(first.summary, second.summary);
    assert_eq!(first.unresolved_conflicts, second.unresolved_conflicts);
}

#[tokio::test]
async fn test_analyze_reports_manual_conflict() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(true);
    let config = fx.config();
    let report = fx.orchestrator(&config).analyze().await.unwrap();

    let m = report.files.iter().find(|f| f.file_path == "m.txt").unwrap();
    assert_eq!(m.status(), Some(CommitStatus::Diverged));
    assert_eq!(m.action(), Some(MergeAction::Manual));
    assert_eq!(report.unresolved_conflicts, vec!["m.txt".to_string()]);
    // Pinned and ignored conflicts never reach the operator.
    assert!(!report.unresolved_conflicts.contains(&"w.txt".to_string()));
    assert!(!report.unresolved_conflicts.contains(&"z.lock".to_string()));
}

#[tokio::test]
async fn test_analyze_file_single_path() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    let config = fx.config();
    let orchestrator = fx.orchestrator(&config);
    // Populate upstream/main first.
    orchestrator.analyze().await.unwrap();

    let y = orchestrator.analyze_file("y.txt").await.unwrap();
    assert_eq!(y.action(), Some(MergeAction::KeepUpstream));
    let readme = orchestrator.analyze_file("README.md").await.unwrap();
    assert_eq!(readme.blob_status, BlobStatus::Identical);
}

#[tokio::test]
async fn test_report_log_written() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    let mut config = fx.config();
    config.report.log_file = Some(fx.tmp.path().join("forksync.log"));
    fx.orchestrator(&config).analyze().await.unwrap();

    let log = std::fs::read_to_string(fx.tmp.path().join("forksync.log")).unwrap();
    let rows: Vec<&str> = log.lines().filter(|l| !l.starts_with('#') && !l.is_empty()).collect();
    assert!(rows[0].starts_with("behind"));
    assert!(rows.last().unwrap().starts_with("identical"));
}

// ===========================================================================
// Sync
// ===========================================================================

#[tokio::test]
async fn test_sync_stages_upstream_changes() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    let config = fx.config();
    let head_before = git(&fx.fork, &["rev-parse", "HEAD"]);

    let report = fx.orchestrator(&config).sync(None).await.expect("sync failed");
    assert!(report.is_applied());
    assert!(report.applied.contains(&"b.txt".to_string()));
    assert!(report.applied.contains(&"y.txt".to_string()));

    // Upstream changes landed in the live checkout.
    assert_eq!(read(&fx.fork, "b.txt"), "b upstream\n");
    assert_eq!(read(&fx.fork, "y.txt"), "new upstream file\n");
    // Pinned and ignored files kept the fork's content.
    assert_eq!(read(&fx.fork, "w.txt"), "w fork\n");
    assert_eq!(read(&fx.fork, "z.lock"), "z fork\n");
    // The ignored upstream addition was swept from the merge result.
    assert!(!fx.fork.join("docs/gen.md").exists());

    // Staged, not committed.
    let repo = git2::Repository::open(&fx.fork).unwrap();
    let index = repo.index().unwrap();
    assert!(index.get_path(Path::new("y.txt"), 0).is_some());
    assert_eq!(git(&fx.fork, &["rev-parse", "HEAD"]), head_before);

    let squash_msg = std::fs::read_to_string(fx.fork.join(".git").join(SQUASH_MSG_FILE)).unwrap();
    assert!(squash_msg.starts_with("Sync 1 change from upstream/main"));
    assert!(squash_msg.contains("Upstream improvements"));
    assert_eq!(report.squash_message.as_deref(), Some(squash_msg.as_str()));

    assert!(!fx.worktree_path().exists());
    assert_eq!(fx.registered_worktrees(), 0);
    assert!(!fx.fork.join(".git").join(LOCK_FILE).exists());
}

#[tokio::test]
async fn test_sync_keeps_protected_files_that_merge_cleanly() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    write(&fx.template, "README.md", "upstream readme\n");
    git(&fx.template, &["rm", "-q", "m.txt"]);
    commit_all(&fx.template, "Rewrite readme, drop m.txt");

    let mut config = fx.config();
    config.overrides.pinned = vec![
        "w.txt".into(),
        "README.md".into(),
        "m.txt".into(),
        "y.txt".into(),
    ];
    config.overrides.customized = vec!["b.txt".into()];
    let report = fx.orchestrator(&config).sync(None).await.expect("sync failed");

    let file = |p: &str| report.files.iter().find(|f| f.file_path == p).unwrap();
    let readme = file("README.md");
    assert_eq!(readme.status(), Some(CommitStatus::Behind));
    assert_eq!(readme.action(), Some(MergeAction::KeepFork));
    assert_eq!(categorize(readme), SyncCategory::Pinned);
    assert_eq!(file("b.txt").action(), Some(MergeAction::KeepFork));

    // Upstream edits, deletions and additions of protected paths stay out.
    assert_eq!(read(&fx.fork, "README.md"), "hello\n");
    assert_eq!(read(&fx.fork, "b.txt"), "b base\n");
    assert_eq!(read(&fx.fork, "m.txt"), "m base\n");
    assert!(!fx.fork.join("y.txt").exists());
    for path in ["README.md", "b.txt", "m.txt", "y.txt", "w.txt"] {
        assert!(!report.applied.contains(&path.to_string()), "{path} applied");
        assert!(!report.removed.contains(&path.to_string()), "{path} removed");
    }
    assert_eq!(git(&fx.fork, &["status", "--porcelain"]), "");
    assert!(!fx.worktree_path().exists());
}

#[tokio::test]
async fn test_sync_propagates_deletions_and_keeps_drift() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    git(&fx.fork, &["rm", "-q", "m.txt"]);
    write(&fx.fork, "README.md", "readme fork\n");
    commit_all(&fx.fork, "Drop m.txt, local readme");
    git(&fx.template, &["rm", "-q", "b.txt"]);
    commit_all(&fx.template, "Drop b.txt");

    let config = fx.config();
    let orchestrator = fx.orchestrator(&config);

    let analysis = orchestrator.analyze().await.unwrap();
    let file = |p: &str| analysis.files.iter().find(|f| f.file_path == p).unwrap();

    let upstream_deleted = file("b.txt");
    assert_eq!(upstream_deleted.status(), Some(CommitStatus::Behind));
    assert_eq!(upstream_deleted.action(), Some(MergeAction::KeepUpstream));
    assert!(upstream_deleted
        .merge_strategy
        .as_ref()
        .unwrap()
        .reason
        .contains("deleted upstream"));
    assert_eq!(categorize(upstream_deleted), SyncCategory::Deleted);

    let fork_deleted = file("m.txt");
    assert_eq!(fork_deleted.status(), Some(CommitStatus::Ahead));
    assert_eq!(fork_deleted.action(), Some(MergeAction::RemoveFromFork));
    assert_eq!(categorize(fork_deleted), SyncCategory::Deleted);

    let drifted = file("README.md");
    assert_eq!(drifted.status(), Some(CommitStatus::Ahead));
    assert_eq!(drifted.action(), Some(MergeAction::KeepFork));
    assert_eq!(categorize(drifted), SyncCategory::Drifted);
    assert!(analysis.summary.drifted >= 1);
    assert!(analysis.summary.deleted >= 2);

    let report = orchestrator.sync(None).await.expect("sync failed");
    assert!(report.removed.contains(&"b.txt".to_string()));
    assert!(!fx.fork.join("b.txt").exists());
    assert!(!fx.fork.join("m.txt").exists());
    assert_eq!(read(&fx.fork, "README.md"), "readme fork\n");
    assert!(!report.applied.contains(&"README.md".to_string()));
}

#[tokio::test]
async fn test_sync_apply_failure_stages_nothing() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    // An untracked directory where upstream adds a file blocks the write.
    std::fs::create_dir_all(fx.fork.join("y.txt").join("local")).unwrap();
    let config = fx.config();

    let err = fx.orchestrator(&config).sync(None).await.unwrap_err();
    match err {
        SyncError::Apply { path, .. } => assert!(path.ends_with("y.txt")),
        other => panic!("expected apply error, got {other}"),
    }
    assert_eq!(git(&fx.fork, &["diff", "--cached", "--name-only"]), "");
    assert!(!fx.fork.join(".git").join(SQUASH_MSG_FILE).exists());
    assert!(!fx.worktree_path().exists());
    assert_eq!(fx.registered_worktrees(), 0);
}

#[tokio::test]
async fn test_sync_without_prompt_leaves_live_untouched() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(true);
    let config = fx.config();
    let report = fx.orchestrator(&config).sync(None).await.unwrap();

    assert!(!report.is_applied());
    assert_eq!(report.unresolved_conflicts, vec!["m.txt".to_string()]);
    assert!(report.applied.is_empty());
    assert_eq!(read(&fx.fork, "b.txt"), "b base\n");
    assert!(!fx.fork.join("y.txt").exists());
    assert_eq!(fx.registered_worktrees(), 0);
}

#[tokio::test]
async fn test_sync_with_manual_resolution() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(true);
    let config = fx.config();
    let mut prompt = ResolvingPrompt { calls: 0 };
    let report = fx
        .orchestrator(&config)
        .sync(Some(&mut prompt))
        .await
        .expect("sync failed");

    assert_eq!(prompt.calls, 1);
    assert!(report.is_applied());
    assert_eq!(report.manually_resolved, vec!["m.txt".to_string()]);
    assert_eq!(read(&fx.fork, "m.txt"), "m resolved\n");
    assert_eq!(read(&fx.fork, "b.txt"), "b upstream\n");
}

#[tokio::test]
async fn test_sync_abort_still_cleans_up() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(true);
    let config = fx.config();
    let err = fx
        .orchestrator(&config)
        .sync(Some(&mut AbortingPrompt))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ManualResolutionAborted { remaining: 1 }));
    assert!(!fx.worktree_path().exists());
    assert_eq!(fx.registered_worktrees(), 0);
    assert_eq!(read(&fx.fork, "b.txt"), "b base\n");
    assert!(!fx.fork.join(".git").join(LOCK_FILE).exists());
}

// ===========================================================================
// Recovery, locking, connectivity
// ===========================================================================

#[tokio::test]
async fn test_crash_recovery_removes_leftover_worktree() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    let config = fx.config();

    // Simulate a run that died after registering its worktree.
    let leftover = fx.worktree_path();
    std::fs::create_dir_all(leftover.parent().unwrap()).unwrap();
    git(
        &fx.fork,
        &["worktree", "add", "--detach", "-q", leftover.to_str().unwrap(), "HEAD"],
    );
    assert_eq!(fx.registered_worktrees(), 1);

    fx.orchestrator(&config)
        .analyze()
        .await
        .expect("analyze should recover");

    assert!(!leftover.exists());
    assert_eq!(fx.registered_worktrees(), 0);
}

#[tokio::test]
async fn test_concurrent_run_fails_fast() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    let config = fx.config();
    let _held = RunLock::acquire(&fx.fork.join(".git")).unwrap();

    let err = fx.orchestrator(&config).analyze().await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyRunning { .. }));
    assert!(!fx.worktree_path().exists());
}

#[tokio::test]
async fn test_missing_remote_without_url_is_connectivity_error() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    let mut config = fx.config();
    config.upstream.url = None;

    let err = fx.orchestrator(&config).analyze().await.unwrap_err();
    assert!(matches!(err, SyncError::Connectivity { .. }));
    assert_eq!(fx.registered_worktrees(), 0);
}

#[tokio::test]
async fn test_missing_branch_is_connectivity_error() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(false);
    let mut config = fx.config();
    config.upstream.branch = "does-not-exist".into();

    let err = fx.orchestrator(&config).analyze().await.unwrap_err();
    match err {
        SyncError::Connectivity { detail, .. } => assert!(detail.contains("does-not-exist")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_squash_stages_upstream_history() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    // Without conflicting edits so the squash merge applies cleanly.
    let tmp = TempDir::new().unwrap();
    let template = tmp.path().join("template");
    std::fs::create_dir(&template).unwrap();
    git(&template, &["init", "-q", "-b", "main"]);
    configure_identity(&template);
    write(&template, "a.txt", "a\n");
    commit_all(&template, "Initial");
    let fork = tmp.path().join("fork");
    git(tmp.path(), &["clone", "-q", template.to_str().unwrap(), fork.to_str().unwrap()]);
    configure_identity(&fork);
    for i in 0..3 {
        write(&template, "a.txt", &format!("a{}\n", i));
        commit_all(&template, &format!("Upstream change {}", i));
    }

    let mut config = ForkSyncConfig::default();
    config.upstream.url = Some(template.to_string_lossy().to_string());
    config.fork.path = fork.clone();
    config.squash.max_previews = 2;

    let orchestrator = Orchestrator::new(&config).unwrap();
    let plan = orchestrator.squash().await.unwrap().expect("changes to squash");
    assert_eq!(plan.change_count, 3);
    assert!(plan.message.contains("- Upstream change 2"));
    assert!(plan.message.contains("- and 1 more"));
    assert_eq!(read(&fork, "a.txt"), "a2\n");

    // Nothing left to take once upstream is merged in.
    git(&fork, &["commit", "-q", "-m", "squash"]);
    git(&fork, &["merge", "-q", "-s", "ours", "upstream/main", "-m", "record sync"]);
    assert!(orchestrator.squash().await.unwrap().is_none());
}
