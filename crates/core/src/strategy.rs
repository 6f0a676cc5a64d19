//! Merge strategy resolution.
//!
//! [`resolve`] turns one [`FileAnalysis`] into a [`MergeStrategy`]. Rules are
//! checked in order and the first match wins:
//!
//! | # | Condition | Action |
//! |---|-----------|--------|
//! | 1 | override is `ignored` | `skip-upstream` |
//! | 2 | no usable history, last change ids equal | `keep-fork` |
//! | 3 | blobs identical | `keep-fork` |
//! | 4 | override is `pinned` / `customized` | `keep-fork` |
//! | 5 | fork ahead | `remove-from-fork` if deleted in fork, else `keep-fork` |
//! | 6 | up to date but content differs | `keep-fork` |
//! | 7 | fork behind | `keep-upstream` |
//! | 8 | diverged / unrelated | `manual` |
//! | 9 | anything else | `unknown` |
//!
//! An override always beats an `ahead` classification; the fork's content
//! wins either way, only the reason differs. Protected paths never reach
//! rule 8, so a diverged pinned file keeps the fork without a prompt.

use crate::models::{
    BlobStatus, CommitStatus, FileAnalysis, MergeAction, MergeStrategy, OverrideStatus,
    SyncCategory,
};

/// Decide what to do with one file. Pure and total.
pub fn resolve(analysis: &FileAnalysis) -> MergeStrategy {
    let overrides = analysis.override_status;
    let status = analysis.status();

    if overrides.is_ignored() {
        return MergeStrategy::new(MergeAction::SkipUpstream, "file is ignored by policy");
    }

    if matches!(status, None | Some(CommitStatus::Unknown)) && heads_identical(analysis) {
        return MergeStrategy::new(MergeAction::KeepFork, "HEADs identical");
    }

    if analysis.blob_status == BlobStatus::Identical {
        return MergeStrategy::new(MergeAction::KeepFork, "blobs identical, no action needed");
    }

    if overrides.is_protected() {
        let reason = if status == Some(CommitStatus::Behind) {
            format!("{}, fork wins over upstream changes", overrides)
        } else {
            format!("{}, fork wins", overrides)
        };
        return MergeStrategy::new(MergeAction::KeepFork, reason);
    }

    match status {
        Some(CommitStatus::Ahead) => {
            if analysis.missing_in_fork() {
                MergeStrategy::new(
                    MergeAction::RemoveFromFork,
                    "deleted in fork, propagate deletion",
                )
            } else {
                MergeStrategy::new(MergeAction::KeepFork, "fork is ahead")
            }
        }
        Some(CommitStatus::UpToDate) => MergeStrategy::new(
            MergeAction::KeepFork,
            "no history divergence but content differs, keeping fork",
        ),
        Some(CommitStatus::Behind) => {
            if analysis.missing_in_fork() {
                MergeStrategy::new(MergeAction::KeepUpstream, "new file from upstream")
            } else if analysis.missing_upstream() {
                MergeStrategy::new(MergeAction::KeepUpstream, "deleted upstream, sync deletion")
            } else {
                MergeStrategy::new(MergeAction::KeepUpstream, "fork behind, sync to upstream")
            }
        }
        Some(CommitStatus::Diverged) | Some(CommitStatus::Unrelated) => {
            let kind = if status == Some(CommitStatus::Diverged) {
                "histories diverged"
            } else {
                "histories unrelated"
            };
            MergeStrategy::new(
                MergeAction::Manual,
                format!("{}, manual resolution required", kind),
            )
        }
        Some(CommitStatus::Unknown) | None => {
            MergeStrategy::new(MergeAction::Unknown, "could not determine a strategy")
        }
    }
}

fn heads_identical(analysis: &FileAnalysis) -> bool {
    let upstream = analysis
        .upstream_file
        .as_ref()
        .and_then(|f| f.last_change_id.as_deref());
    let fork = analysis
        .fork_file
        .as_ref()
        .and_then(|f| f.last_change_id.as_deref());
    matches!((upstream, fork), (Some(u), Some(f)) if u == f)
}

/// Attach a strategy to every analysis.
pub fn resolve_all(analyses: &mut [FileAnalysis]) {
    for analysis in analyses.iter_mut() {
        analysis.merge_strategy = Some(resolve(analysis));
    }
}

/// Operator-facing category of a resolved file.
pub fn categorize(analysis: &FileAnalysis) -> SyncCategory {
    if analysis.override_status.is_ignored() {
        return SyncCategory::Ignored;
    }
    if analysis.blob_status == BlobStatus::Identical {
        return SyncCategory::Identical;
    }

    let action = analysis.action();
    match action {
        Some(MergeAction::RemoveFromFork) => return SyncCategory::Deleted,
        Some(MergeAction::KeepUpstream) if analysis.missing_upstream() => {
            return SyncCategory::Deleted
        }
        _ => {}
    }

    match analysis.override_status {
        OverrideStatus::Pinned => SyncCategory::Pinned,
        OverrideStatus::Customized => match analysis.status() {
            Some(CommitStatus::Ahead) | Some(CommitStatus::UpToDate) => SyncCategory::Ahead,
            _ => SyncCategory::Pinned,
        },
        OverrideStatus::Ignored | OverrideStatus::None => match action {
            Some(MergeAction::KeepUpstream) => SyncCategory::Behind,
            Some(MergeAction::KeepFork) => SyncCategory::Drifted,
            _ => SyncCategory::Diverged,
        },
    }
}
