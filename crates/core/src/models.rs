//! Domain model types shared by the analyzer, resolver, and orchestrator.
//!
//! Everything here is a plain value: produced fresh for every analysis run and
//! never persisted except through the plain-text report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of hex characters kept in short hashes and change ids.
pub const SHORT_HASH_LEN: usize = 7;

fn shorten(hash: &str) -> String {
    hash.chars().take(SHORT_HASH_LEN).collect()
}

// ---------------------------------------------------------------------------
// File snapshots and history
// ---------------------------------------------------------------------------

/// One file's state at one ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    pub content_hash: String,
    pub short_content_hash: String,
    /// Most recent change touching the file on this ref, when history was read.
    pub last_change_id: Option<String>,
    pub short_change_id: Option<String>,
}

impl FileRef {
    pub fn new(
        path: impl Into<String>,
        content_hash: impl Into<String>,
        last_change_id: Option<String>,
    ) -> Self {
        let content_hash = content_hash.into();
        Self {
            path: path.into(),
            short_content_hash: shorten(&content_hash),
            content_hash,
            short_change_id: last_change_id.as_deref().map(shorten),
            last_change_id,
        }
    }

    /// Copy of this snapshot with the last change id filled in.
    pub fn with_last_change(mut self, change_id: Option<&str>) -> Self {
        self.last_change_id = change_id.map(str::to_string);
        self.short_change_id = change_id.map(shorten);
        self
    }
}

/// One historical change touching a file. History lists are newest-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Commit relationship
// ---------------------------------------------------------------------------

/// Relationship between the fork's and upstream's history of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommitStatus {
    UpToDate,
    Ahead,
    Behind,
    Diverged,
    Unrelated,
    Unknown,
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up-to-date"),
            Self::Ahead => write!(f, "ahead"),
            Self::Behind => write!(f, "behind"),
            Self::Diverged => write!(f, "diverged"),
            Self::Unrelated => write!(f, "unrelated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// How much of upstream's history for a file is visible from the fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryCoverage {
    Complete,
    Partial,
    Unknown,
}

/// Derived commit relationship for one file; recomputed on every analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub status: CommitStatus,
    pub changes_ahead: usize,
    pub changes_behind: usize,
    pub shared_ancestor_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub history_coverage: HistoryCoverage,
}

impl CommitSummary {
    /// Summary for content-identical files, which skip history queries.
    pub fn up_to_date() -> Self {
        Self {
            status: CommitStatus::UpToDate,
            changes_ahead: 0,
            changes_behind: 0,
            shared_ancestor_id: None,
            last_synced_at: None,
            history_coverage: HistoryCoverage::Complete,
        }
    }
}

// ---------------------------------------------------------------------------
// Content and policy
// ---------------------------------------------------------------------------

/// Content comparison of a file at the two refs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobStatus {
    Identical,
    Different,
    Missing,
}

/// Override policy class of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideStatus {
    Ignored,
    Pinned,
    Customized,
    None,
}

impl OverrideStatus {
    pub fn is_ignored(self) -> bool {
        self == Self::Ignored
    }

    /// `true` for classes where the fork's content always wins.
    pub fn is_protected(self) -> bool {
        matches!(self, Self::Pinned | Self::Customized)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Pinned => "pinned",
            Self::Customized => "customized",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for OverrideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// What should happen to a file during synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeAction {
    KeepFork,
    KeepUpstream,
    SkipUpstream,
    RemoveFromFork,
    Manual,
    Unknown,
}

impl std::fmt::Display for MergeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepFork => write!(f, "keep-fork"),
            Self::KeepUpstream => write!(f, "keep-upstream"),
            Self::SkipUpstream => write!(f, "skip-upstream"),
            Self::RemoveFromFork => write!(f, "remove-from-fork"),
            Self::Manual => write!(f, "manual"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A resolved action with the human-readable explanation surfaced to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStrategy {
    pub action: MergeAction,
    pub reason: String,
}

impl MergeStrategy {
    pub fn new(action: MergeAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-file analysis
// ---------------------------------------------------------------------------

/// Everything known about one file in one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_path: String,
    /// `None` when upstream no longer has the file.
    pub upstream_file: Option<FileRef>,
    pub fork_file: Option<FileRef>,
    pub commit_summary: Option<CommitSummary>,
    pub blob_status: BlobStatus,
    pub override_status: OverrideStatus,
    pub merge_strategy: Option<MergeStrategy>,
}

impl FileAnalysis {
    pub fn missing_in_fork(&self) -> bool {
        self.fork_file.is_none()
    }

    pub fn missing_upstream(&self) -> bool {
        self.upstream_file.is_none()
    }

    pub fn status(&self) -> Option<CommitStatus> {
        self.commit_summary.as_ref().map(|s| s.status)
    }

    pub fn action(&self) -> Option<MergeAction> {
        self.merge_strategy.as_ref().map(|s| s.action)
    }
}

// ---------------------------------------------------------------------------
// Reporting categories
// ---------------------------------------------------------------------------

/// Operator-facing classification of a file after a merge.
///
/// Variants are declared in severity order, so the derived `Ord` sorts the
/// most urgent category first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCategory {
    Behind,
    Diverged,
    /// Unprotected fork-only changes that a future sync may overwrite.
    Drifted,
    /// Fork-only changes protected by a customization override.
    Ahead,
    Pinned,
    Ignored,
    Identical,
    Deleted,
}

impl SyncCategory {
    pub const ALL: [SyncCategory; 8] = [
        Self::Behind,
        Self::Diverged,
        Self::Drifted,
        Self::Ahead,
        Self::Pinned,
        Self::Ignored,
        Self::Identical,
        Self::Deleted,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Behind => "behind",
            Self::Diverged => "diverged",
            Self::Drifted => "drifted",
            Self::Ahead => "ahead",
            Self::Pinned => "pinned",
            Self::Ignored => "ignored",
            Self::Identical => "identical",
            Self::Deleted => "deleted",
        }
    }

    /// Whether applying the merge result touches this file in the live repository.
    pub fn implies_change(self) -> bool {
        !matches!(self, Self::Identical | Self::Ahead | Self::Ignored)
    }
}

impl std::fmt::Display for SyncCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-category file counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total: usize,
    pub behind: usize,
    pub diverged: usize,
    pub drifted: usize,
    pub ahead: usize,
    pub pinned: usize,
    pub ignored: usize,
    pub identical: usize,
    pub deleted: usize,
}

impl SyncSummary {
    pub fn record(&mut self, category: SyncCategory) {
        self.total += 1;
        match category {
            SyncCategory::Behind => self.behind += 1,
            SyncCategory::Diverged => self.diverged += 1,
            SyncCategory::Drifted => self.drifted += 1,
            SyncCategory::Ahead => self.ahead += 1,
            SyncCategory::Pinned => self.pinned += 1,
            SyncCategory::Ignored => self.ignored += 1,
            SyncCategory::Identical => self.identical += 1,
            SyncCategory::Deleted => self.deleted += 1,
        }
    }

    pub fn count(&self, category: SyncCategory) -> usize {
        match category {
            SyncCategory::Behind => self.behind,
            SyncCategory::Diverged => self.diverged,
            SyncCategory::Drifted => self.drifted,
            SyncCategory::Ahead => self.ahead,
            SyncCategory::Pinned => self.pinned,
            SyncCategory::Ignored => self.ignored,
            SyncCategory::Identical => self.identical,
            SyncCategory::Deleted => self.deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_ref_short_fields() {
        let r = FileRef::new("src/lib.rs", "0123456789abcdef", Some("fedcba9876".into()));
        assert_eq!(r.short_content_hash, "0123456");
        assert_eq!(r.short_change_id.as_deref(), Some("fedcba9"));

        let r = r.with_last_change(None);
        assert!(r.last_change_id.is_none());
        assert!(r.short_change_id.is_none());
    }

    #[test]
    fn test_category_severity_order() {
        let mut cats = vec![
            SyncCategory::Deleted,
            SyncCategory::Identical,
            SyncCategory::Behind,
            SyncCategory::Ahead,
            SyncCategory::Drifted,
        ];
        cats.sort();
        assert_eq!(
            cats,
            vec![
                SyncCategory::Behind,
                SyncCategory::Drifted,
                SyncCategory::Ahead,
                SyncCategory::Identical,
                SyncCategory::Deleted,
            ]
        );
    }

    #[test]
    fn test_implies_change() {
        assert!(!SyncCategory::Identical.implies_change());
        assert!(!SyncCategory::Ahead.implies_change());
        assert!(!SyncCategory::Ignored.implies_change());
        assert!(SyncCategory::Drifted.implies_change());
        assert!(SyncCategory::Deleted.implies_change());
    }

    #[test]
    fn test_summary_record() {
        let mut summary = SyncSummary::default();
        summary.record(SyncCategory::Behind);
        summary.record(SyncCategory::Behind);
        summary.record(SyncCategory::Pinned);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.count(SyncCategory::Behind), 2);
        assert_eq!(summary.count(SyncCategory::Pinned), 1);
        assert_eq!(summary.count(SyncCategory::Deleted), 0);
    }

    #[test]
    fn test_merge_action_display() {
        assert_eq!(MergeAction::RemoveFromFork.to_string(), "remove-from-fork");
        assert_eq!(MergeAction::SkipUpstream.to_string(), "skip-upstream");
        assert_eq!(CommitStatus::UpToDate.to_string(), "up-to-date");
    }
}
