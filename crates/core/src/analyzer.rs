//! History and blob analysis.
//!
//! The pure functions [`compare_blobs`] and [`summarize_history`] hold the
//! classification rules. [`Analyzer`] drives them against a repository, either
//! for one path ([`Analyzer::analyze_file`]) or for the whole tree
//! ([`Analyzer::analyze_tree`]). Batch mode reads three trees and two
//! changed-path sets up front and only queries per-file history for paths
//! whose content actually differs, with a bounded number of queries in flight.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

use crate::errors::GitError;
use crate::git::GitCli;
use crate::models::{
    BlobStatus, ChangeEntry, CommitStatus, CommitSummary, FileAnalysis, FileRef, HistoryCoverage,
};
use crate::overrides::OverridePolicy;

// ---------------------------------------------------------------------------
// Pure comparison
// ---------------------------------------------------------------------------

/// Compare content hashes of one path at both refs.
pub fn compare_blobs(upstream: Option<&str>, fork: Option<&str>) -> BlobStatus {
    match (upstream, fork) {
        (Some(u), Some(f)) if u == f => BlobStatus::Identical,
        (Some(_), Some(_)) => BlobStatus::Different,
        _ => BlobStatus::Missing,
    }
}

/// Relate two newest-first change lists for the same path.
///
/// The shared ancestor is the first fork entry that upstream also has. Ahead
/// and behind are that entry's index in each list, or the full list length
/// when there is no shared entry. A side with no entries at all counts the
/// other side's entries entirely as ahead or behind.
pub fn summarize_history(fork: &[ChangeEntry], upstream: &[ChangeEntry]) -> CommitSummary {
    let history_coverage = history_coverage(fork, upstream);

    match (fork.is_empty(), upstream.is_empty()) {
        (true, true) => {
            return CommitSummary {
                status: CommitStatus::Unknown,
                changes_ahead: 0,
                changes_behind: 0,
                shared_ancestor_id: None,
                last_synced_at: None,
                history_coverage,
            }
        }
        (true, false) => {
            return CommitSummary {
                status: CommitStatus::Behind,
                changes_ahead: 0,
                changes_behind: upstream.len(),
                shared_ancestor_id: None,
                last_synced_at: None,
                history_coverage,
            }
        }
        (false, true) => {
            return CommitSummary {
                status: CommitStatus::Ahead,
                changes_ahead: fork.len(),
                changes_behind: 0,
                shared_ancestor_id: None,
                last_synced_at: None,
                history_coverage,
            }
        }
        (false, false) => {}
    }

    let upstream_ids: HashSet<&str> = upstream.iter().map(|e| e.id.as_str()).collect();
    let ancestor = fork
        .iter()
        .enumerate()
        .find(|(_, entry)| upstream_ids.contains(entry.id.as_str()));

    let Some((ahead, ancestor)) = ancestor else {
        return CommitSummary {
            status: CommitStatus::Unrelated,
            changes_ahead: fork.len(),
            changes_behind: upstream.len(),
            shared_ancestor_id: None,
            last_synced_at: None,
            history_coverage,
        };
    };

    let behind = upstream
        .iter()
        .position(|e| e.id == ancestor.id)
        .unwrap_or(upstream.len());

    let status = match (ahead > 0, behind > 0) {
        (false, false) => CommitStatus::UpToDate,
        (true, false) => CommitStatus::Ahead,
        (false, true) => CommitStatus::Behind,
        (true, true) => CommitStatus::Diverged,
    };

    CommitSummary {
        status,
        changes_ahead: ahead,
        changes_behind: behind,
        shared_ancestor_id: Some(ancestor.id.clone()),
        last_synced_at: Some(ancestor.timestamp),
        history_coverage,
    }
}

/// Fraction of upstream change ids the fork also carries.
pub fn history_coverage(fork: &[ChangeEntry], upstream: &[ChangeEntry]) -> HistoryCoverage {
    if upstream.is_empty() {
        return HistoryCoverage::Unknown;
    }
    let fork_ids: HashSet<&str> = fork.iter().map(|e| e.id.as_str()).collect();
    let found = upstream
        .iter()
        .filter(|e| fork_ids.contains(e.id.as_str()))
        .count();
    if found == 0 {
        HistoryCoverage::Unknown
    } else if found == upstream.len() {
        HistoryCoverage::Complete
    } else {
        HistoryCoverage::Partial
    }
}

// ---------------------------------------------------------------------------
// Repository-backed analysis
// ---------------------------------------------------------------------------

/// The refs one analysis run compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRefs {
    pub upstream: String,
    pub fork: String,
    /// Fork line used for per-file history. Usually the same as `fork`.
    pub fork_history: String,
}

impl AnalysisRefs {
    pub fn new(upstream: impl Into<String>, fork: impl Into<String>) -> Self {
        let fork = fork.into();
        Self {
            upstream: upstream.into(),
            fork_history: fork.clone(),
            fork,
        }
    }

    pub fn with_fork_history(mut self, fork_history: impl Into<String>) -> Self {
        self.fork_history = fork_history.into();
        self
    }
}

/// Analyzer bound to one repository.
#[derive(Debug, Clone)]
pub struct Analyzer {
    git: GitCli,
    policy: OverridePolicy,
    concurrency: usize,
}

struct HistoryResult {
    path: String,
    summary: CommitSummary,
    upstream_last: Option<String>,
    fork_last: Option<String>,
}

impl Analyzer {
    pub fn new(git: GitCli, policy: OverridePolicy, concurrency: usize) -> Self {
        Self {
            git,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    /// Analyze a single path.
    #[instrument(skip(self, refs), fields(upstream = %refs.upstream, fork = %refs.fork))]
    pub async fn analyze_file(
        &self,
        refs: &AnalysisRefs,
        path: &str,
    ) -> Result<FileAnalysis, GitError> {
        let (upstream_hash, fork_hash) = tokio::try_join!(
            self.git.blob_hash(&refs.upstream, path),
            self.git.blob_hash(&refs.fork, path),
        )?;
        let mut analysis = self.base_analysis(path, upstream_hash, fork_hash);

        if analysis.blob_status == BlobStatus::Identical {
            analysis.commit_summary = Some(CommitSummary::up_to_date());
        } else if !analysis.override_status.is_ignored() {
            let result = query_history(&self.git, refs, path.to_string()).await?;
            attach_history(&mut analysis, result);
        }
        debug!(path, status = ?analysis.blob_status, "analyzed file");
        Ok(analysis)
    }

    /// Analyze every path upstream has, plus paths upstream deleted since the
    /// merge base that the fork still has. Results are sorted by path.
    #[instrument(skip(self, refs), fields(upstream = %refs.upstream, fork = %refs.fork))]
    pub async fn analyze_tree(&self, refs: &AnalysisRefs) -> Result<Vec<FileAnalysis>, GitError> {
        let (fork_tree, upstream_tree, merge_base) = tokio::try_join!(
            self.git.ls_tree(&refs.fork),
            self.git.ls_tree(&refs.upstream),
            self.git.merge_base(&refs.fork, &refs.upstream),
        )?;

        let (base_tree, changed) = match &merge_base {
            Some(base) => {
                let (base_tree, upstream_changed, fork_changed) = tokio::try_join!(
                    self.git.ls_tree(base),
                    self.git.changed_paths(base, &refs.upstream),
                    self.git.changed_paths(base, &refs.fork),
                )?;
                let changed: BTreeSet<String> =
                    upstream_changed.union(&fork_changed).cloned().collect();
                (base_tree, Some(changed))
            }
            None => {
                info!("no merge base, every differing path needs history");
                (BTreeMap::new(), None)
            }
        };

        let mut paths: BTreeSet<&String> = upstream_tree.keys().collect();
        paths.extend(
            base_tree
                .keys()
                .filter(|p| fork_tree.contains_key(*p) && !upstream_tree.contains_key(*p)),
        );

        let mut analyses: BTreeMap<String, FileAnalysis> = BTreeMap::new();
        let mut pending = Vec::new();

        for path in paths {
            let upstream_hash = upstream_tree.get(path).cloned();
            let fork_hash = fork_tree.get(path).cloned();
            let mut analysis = self.base_analysis(path, upstream_hash, fork_hash);

            let unchanged = changed.as_ref().is_some_and(|c| !c.contains(path));
            if analysis.blob_status == BlobStatus::Identical || unchanged {
                analysis.commit_summary = Some(CommitSummary::up_to_date());
            } else if !analysis.override_status.is_ignored() {
                pending.push(path.clone());
            }
            analyses.insert(path.clone(), analysis);
        }

        info!(
            files = analyses.len(),
            history_queries = pending.len(),
            concurrency = self.concurrency,
            "tree compared, querying per-file history"
        );

        for result in self.run_history_queries(refs, pending).await? {
            if let Some(analysis) = analyses.get_mut(&result.path) {
                attach_history(analysis, result);
            }
        }

        Ok(analyses.into_values().collect())
    }

    async fn run_history_queries(
        &self,
        refs: &AnalysisRefs,
        paths: Vec<String>,
    ) -> Result<Vec<HistoryResult>, GitError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for path in paths {
            let semaphore = Arc::clone(&semaphore);
            let git = self.git.clone();
            let refs = refs.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| GitError::Parse {
                        operation: "log".into(),
                        detail: "history worker pool closed".into(),
                    })?;
                query_history(&git, &refs, path).await
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result?),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    return Err(GitError::Parse {
                        operation: "log".into(),
                        detail: format!("history task cancelled: {}", e),
                    })
                }
            }
        }
        Ok(results)
    }

    fn base_analysis(
        &self,
        path: &str,
        upstream_hash: Option<String>,
        fork_hash: Option<String>,
    ) -> FileAnalysis {
        FileAnalysis {
            file_path: path.to_string(),
            blob_status: compare_blobs(upstream_hash.as_deref(), fork_hash.as_deref()),
            upstream_file: upstream_hash.map(|h| FileRef::new(path, h, None)),
            fork_file: fork_hash.map(|h| FileRef::new(path, h, None)),
            commit_summary: None,
            override_status: self.policy.classify(path),
            merge_strategy: None,
        }
    }
}

async fn query_history(
    git: &GitCli,
    refs: &AnalysisRefs,
    path: String,
) -> Result<HistoryResult, GitError> {
    let (fork_history, upstream_history) = tokio::try_join!(
        git.file_history(&refs.fork_history, &path),
        git.file_history(&refs.upstream, &path),
    )?;
    let summary = summarize_history(&fork_history, &upstream_history);
    debug!(
        path = %path,
        status = %summary.status,
        ahead = summary.changes_ahead,
        behind = summary.changes_behind,
        "history compared"
    );
    Ok(HistoryResult {
        upstream_last: upstream_history.first().map(|e| e.id.clone()),
        fork_last: fork_history.first().map(|e| e.id.clone()),
        path,
        summary,
    })
}

fn attach_history(analysis: &mut FileAnalysis, result: HistoryResult) {
    analysis.upstream_file = analysis
        .upstream_file
        .take()
        .map(|f| f.with_last_change(result.upstream_last.as_deref()));
    analysis.fork_file = analysis
        .fork_file
        .take()
        .map(|f| f.with_last_change(result.fork_last.as_deref()));
    analysis.commit_summary = Some(result.summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, secs: i64) -> ChangeEntry {
        ChangeEntry {
            id: id.to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn list(ids: &[&str]) -> Vec<ChangeEntry> {
        let n = ids.len() as i64;
        ids.iter()
            .enumerate()
            .map(|(i, id)| entry(id, 1_000 + (n - i as i64) * 10))
            .collect()
    }

    #[test]
    fn test_compare_blobs() {
        assert_eq!(compare_blobs(Some("a"), Some("a")), BlobStatus::Identical);
        assert_eq!(compare_blobs(Some("a"), Some("b")), BlobStatus::Different);
        assert_eq!(compare_blobs(Some("a"), None), BlobStatus::Missing);
        assert_eq!(compare_blobs(None, Some("b")), BlobStatus::Missing);
        assert_eq!(compare_blobs(None, None), BlobStatus::Missing);
    }

    #[test]
    fn test_up_to_date_when_heads_match() {
        let fork = list(&["c2", "c1"]);
        let upstream = list(&["c2", "c1"]);
        let s = summarize_history(&fork, &upstream);
        assert_eq!(s.status, CommitStatus::UpToDate);
        assert_eq!((s.changes_ahead, s.changes_behind), (0, 0));
        assert_eq!(s.shared_ancestor_id.as_deref(), Some("c2"));
        assert_eq!(s.history_coverage, HistoryCoverage::Complete);
    }

    #[test]
    fn test_ahead() {
        let fork = list(&["f2", "f1", "c1"]);
        let upstream = list(&["c1"]);
        let s = summarize_history(&fork, &upstream);
        assert_eq!(s.status, CommitStatus::Ahead);
        assert_eq!((s.changes_ahead, s.changes_behind), (2, 0));
        assert_eq!(s.last_synced_at, Some(upstream[0].timestamp));
    }

    #[test]
    fn test_behind() {
        let fork = list(&["c1", "c0"]);
        let upstream = list(&["u3", "u2", "u1", "c1", "c0"]);
        let s = summarize_history(&fork, &upstream);
        assert_eq!(s.status, CommitStatus::Behind);
        assert_eq!((s.changes_ahead, s.changes_behind), (0, 3));
        assert_eq!(s.history_coverage, HistoryCoverage::Partial);
    }

    #[test]
    fn test_diverged_counts_equal_ancestor_indexes() {
        let fork = list(&["f1", "c1", "c0"]);
        let upstream = list(&["u2", "u1", "c1", "c0"]);
        let s = summarize_history(&fork, &upstream);
        assert_eq!(s.status, CommitStatus::Diverged);
        let ancestor = s.shared_ancestor_id.clone().unwrap();
        assert_eq!(fork.iter().position(|e| e.id == ancestor), Some(s.changes_ahead));
        assert_eq!(upstream.iter().position(|e| e.id == ancestor), Some(s.changes_behind));
    }

    #[test]
    fn test_unrelated_counts_full_lengths() {
        let fork = list(&["f2", "f1"]);
        let upstream = list(&["u3", "u2", "u1"]);
        let s = summarize_history(&fork, &upstream);
        assert_eq!(s.status, CommitStatus::Unrelated);
        assert_eq!((s.changes_ahead, s.changes_behind), (2, 3));
        assert!(s.shared_ancestor_id.is_none());
        assert_eq!(s.history_coverage, HistoryCoverage::Unknown);
    }

    #[test]
    fn test_one_sided_history() {
        let s = summarize_history(&[], &list(&["u2", "u1"]));
        assert_eq!(s.status, CommitStatus::Behind);
        assert_eq!(s.changes_behind, 2);

        let s = summarize_history(&list(&["f1"]), &[]);
        assert_eq!(s.status, CommitStatus::Ahead);
        assert_eq!(s.changes_ahead, 1);

        let s = summarize_history(&[], &[]);
        assert_eq!(s.status, CommitStatus::Unknown);
    }

    #[test]
    fn test_coverage_complete_iff_all_upstream_present() {
        let upstream = list(&["u2", "u1"]);
        assert_eq!(
            history_coverage(&list(&["f1", "u2", "u1"]), &upstream),
            HistoryCoverage::Complete
        );
        assert_eq!(
            history_coverage(&list(&["f1", "u1"]), &upstream),
            HistoryCoverage::Partial
        );
        assert_eq!(
            history_coverage(&list(&["f1"]), &upstream),
            HistoryCoverage::Unknown
        );
    }

    #[test]
    fn test_refs_default_history_to_fork() {
        let refs = AnalysisRefs::new("upstream/main", "HEAD");
        assert_eq!(refs.fork_history, "HEAD");
        let refs = refs.with_fork_history("template-sync");
        assert_eq!(refs.fork_history, "template-sync");
        assert_eq!(refs.fork, "HEAD");
    }
}
