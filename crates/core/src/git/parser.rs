//! Parsers for git plumbing output.
//!
//! Every git command the engine reads is invoked with a machine-oriented
//! format (`-z`, `--porcelain`, `--format` with unit separators), and each
//! output shape has exactly one parser here. The parsers are pure so they can
//! be tested without a repository.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::GitError;
use crate::models::ChangeEntry;

/// Field separator used in `--format` strings (`%x1f`).
pub const FIELD_SEP: char = '\x1f';

/// `git log` format producing `<id> US <unix time>` per line.
pub const CHANGE_LOG_FORMAT: &str = "--format=%H%x1f%ct";

/// `git log` format producing `<id> US <subject>` per line.
pub const CHANGE_SUMMARY_FORMAT: &str = "--format=%H%x1f%s";

/// One change and its subject line, used for squash messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub id: String,
    pub summary: String,
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    pub branch: Option<String>,
    pub bare: bool,
    pub detached: bool,
    pub locked: bool,
    pub prunable: bool,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Parse `git log --format=%H%x1f%ct` output into newest-first entries.
pub fn parse_change_log(output: &str) -> Result<Vec<ChangeEntry>, GitError> {
    let mut entries = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let (id, ts) = line
            .split_once(FIELD_SEP)
            .ok_or_else(|| parse_error("log", format!("missing separator in '{}'", line)))?;
        let id = id.trim();
        if !is_object_id(id) {
            return Err(parse_error("log", format!("invalid change id '{}'", id)));
        }
        let secs: i64 = ts
            .trim()
            .parse()
            .map_err(|_| parse_error("log", format!("invalid timestamp '{}'", ts.trim())))?;
        let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| parse_error("log", format!("timestamp out of range: {}", secs)))?;
        entries.push(ChangeEntry {
            id: id.to_string(),
            timestamp,
        });
    }
    debug!(count = entries.len(), "parsed change log");
    Ok(entries)
}

/// Parse `git log --format=%H%x1f%s` output. Subjects may be empty.
pub fn parse_change_summaries(output: &str) -> Result<Vec<ChangeSummary>, GitError> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (id, summary) = line
                .split_once(FIELD_SEP)
                .ok_or_else(|| parse_error("log", format!("missing separator in '{}'", line)))?;
            Ok(ChangeSummary {
                id: id.trim().to_string(),
                summary: summary.trim().to_string(),
            })
        })
        .collect()
}

/// Parse `git rev-list --count` output.
pub fn parse_rev_count(output: &str) -> Result<usize, GitError> {
    let trimmed = output.trim();
    trimmed
        .parse()
        .map_err(|_| parse_error("rev-list", format!("expected a count, got '{}'", trimmed)))
}

// ---------------------------------------------------------------------------
// Trees and path lists
// ---------------------------------------------------------------------------

/// Parse `git ls-tree -r -z <ref>` into a `path -> blob hash` map.
///
/// Submodule (`commit`) entries are skipped; they carry no content to compare.
pub fn parse_ls_tree(output: &str) -> Result<BTreeMap<String, String>, GitError> {
    let mut tree = BTreeMap::new();
    for record in output.split('\0').filter(|r| !r.is_empty()) {
        let (meta, path) = record
            .split_once('\t')
            .ok_or_else(|| parse_error("ls-tree", format!("missing tab in '{}'", record)))?;
        let mut fields = meta.split_whitespace();
        let (_mode, kind, hash) = match (fields.next(), fields.next(), fields.next()) {
            (Some(m), Some(k), Some(h)) => (m, k, h),
            _ => return Err(parse_error("ls-tree", format!("malformed entry '{}'", meta))),
        };
        if kind != "blob" {
            debug!(path, kind, "skipping non-blob tree entry");
            continue;
        }
        if !is_object_id(hash) {
            return Err(parse_error("ls-tree", format!("invalid blob hash '{}'", hash)));
        }
        tree.insert(path.to_string(), hash.to_string());
    }
    Ok(tree)
}

/// Parse NUL-separated path lists (`diff --name-only -z`, `ls-files -z`).
pub fn parse_name_list(output: &str) -> BTreeSet<String> {
    output
        .split('\0')
        .map(|p| p.trim_end_matches('\n'))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `git ls-files -u -z` into `path -> set of stages present`.
///
/// Stage 1 is the base, 2 is ours, 3 is theirs. A path missing stage 2 was
/// deleted on our side.
pub fn parse_unmerged(output: &str) -> Result<BTreeMap<String, BTreeSet<u8>>, GitError> {
    let mut entries: BTreeMap<String, BTreeSet<u8>> = BTreeMap::new();
    for record in output.split('\0').filter(|r| !r.is_empty()) {
        let (meta, path) = record
            .split_once('\t')
            .ok_or_else(|| parse_error("ls-files", format!("missing tab in '{}'", record)))?;
        let stage = meta
            .split_whitespace()
            .nth(2)
            .and_then(|s| s.parse::<u8>().ok())
            .filter(|s| (1..=3).contains(s))
            .ok_or_else(|| parse_error("ls-files", format!("invalid stage in '{}'", meta)))?;
        entries.entry(path.to_string()).or_default().insert(stage);
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Worktrees
// ---------------------------------------------------------------------------

/// Parse `git worktree list --porcelain`.
pub fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }
        let (key, value) = match line.split_once(' ') {
            Some((k, v)) => (k, Some(v)),
            None => (line, None),
        };
        if key == "worktree" {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(value.unwrap_or_default()),
                ..Default::default()
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            warn!(line, "worktree attribute before any worktree line");
            continue;
        };
        match key {
            "HEAD" => entry.head = value.map(str::to_string),
            "branch" => entry.branch = value.map(str::to_string),
            "bare" => entry.bare = true,
            "detached" => entry.detached = true,
            "locked" => entry.locked = true,
            "prunable" => entry.prunable = true,
            other => debug!(key = other, "ignoring unknown worktree attribute"),
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// SHA-1 (40) or SHA-256 (64) hex object id.
pub fn is_object_id(s: &str) -> bool {
    (s.len() == 40 || s.len() == 64) && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_error(operation: &str, detail: String) -> GitError {
    GitError::Parse {
        operation: operation.into(),
        detail,
    }
}
