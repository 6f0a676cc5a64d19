//! Run summaries and the plain-text report log.

use std::fmt::Write as _;
use std::path::Path;

use chrono::Utc;
use tracing::info;

use crate::errors::SyncError;
use crate::models::{FileAnalysis, SyncCategory, SyncSummary};
use crate::strategy::categorize;

/// Count files per category.
pub fn summarize(analyses: &[FileAnalysis]) -> SyncSummary {
    let mut summary = SyncSummary::default();
    for analysis in analyses {
        summary.record(categorize(analysis));
    }
    summary
}

/// Files paired with their category, most severe first, then by path.
pub fn by_severity(analyses: &[FileAnalysis]) -> Vec<(SyncCategory, &FileAnalysis)> {
    let mut rows: Vec<(SyncCategory, &FileAnalysis)> =
        analyses.iter().map(|a| (categorize(a), a)).collect();
    rows.sort_by(|(ca, a), (cb, b)| ca.cmp(cb).then_with(|| a.file_path.cmp(&b.file_path)));
    rows
}

/// Render the report log.
pub fn render(title: &str, analyses: &[FileAnalysis]) -> String {
    let summary = summarize(analyses);
    let mut out = String::new();
    let _ = writeln!(out, "# forksync {} ({})", title, Utc::now().to_rfc3339());
    let _ = writeln!(out, "# {} file(s)", summary.total);
    for category in SyncCategory::ALL {
        let count = summary.count(category);
        if count > 0 {
            let _ = writeln!(out, "#   {:<10} {}", category.label(), count);
        }
    }
    out.push('\n');

    for (category, analysis) in by_severity(analyses) {
        let (action, reason) = match &analysis.merge_strategy {
            Some(s) => (s.action.to_string(), s.reason.as_str()),
            None => ("-".to_string(), ""),
        };
        let status = analysis
            .status()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<10} {:<17} {:<11} {}  # {}",
            category.label(),
            action,
            status,
            analysis.file_path,
            reason
        );
    }
    out
}

/// Write the report log to `path`, replacing any previous one.
pub fn write_log(path: &Path, title: &str, analyses: &[FileAnalysis]) -> Result<(), SyncError> {
    let contents = render(title, analyses);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| SyncError::Report {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, contents).map_err(|source| SyncError::Report {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), files = analyses.len(), "wrote report log");
    Ok(())
}
