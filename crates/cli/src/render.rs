//! Tables for analysis and sync results.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use forksync_core::models::{FileAnalysis, SyncCategory, SyncSummary};
use forksync_core::report::by_severity;

use crate::style;

/// Per-category counts, skipping empty categories.
pub fn summary_table(summary: &SyncSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Category", "Files"]);
    for category in SyncCategory::ALL {
        let count = summary.count(category);
        if count > 0 {
            table.add_row(vec![Cell::new(style::category(category)), Cell::new(count)]);
        }
    }
    table.add_row(vec![Cell::new(style::header("total")), Cell::new(summary.total)]);
    table
}

/// Files that need attention, most severe first. Identical and ignored files
/// are only listed when `all` is set.
pub fn files_table(files: &[FileAnalysis], all: bool) -> Option<Table> {
    let rows: Vec<_> = by_severity(files)
        .into_iter()
        .filter(|(category, _)| all || category.implies_change())
        .collect();
    if rows.is_empty() {
        return None;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["File", "Category", "Action", "Ahead/Behind", "Reason"]);

    for (category, analysis) in rows {
        let (action, reason) = match &analysis.merge_strategy {
            Some(s) => (style::action(s.action), s.reason.as_str()),
            None => ("—".to_string(), ""),
        };
        let counts = analysis
            .commit_summary
            .as_ref()
            .map(|s| format!("+{} / -{}", s.changes_ahead, s.changes_behind))
            .unwrap_or_else(|| "—".to_string());
        table.add_row(vec![
            Cell::new(&analysis.file_path),
            Cell::new(style::category(category)),
            Cell::new(action),
            Cell::new(counts),
            Cell::new(reason),
        ]);
    }
    Some(table)
}
