//! Shared styling utilities for the CLI.

use console::Style;

use forksync_core::models::{MergeAction, SyncCategory};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Category label colored by severity.
pub fn category(category: SyncCategory) -> String {
    let style = match category {
        SyncCategory::Behind => Style::new().cyan().bold(),
        SyncCategory::Diverged => Style::new().red().bold(),
        SyncCategory::Drifted => Style::new().yellow(),
        SyncCategory::Deleted => Style::new().magenta(),
        SyncCategory::Ahead | SyncCategory::Pinned => Style::new().green(),
        SyncCategory::Ignored | SyncCategory::Identical => Style::new().dim(),
    };
    style.apply_to(category.label()).to_string()
}

/// Merge action label; `manual` stands out.
pub fn action(action: MergeAction) -> String {
    let style = match action {
        MergeAction::Manual => Style::new().red().bold(),
        MergeAction::KeepUpstream | MergeAction::RemoveFromFork => Style::new().cyan(),
        _ => Style::new(),
    };
    style.apply_to(action.to_string()).to_string()
}
