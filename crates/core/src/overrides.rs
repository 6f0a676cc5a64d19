//! Override classification for fork paths.
//!
//! [`OverridePolicy`] maps a repository-relative path to an [`OverrideStatus`]
//! using the glob patterns from the `[overrides]` config section.
//!
//! | Condition | Status |
//! |-----------|--------|
//! | Path matches an `ignored` pattern | `Ignored` |
//! | Path matches a `pinned` pattern | `Pinned` |
//! | Path matches a `customized` pattern | `Customized` |
//! | None of the above | `None` |
//!
//! `ignored` is checked first, so a path listed as both ignored and pinned is
//! ignored.

use crate::config::OverridesConfig;
use crate::models::OverrideStatus;

/// Pure path classifier built from configured glob patterns.
#[derive(Debug, Clone, Default)]
pub struct OverridePolicy {
    ignored: Vec<String>,
    pinned: Vec<String>,
    customized: Vec<String>,
}

impl OverridePolicy {
    pub fn new(ignored: Vec<String>, pinned: Vec<String>, customized: Vec<String>) -> Self {
        Self {
            ignored: ignored.iter().map(|p| normalize(p)).collect(),
            pinned: pinned.iter().map(|p| normalize(p)).collect(),
            customized: customized.iter().map(|p| normalize(p)).collect(),
        }
    }

    /// Classify `rel_path` (relative to the repository root).
    pub fn classify(&self, rel_path: &str) -> OverrideStatus {
        let path = normalize(rel_path);
        if matches_any(&self.ignored, &path) {
            OverrideStatus::Ignored
        } else if matches_any(&self.pinned, &path) {
            OverrideStatus::Pinned
        } else if matches_any(&self.customized, &path) {
            OverrideStatus::Customized
        } else {
            OverrideStatus::None
        }
    }

    pub fn is_ignored(&self, rel_path: &str) -> bool {
        matches_any(&self.ignored, &normalize(rel_path))
    }
}

impl From<&OverridesConfig> for OverridePolicy {
    fn from(cfg: &OverridesConfig) -> Self {
        Self::new(
            cfg.ignored.clone(),
            cfg.pinned.clone(),
            cfg.customized.clone(),
        )
    }
}

/// Forward slashes, no leading `./`.
fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.strip_prefix("./").map(str::to_string).unwrap_or(path)
}

fn matches_any(patterns: &[String], path: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| glob_match::glob_match(pattern, path))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
