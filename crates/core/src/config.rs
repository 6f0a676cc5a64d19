//! Configuration for forksync.
//!
//! The configuration is loaded once from `.forksync.toml`, validated, and then
//! passed by reference into every component. Nothing in the library reads
//! configuration from ambient global state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

/// Default config file name, looked up in the fork root.
pub const DEFAULT_CONFIG_FILE: &str = ".forksync.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Complete forksync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForkSyncConfig {
    /// Where the template repository lives.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// The derived repository being kept in sync.
    #[serde(default)]
    pub fork: ForkConfig,

    /// Path-pattern override policy.
    #[serde(default)]
    pub overrides: OverridesConfig,

    /// Squash commit message composition.
    #[serde(default)]
    pub squash: SquashConfig,

    /// History analysis tuning.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Optional plain-text report artifact.
    #[serde(default)]
    pub report: ReportConfig,

    /// Miscellaneous behaviour options.
    #[serde(default)]
    pub options: OptionsConfig,
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Upstream (template) repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Clone URL of the template. Optional when the remote is already configured.
    #[serde(default)]
    pub url: Option<String>,

    /// Name of the git remote pointing at the template.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Template branch to synchronize from.
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            remote: default_remote(),
            branch: default_branch(),
        }
    }
}

impl UpstreamConfig {
    /// The remote-tracking ref analyzed and merged, e.g. `upstream/main`.
    pub fn upstream_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

fn default_remote() -> String {
    "upstream".into()
}

fn default_branch() -> String {
    "main".into()
}

// ---------------------------------------------------------------------------
// Fork
// ---------------------------------------------------------------------------

/// Fork (derived repository) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkConfig {
    /// Fork working tree.
    #[serde(default = "default_fork_path")]
    pub path: PathBuf,

    /// Fork position that is analyzed and merged into.
    #[serde(default = "default_fork_ref", rename = "ref")]
    pub fork_ref: String,

    /// Fork line that still carries upstream's change history, used for
    /// per-file ancestor detection. Defaults to `ref`.
    #[serde(default)]
    pub history_ref: Option<String>,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            path: default_fork_path(),
            fork_ref: default_fork_ref(),
            history_ref: None,
        }
    }
}

impl ForkConfig {
    pub fn history_ref(&self) -> &str {
        self.history_ref.as_deref().unwrap_or(&self.fork_ref)
    }
}

fn default_fork_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_fork_ref() -> String {
    "HEAD".into()
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Glob patterns assigning override classes to paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverridesConfig {
    /// Upstream changes to these paths are never taken.
    #[serde(default)]
    pub ignored: Vec<String>,

    /// The fork's content always wins for these paths.
    #[serde(default)]
    pub pinned: Vec<String>,

    /// Fork-customized paths; the fork's content wins like `pinned`.
    #[serde(default)]
    pub customized: Vec<String>,
}

// ---------------------------------------------------------------------------
// Squash / analysis / report / options
// ---------------------------------------------------------------------------

/// Squash commit message settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquashConfig {
    /// Most recent upstream change summaries listed in a squash message.
    #[serde(default = "default_max_previews")]
    pub max_previews: usize,
}

impl Default for SquashConfig {
    fn default() -> Self {
        Self {
            max_previews: default_max_previews(),
        }
    }
}

fn default_max_previews() -> usize {
    10
}

/// History analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Maximum number of files whose history is queried at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    10
}

/// Report artifact settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// When set, every analyzed file is written here with its classification.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Miscellaneous behaviour options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pass `--allow-unrelated-histories` to the merge.
    #[serde(default)]
    pub allow_unrelated_histories: bool,

    /// Manual-resolution prompts before giving up. 0 = unbounded.
    #[serde(default = "default_max_escalation_rounds")]
    pub max_escalation_rounds: u32,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            allow_unrelated_histories: false,
            max_escalation_rounds: default_max_escalation_rounds(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_max_escalation_rounds() -> u32 {
    20
}

const MAX_CONCURRENCY: usize = 64;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl ForkSyncConfig {
    /// Load a [`ForkSyncConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading forksync configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: ForkSyncConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("forksync configuration parsed successfully");
        Ok(config)
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that all values are usable before any repository is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ref_component("upstream.remote", &self.upstream.remote)?;
        validate_ref_component("upstream.branch", &self.upstream.branch)?;
        validate_ref_component("fork.ref", &self.fork.fork_ref)?;
        if let Some(history_ref) = &self.fork.history_ref {
            validate_ref_component("fork.history_ref", history_ref)?;
        }

        if let Some(url) = &self.upstream.url {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "upstream.url".into(),
                    detail: "upstream URL must not be empty when set".into(),
                });
            }
        }

        if self.fork.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "fork.path".into(),
                detail: "fork path must not be empty".into(),
            });
        }

        if self.analysis.concurrency == 0 || self.analysis.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidValue {
                field: "analysis.concurrency".into(),
                detail: format!("concurrency must be between 1 and {}", MAX_CONCURRENCY),
            });
        }

        if !LOG_LEVELS.contains(&self.options.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "options.log_level".into(),
                detail: format!("expected one of {}", LOG_LEVELS.join(", ")),
            });
        }

        validate_patterns("overrides.ignored", &self.overrides.ignored)?;
        validate_patterns("overrides.pinned", &self.overrides.pinned)?;
        validate_patterns("overrides.customized", &self.overrides.customized)?;

        for pattern in &self.overrides.ignored {
            let protected = self.overrides.pinned.contains(pattern)
                || self.overrides.customized.contains(pattern);
            if protected {
                warn!(
                    pattern = pattern.as_str(),
                    "pattern is both ignored and protected; ignored takes precedence"
                );
            }
        }

        Ok(())
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# forksync configuration
# Keeps this repository in sync with the template it was created from.

[upstream]
# url = "https://github.com/org/template.git"  # needed only if the remote is missing
remote = "upstream"
branch = "main"

[fork]
path = "."
ref = "HEAD"
# history_ref = "template-sync"  # fork line that still carries upstream history

[overrides]
# Upstream changes are never taken for these paths.
ignored = []
# The fork's content always wins for these paths.
pinned = []
customized = []

[squash]
max_previews = 10

[analysis]
concurrency = 10

[report]
# log_file = "forksync.log"

[options]
log_level = "info"
allow_unrelated_histories = false
max_escalation_rounds = 20
"#
    }
}

fn validate_ref_component(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.into(),
            detail: "must not be empty".into(),
        });
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidValue {
            field: field.into(),
            detail: format!("'{}' must not contain whitespace", value),
        });
    }
    if value.starts_with('-') {
        return Err(ConfigError::InvalidValue {
            field: field.into(),
            detail: format!("'{}' must not start with '-'", value),
        });
    }
    Ok(())
}

/// Reject patterns that `glob-match` would silently never match.
fn validate_patterns(field: &str, patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        let invalid = |detail: &str| ConfigError::InvalidPattern {
            field: field.into(),
            pattern: pattern.clone(),
            detail: detail.into(),
        };

        if pattern.trim().is_empty() {
            return Err(invalid("pattern must not be empty"));
        }

        let mut brackets = 0i32;
        let mut braces = 0i32;
        for ch in pattern.chars() {
            match ch {
                '[' => brackets += 1,
                ']' => brackets -= 1,
                '{' => braces += 1,
                '}' => braces -= 1,
                _ => {}
            }
            if brackets < 0 {
                return Err(invalid("unbalanced ']'"));
            }
            if braces < 0 {
                return Err(invalid("unbalanced '}'"));
            }
        }
        if brackets != 0 {
            return Err(invalid("unbalanced '['"));
        }
        if braces != 0 {
            return Err(invalid("unbalanced '{'"));
        }
    }
    Ok(())
}
