//! Error types for the forksync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from `git` subprocess invocations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git {operation} failed in '{}' (exit {exit_code}): {stderr}", dir.display())]
    CommandFailed {
        operation: String,
        dir: PathBuf,
        exit_code: i32,
        stderr: String,
    },

    /// A ref (branch, remote branch, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Output of a git command did not have the expected shape.
    #[error("could not parse output of git {operation}: {detail}")]
    Parse { operation: String, detail: String },

    /// Filesystem or process I/O failure.
    #[error("git I/O error during {operation} at '{}': {source}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the worktree merge orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run already holds this repository's worktree.
    #[error("another forksync run holds '{}' (pid {pid})", lock_path.display())]
    AlreadyRunning { lock_path: PathBuf, pid: u32 },

    /// The run lock file could not be created, read, or removed.
    #[error("run lock '{}' unusable: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upstream remote could not be reached or lacks the configured ref.
    #[error("upstream remote '{remote}' unavailable: {detail}")]
    Connectivity { remote: String, detail: String },

    /// The isolated working copy could not be created or removed.
    #[error("worktree error at '{}': {detail}", path.display())]
    Worktree { path: PathBuf, detail: String },

    /// The operator aborted manual conflict resolution.
    #[error("manual conflict resolution aborted with {remaining} conflict(s) remaining")]
    ManualResolutionAborted { remaining: usize },

    /// Manual resolution did not converge within the configured rounds.
    #[error("conflicts still unresolved after {rounds} escalation round(s): {remaining} remaining")]
    EscalationExhausted { rounds: u32, remaining: usize },

    /// Copying a resolved file back into the live repository failed.
    #[error("failed to apply '{}' to the live repository: {source}", path.display())]
    Apply {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The report log file could not be written.
    #[error("failed to write report '{}': {source}", path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Underlying git error during the run.
    #[error("sync git error: {0}")]
    Git(#[from] GitError),

    /// Configuration problem discovered during the run.
    #[error("sync config error: {0}")]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// An override pattern cannot be used for matching.
    #[error("invalid pattern '{pattern}' in '{field}': {detail}")]
    InvalidPattern {
        field: String,
        pattern: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::RefNotFound("upstream/main".into());
        assert_eq!(err.to_string(), "git ref not found: upstream/main");

        let err = GitError::CommandFailed {
            operation: "merge".into(),
            dir: PathBuf::from("/tmp/wt"),
            exit_code: 128,
            stderr: "fatal: bad revision".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("merge"));
        assert!(msg.contains("/tmp/wt"));
        assert!(msg.contains("128"));

        let err = SyncError::ManualResolutionAborted { remaining: 3 };
        assert!(err.to_string().contains("3 conflict(s)"));

        let err = ConfigError::InvalidPattern {
            field: "overrides.ignored".into(),
            pattern: "src/[abc".into(),
            detail: "unbalanced '['".into(),
        };
        assert!(err.to_string().contains("src/[abc"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let git_err = GitError::BinaryNotFound("git".into());
        let core_err: CoreError = git_err.into();
        assert!(matches!(core_err, CoreError::Git(_)));

        let sync_err: SyncError = GitError::RefNotFound("x".into()).into();
        assert!(matches!(sync_err, SyncError::Git(GitError::RefNotFound(_))));

        let core_err: CoreError = CoreError::Sync(sync_err);
        assert!(matches!(core_err, CoreError::Sync(_)));
    }
}
