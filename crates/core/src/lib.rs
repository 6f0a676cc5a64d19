//! forksync core library.
//!
//! This crate keeps a fork in sync with the template repository it was
//! created from: override classification, history and blob analysis, merge
//! strategy resolution, and the isolated-worktree merge that applies the
//! result to the live checkout.

pub mod analyzer;
pub mod config;
pub mod errors;
pub mod escalation;
pub mod git;
pub mod models;
pub mod orchestrator;
pub mod overrides;
pub mod report;
pub mod squash;
pub mod strategy;
pub mod worktree;

// Re-exports for convenience.
pub use config::ForkSyncConfig;
pub use errors::{ConfigError, CoreError, GitError, SyncError};
pub use escalation::{ConflictPrompt, Decision, EscalationRequest};
pub use orchestrator::{AnalysisReport, Orchestrator, PhaseListener, SyncPhase, SyncReport};
pub use overrides::OverridePolicy;
