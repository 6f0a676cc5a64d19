//! Git access for forksync: output parsers and the async CLI client.

pub mod client;
pub mod parser;

pub use client::{discover_repository, GitCli, MergeOutcome, RepoLayout};
pub use parser::{ChangeSummary, WorktreeEntry};
