//! Manual conflict escalation.
//!
//! When override policy cannot clear every conflict, the operator resolves
//! the rest by hand inside the worktree. [`escalate`] reports what is left,
//! waits on a [`ConflictPrompt`], re-scans, and repeats until nothing is
//! conflicted, the operator aborts, or the round limit is reached.

use std::future::Future;
use std::path::Path;

use tracing::{info, warn};

use crate::errors::{GitError, SyncError};
use crate::git::GitCli;

/// What the operator sees at each round.
#[derive(Debug, Clone, Copy)]
pub struct EscalationRequest<'a> {
    /// 1-based round number.
    pub round: u32,
    /// 0 when unbounded.
    pub max_rounds: u32,
    pub remaining: &'a [String],
    /// Where the conflicted files live.
    pub worktree: &'a Path,
}

/// The operator's answer to one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Conflicts were edited and staged; scan again.
    Resolved,
    /// Stop the run.
    Abort,
}

/// Blocks until the operator answers. Implemented by the CLI.
pub trait ConflictPrompt: Send {
    fn confirm_resolution(&mut self, request: &EscalationRequest<'_>) -> Decision;
}

/// Anything that can list the paths still conflicted.
pub trait ConflictSource {
    fn remaining_conflicts(&self) -> impl Future<Output = Result<Vec<String>, GitError>> + Send;
}

impl ConflictSource for GitCli {
    fn remaining_conflicts(&self) -> impl Future<Output = Result<Vec<String>, GitError>> + Send {
        self.conflicted_paths()
    }
}

/// How a completed escalation went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationOutcome {
    pub rounds: u32,
    /// Paths that needed a human, in the order first reported.
    pub resolved: Vec<String>,
}

/// Loop until `source` reports no conflicts.
pub async fn escalate<S, P>(
    source: &S,
    prompt: &mut P,
    worktree: &Path,
    initial: Vec<String>,
    max_rounds: u32,
) -> Result<EscalationOutcome, SyncError>
where
    S: ConflictSource + Sync,
    P: ConflictPrompt + ?Sized,
{
    let mut remaining = initial.clone();
    let mut round = 0u32;

    while !remaining.is_empty() {
        if max_rounds > 0 && round >= max_rounds {
            warn!(rounds = round, remaining = remaining.len(), "escalation limit reached");
            return Err(SyncError::EscalationExhausted {
                rounds: round,
                remaining: remaining.len(),
            });
        }
        round += 1;
        warn!(round, remaining = remaining.len(), "manual conflict resolution required");

        let request = EscalationRequest {
            round,
            max_rounds,
            remaining: &remaining,
            worktree,
        };
        match prompt.confirm_resolution(&request) {
            Decision::Abort => {
                warn!(round, remaining = remaining.len(), "operator aborted conflict resolution");
                return Err(SyncError::ManualResolutionAborted {
                    remaining: remaining.len(),
                });
            }
            Decision::Resolved => {
                remaining = source.remaining_conflicts().await?;
            }
        }
    }

    if round > 0 {
        info!(rounds = round, files = initial.len(), "manual conflicts resolved");
    }
    Ok(EscalationOutcome {
        rounds: round,
        resolved: initial,
    })
}
