//! Squash commit composition for synchronized upstream history.

use tracing::{debug, info, instrument};

use crate::config::SquashConfig;
use crate::errors::GitError;
use crate::git::{ChangeSummary, GitCli};
use crate::models::SHORT_HASH_LEN;

/// Changes on the sync line not yet on the target, with the message that
/// describes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquashPlan {
    pub change_count: usize,
    pub message: String,
}

/// Builds squash commit messages.
#[derive(Debug, Clone)]
pub struct SquashComposer {
    max_previews: usize,
}

impl SquashComposer {
    pub fn new(max_previews: usize) -> Self {
        Self { max_previews }
    }

    /// Header with the change count, up to `max_previews` bullet summaries,
    /// then an "and K more" line when truncated.
    pub fn compose_message(
        &self,
        source: &str,
        change_count: usize,
        recent: &[ChangeSummary],
    ) -> String {
        let noun = if change_count == 1 { "change" } else { "changes" };
        let mut message = format!("Sync {} {} from {}\n", change_count, noun, source);

        let shown: Vec<&ChangeSummary> = recent.iter().take(self.max_previews).collect();
        let hidden = change_count.saturating_sub(shown.len());
        if !shown.is_empty() || hidden > 0 {
            message.push('\n');
        }
        for change in &shown {
            let short: String = change.id.chars().take(SHORT_HASH_LEN).collect();
            let summary = if change.summary.is_empty() {
                "(no summary)"
            } else {
                change.summary.as_str()
            };
            message.push_str(&format!("- {} ({})\n", summary, short));
        }

        if hidden > 0 {
            message.push_str(&format!("- and {} more\n", hidden));
        }
        message
    }

    /// Plan a squash of `target..sync`. `None` when there is nothing to take.
    /// Only reads history.
    #[instrument(skip(self, git), fields(dir = %git.dir().display()))]
    pub async fn plan(
        &self,
        git: &GitCli,
        target: &str,
        sync: &str,
    ) -> Result<Option<SquashPlan>, GitError> {
        let change_count = git.rev_count(target, sync).await?;
        if change_count == 0 {
            debug!(target, sync, "nothing to squash");
            return Ok(None);
        }
        let recent = git
            .change_summaries(target, sync, self.max_previews)
            .await?;
        let message = self.compose_message(sync, change_count, &recent);
        Ok(Some(SquashPlan {
            change_count,
            message,
        }))
    }

    /// Stage a squash of `sync` onto the checked-out branch and return the
    /// message for the commit. Nothing is committed.
    #[instrument(skip(self, git), fields(dir = %git.dir().display()))]
    pub async fn stage(&self, git: &GitCli, sync: &str) -> Result<Option<SquashPlan>, GitError> {
        let Some(plan) = self.plan(git, "HEAD", sync).await? else {
            return Ok(None);
        };
        git.merge_squash(sync).await?;
        info!(sync, changes = plan.change_count, "squash staged");
        Ok(Some(plan))
    }
}

impl From<&SquashConfig> for SquashComposer {
    fn from(config: &SquashConfig) -> Self {
        Self::new(config.max_previews)
    }
}
