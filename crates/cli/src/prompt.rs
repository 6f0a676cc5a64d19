//! Interactive manual-conflict prompt.

use console::Style;
use dialoguer::Select;
use indicatif::ProgressBar;

use forksync_core::{ConflictPrompt, Decision, EscalationRequest};

use crate::style;

/// Asks the operator to resolve conflicts in the worktree, pausing the
/// spinner while the prompt is on screen.
pub struct TerminalPrompt {
    spinner: ProgressBar,
}

impl TerminalPrompt {
    pub fn new(spinner: ProgressBar) -> Self {
        Self { spinner }
    }
}

impl ConflictPrompt for TerminalPrompt {
    fn confirm_resolution(&mut self, request: &EscalationRequest<'_>) -> Decision {
        self.spinner.suspend(|| {
            println!();
            let round = if request.max_rounds > 0 {
                format!("round {}/{}", request.round, request.max_rounds)
            } else {
                format!("round {}", request.round)
            };
            println!(
                "{}",
                style::warn(&format!(
                    "{} file(s) need manual resolution ({})",
                    request.remaining.len(),
                    round
                ))
            );
            for path in request.remaining {
                println!("    {}", Style::new().red().apply_to(path));
            }
            println!();
            println!(
                "  Resolve them in {} and stage each file with `git add`.",
                Style::new().yellow().apply_to(request.worktree.display())
            );
            println!();

            let choice = Select::new()
                .with_prompt("Continue")
                .items(&["Conflicts resolved, continue", "Abort sync"])
                .default(0)
                .interact();

            match choice {
                Ok(0) => Decision::Resolved,
                _ => Decision::Abort,
            }
        })
    }
}
