//! Spinner driven by orchestrator phase transitions.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use forksync_core::{PhaseListener, SyncPhase};

/// Shows the current phase of a run as a spinner message.
#[derive(Clone)]
pub struct PhaseSpinner {
    bar: ProgressBar,
}

impl PhaseSpinner {
    /// A visible spinner, or a hidden one when output is machine-readable.
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
            bar.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PhaseListener for PhaseSpinner {
    fn on_phase(&self, phase: SyncPhase) {
        self.bar.set_message(describe(phase));
    }
}

fn describe(phase: SyncPhase) -> &'static str {
    match phase {
        SyncPhase::Init => "Checking repository...",
        SyncPhase::RemoteConfigured => "Fetching upstream...",
        SyncPhase::Fetched => "Creating worktree...",
        SyncPhase::WorktreeCreated => "Merging upstream...",
        SyncPhase::MergeSucceeded | SyncPhase::MergeConflicted => "Resolving conflicts...",
        SyncPhase::ConflictsResolved => "Analyzing files...",
        SyncPhase::Analyzed => "Applying merge result...",
        SyncPhase::Applied | SyncPhase::Discarded => "Cleaning up...",
        SyncPhase::CleanedUp => "Done",
        SyncPhase::Failed => "Failed, cleaning up...",
    }
}
