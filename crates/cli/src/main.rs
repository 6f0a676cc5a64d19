//! forksync command-line tool.
//!
//! Provides subcommands for analyzing how far a fork has drifted from its
//! template, synchronizing it through an isolated worktree merge, staging a
//! squash of upstream history, and generating / validating configuration
//! files.

mod progress;
mod prompt;
mod render;
mod style;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::{Style, Term};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use forksync_core::config::{ForkSyncConfig, DEFAULT_CONFIG_FILE};
use forksync_core::models::{FileAnalysis, SyncSummary};
use forksync_core::{ConflictPrompt, Orchestrator, SyncError};

use crate::progress::PhaseSpinner;
use crate::prompt::TerminalPrompt;

/// Exit status when a sync stopped on conflicts that need a human.
const EXIT_CONFLICTS: u8 = 2;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Keep a fork synchronized with the template repository it was created from.
#[derive(Parser, Debug)]
#[command(
    name = "forksync",
    version,
    about = "Keep a fork synchronized with the template repository it was created from"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level regardless of configuration.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dry run: merge upstream in a scratch worktree and classify every file.
    Analyze {
        /// Analyze a single path against the current refs, without fetching.
        #[arg(long)]
        file: Option<String>,

        /// Also list identical and ignored files.
        #[arg(long)]
        all: bool,
    },

    /// Merge upstream and stage the result in the working tree.
    Sync {
        /// Never prompt; report conflicts that need a human and apply nothing.
        #[arg(long)]
        no_prompt: bool,

        /// Also list identical and ignored files.
        #[arg(long)]
        all: bool,
    },

    /// Stage a squash of the upstream branch onto the current branch.
    Squash,

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { output, force } => {
            init_tracing("warn", cli.verbose);
            cmd_init(&output, force)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => {
            init_tracing("warn", cli.verbose);
            cmd_validate(&cli.config)?;
            Ok(ExitCode::SUCCESS)
        }
        command => {
            let config = ForkSyncConfig::load_and_validate(&cli.config)
                .with_context(|| format!("failed to load {}", cli.config.display()))?;
            init_tracing(&config.options.log_level, cli.verbose);
            tracing::debug!(config = %cli.config.display(), "configuration loaded");

            match command {
                Commands::Analyze { file: Some(path), .. } => {
                    cmd_analyze_file(&config, &path, cli.json).await
                }
                Commands::Analyze { file: None, all } => cmd_analyze(&config, all, cli.json).await,
                Commands::Sync { no_prompt, all } => {
                    cmd_sync(&config, no_prompt, all, cli.json).await
                }
                Commands::Squash => cmd_squash(&config, cli.json).await,
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

/// `RUST_LOG` overrides the configured level; `--verbose` overrides both.
fn init_tracing(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Drive `run` to completion unless Ctrl-C arrives first. Dropping the run
/// releases the lock and removes its worktree.
async fn interruptible<T>(run: impl Future<Output = Result<T, SyncError>>) -> Result<T> {
    tokio::select! {
        result = run => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("interrupted, worktree discarded and live checkout left untouched")
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{}", out);
    Ok(())
}

fn print_tables(summary: &SyncSummary, files: &[FileAnalysis], all: bool) {
    println!();
    println!("{}", render::summary_table(summary));
    if let Some(table) = render::files_table(files, all) {
        println!();
        println!("{}", table);
    }
    println!();
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_analyze(config: &ForkSyncConfig, all: bool, json: bool) -> Result<ExitCode> {
    let spinner = PhaseSpinner::new(!json);
    let orchestrator = Orchestrator::new(config)
        .context("failed to open fork repository")?
        .with_listener(Arc::new(spinner.clone()));

    let result = interruptible(orchestrator.analyze()).await;
    spinner.finish();
    let report = result.context("analysis failed")?;

    if json {
        print_json(&report)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{}",
        style::header(&format!(
            "Fork {} against {}",
            report.fork_ref, report.upstream_ref
        ))
    );
    print_tables(&report.summary, &report.files, all);

    if report.unresolved_conflicts.is_empty() {
        println!("{}", style::success("A sync would merge without manual resolution"));
    } else {
        println!(
            "{}",
            style::warn(&format!(
                "A sync needs manual resolution for {} file(s):",
                report.unresolved_conflicts.len()
            ))
        );
        for path in &report.unresolved_conflicts {
            println!("    {}", path);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_analyze_file(config: &ForkSyncConfig, path: &str, json: bool) -> Result<ExitCode> {
    let orchestrator = Orchestrator::new(config).context("failed to open fork repository")?;
    let analysis = orchestrator
        .analyze_file(path)
        .await
        .with_context(|| format!("failed to analyze {}", path))?;

    if json {
        print_json(&analysis)?;
        return Ok(ExitCode::SUCCESS);
    }

    let value_style = Style::new().cyan();
    println!();
    println!("{}", style::header(&analysis.file_path));
    println!(
        "  Blob       : {}",
        value_style.apply_to(format!("{:?}", analysis.blob_status).to_lowercase())
    );
    println!("  Override   : {}", value_style.apply_to(analysis.override_status));
    if let Some(summary) = &analysis.commit_summary {
        println!("  History    : {}", value_style.apply_to(summary.status));
        println!(
            "  Ahead/Behind: +{} / -{}",
            summary.changes_ahead, summary.changes_behind
        );
        if let Some(base) = &summary.shared_ancestor_id {
            println!("  Shared     : {}", style::dim(base));
        }
    }
    if let Some(strategy) = &analysis.merge_strategy {
        println!("  Action     : {}", style::action(strategy.action));
        println!("  Reason     : {}", strategy.reason);
    }
    println!();
    Ok(ExitCode::SUCCESS)
}

async fn cmd_sync(
    config: &ForkSyncConfig,
    no_prompt: bool,
    all: bool,
    json: bool,
) -> Result<ExitCode> {
    let spinner = PhaseSpinner::new(!json);
    let orchestrator = Orchestrator::new(config)
        .context("failed to open fork repository")?
        .with_listener(Arc::new(spinner.clone()));

    let interactive = !no_prompt && !json && Term::stdout().is_term();
    let mut terminal_prompt = TerminalPrompt::new(spinner.bar().clone());
    let prompt: Option<&mut dyn ConflictPrompt> = if interactive {
        Some(&mut terminal_prompt)
    } else {
        None
    };

    let result = interruptible(orchestrator.sync(prompt)).await;
    spinner.finish();
    let report = result.context("sync failed")?;

    let code = if report.is_applied() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_CONFLICTS)
    };

    if json {
        print_json(&report)?;
        return Ok(code);
    }

    print_tables(&report.summary, &report.files, all);

    if !report.is_applied() {
        println!(
            "{}",
            style::error(&format!(
                "{} file(s) need manual resolution; nothing was applied:",
                report.unresolved_conflicts.len()
            ))
        );
        for path in &report.unresolved_conflicts {
            println!("    {}", path);
        }
        println!();
        println!("Re-run `forksync sync` in a terminal to resolve them interactively.");
        return Ok(code);
    }

    if report.applied.is_empty() && report.removed.is_empty() {
        println!("{}", style::success("Fork is already in sync with upstream"));
        return Ok(code);
    }

    println!(
        "{}",
        style::success(&format!(
            "Staged {} updated and {} removed file(s)",
            report.applied.len(),
            report.removed.len()
        ))
    );
    if !report.manually_resolved.is_empty() {
        println!("  Manually resolved: {}", report.manually_resolved.join(", "));
    }
    if report.squash_message.is_some() {
        println!();
        println!("Review with `git diff --cached`, then `git commit` to use the prepared message.");
    }
    Ok(code)
}

async fn cmd_squash(config: &ForkSyncConfig, json: bool) -> Result<ExitCode> {
    let orchestrator = Orchestrator::new(config).context("failed to open fork repository")?;
    let plan = interruptible(orchestrator.squash())
        .await
        .context("squash failed")?;

    if json {
        let value = match &plan {
            Some(plan) => serde_json::json!({
                "change_count": plan.change_count,
                "message": plan.message,
            }),
            None => serde_json::Value::Null,
        };
        print_json(&value)?;
        return Ok(ExitCode::SUCCESS);
    }

    match plan {
        Some(plan) => {
            println!(
                "{}",
                style::success(&format!(
                    "Staged a squash of {} upstream change(s)",
                    plan.change_count
                ))
            );
            println!();
            for line in plan.message.lines() {
                println!("    {}", style::dim(line));
            }
            println!();
            println!("Commit with `git commit` to use this message.");
        }
        None => println!("{}", style::success("No upstream changes to squash")),
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "file already exists: {}. Use --force or a different path.",
            output.display()
        );
    }

    std::fs::write(output, ForkSyncConfig::default_template())
        .context("failed to write config file")?;

    let written = format!("Default configuration written to {}", output.display());
    println!("{}", style::success(&written));
    println!();
    println!("Next steps:");
    println!("  1. Set [upstream] url/remote/branch to point at the template");
    println!("  2. List paths the fork owns under [overrides]");
    println!("  3. Validate with: forksync validate --config {}", output.display());
    println!("  4. Preview a sync with: forksync analyze --config {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config =
        ForkSyncConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let overrides = &config.overrides;
    println!();
    println!("Configuration summary:");
    println!("  Upstream ref   : {}", config.upstream.upstream_ref());
    println!(
        "  Upstream URL   : {}",
        config.upstream.url.as_deref().unwrap_or("(existing remote)")
    );
    println!("  Fork path      : {}", config.fork.path.display());
    println!("  Fork ref       : {}", config.fork.fork_ref);
    println!("  History ref    : {}", config.fork.history_ref());
    println!(
        "  Overrides      : {} ignored, {} pinned, {} customized",
        overrides.ignored.len(),
        overrides.pinned.len(),
        overrides.customized.len()
    );
    println!("  Concurrency    : {}", config.analysis.concurrency);
    println!(
        "  Report log     : {}",
        config
            .report
            .log_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "disabled".to_string())
    );
    println!();
    println!("Configuration is valid.");
    Ok(())
}
