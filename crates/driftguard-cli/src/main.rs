//! DriftGuard - governance gates for pull-request pipelines
//!
//! ## Commands
//!
//! - `run`: execute the policy stages that apply to one pull-request event
//! - `validate`: check a policy document without running anything
//! - `reap`: scheduled scan-and-clean over cloud storage
//!
//! Exit status: 0 when nothing blocked, 1 when a `block` stage failed,
//! 2 when the policy is missing or invalid, 3 when the runner itself failed.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use driftguard_core::cloud::{Provider, ReaperSettings, ResourceReaper};
use driftguard_core::{Context, RetryPolicy, DEFAULT_PREFIX};
use driftguard_engine::{
    ConfigError, Event, HandlerRegistry, Policy, RunReport, StageEngine, StageOutcome,
    DEFAULT_POLICY_FILE, EXIT_CONFIG, EXIT_OK, EXIT_RUNTIME,
};

#[derive(Parser)]
#[command(name = "driftguard")]
#[command(author = "DriftGuard Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Policy-driven governance for pull-request pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Policy document
    #[arg(long, global = true, env = "DRIFTGUARD_POLICY", default_value = DEFAULT_POLICY_FILE)]
    policy: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stages that apply to one pull-request event
    Run {
        /// Event name
        #[arg(long, env = "DRIFTGUARD_EVENT", default_value = "pull_request")]
        event: String,

        /// Event action matched against each stage's trigger_on (`closed` runs cleanup)
        #[arg(long, env = "DRIFTGUARD_ACTION")]
        action: String,

        /// Write the run report as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the policy document and list its stages
    Validate,

    /// Scan cloud storage and delete expired governed resources
    Reap {
        /// Providers to scan
        #[arg(long, value_delimiter = ',', default_value = "aws")]
        targets: Vec<Provider>,

        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,

        /// Governance naming prefix
        #[arg(long, default_value = DEFAULT_PREFIX)]
        prefix: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    driftguard_core::init_tracing(cli.json, level);

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_CONFIG
    } else {
        EXIT_RUNTIME
    }
}

async fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            event,
            action,
            output,
        } => cmd_run(&cli.policy, &event, &action, output.as_deref()).await,
        Commands::Validate => cmd_validate(&cli.policy),
        Commands::Reap {
            targets,
            dry_run,
            prefix,
        } => cmd_reap(targets, dry_run, prefix).await,
    }
}

fn load_context<F>(lookup: F) -> Result<Context>
where
    F: Fn(&str) -> Option<String>,
{
    Context::from_lookup(lookup).context("Failed to read run context from environment")
}

async fn cmd_run(policy_path: &Path, event: &str, action: &str, output: Option<&Path>) -> Result<i32> {
    let policy = Policy::load(policy_path)?;
    let ctx = load_context(|key| std::env::var(key).ok())?;
    let event = Event::new(event, action);

    let engine = StageEngine::new(policy, HandlerRegistry::standard());
    let report = engine.run(&ctx, &event).await;
    print_report(&report);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "run report written");
    }

    Ok(report.exit_code())
}

fn print_report(report: &RunReport) {
    println!(
        "DriftGuard run {} ({} / {})",
        report.run_id,
        report.event.class.as_str(),
        report.event.action
    );
    for result in &report.results {
        let marker = match result.outcome {
            StageOutcome::Succeeded => "ok",
            StageOutcome::Skipped => "skip",
            StageOutcome::Failed => "FAIL",
        };
        println!(
            "  [{:>4}] {} ({}): {}",
            marker, result.stage_name, result.severity, result.detail
        );
    }
    if let Some(stage) = &report.halted_by {
        let reason = report
            .result(stage)
            .map(|r| r.detail.as_str())
            .unwrap_or("unknown");
        eprintln!("Blocked by stage '{}': {}", stage, reason);
    }
}

fn cmd_validate(policy_path: &Path) -> Result<i32> {
    let policy = Policy::load(policy_path)?;
    println!("Policy {} is valid", policy_path.display());
    if let Some(version) = &policy.version {
        println!("  version: {}", version);
    }
    for (section, stages) in [("stages", &policy.stages), ("cleanup", &policy.cleanup)] {
        println!("  {}: {} stage(s)", section, stages.len());
        for stage in stages.iter() {
            println!(
                "    - {} (type {}, {}, {}, on {})",
                stage.name,
                stage.stage_type,
                if stage.enabled { "enabled" } else { "disabled" },
                stage.severity,
                stage.trigger_on.join(", ")
            );
        }
    }
    Ok(EXIT_OK)
}

async fn cmd_reap(targets: Vec<Provider>, dry_run: bool, prefix: String) -> Result<i32> {
    anyhow::ensure!(!prefix.is_empty(), "--prefix must not be empty");
    let ctx = load_context(|key| std::env::var(key).ok())?;
    let targets: BTreeSet<Provider> = targets.into_iter().collect();

    let reaper = ResourceReaper::default().with_settings(ReaperSettings {
        prefix,
        retry: RetryPolicy::enumeration(),
    });
    let summary = reaper.scan(&ctx, &targets, dry_run).await;

    println!("{}", summary.describe());
    if dry_run {
        println!("{} resource(s) would be deleted", summary.planned());
    } else {
        println!("{} resource(s) deleted", summary.deleted());
    }
    Ok(EXIT_OK)
}
