//! Operation lifecycle orchestrator CLI.
//!
//! Runs a coding agent against a work item in an isolated working folder and
//! publishes the result once the pre-sync gate passes. Working folders are
//! kept, so `publish` and `validate` can revisit them later.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use issueops::exit_codes;
use issueops::io::agent::{AgentInvoker, CliAgentInvoker};
use issueops::io::config::{DEFAULT_CONFIG_FILE, IssueOpsConfig, load_config};
use issueops::io::lookup_cache::LookupCache;
use issueops::io::tracker::OfflineTracker;
use issueops::logging;
use issueops::operation::{OperationRequest, run_operation};
use issueops::publish::{PublishContext, PublishOutcome, publish};
use issueops::validate::{ValidationContext, ValidationResult, validate_working_folder};

#[derive(Parser)]
#[command(
    name = "issueops",
    version,
    about = "Operation lifecycle orchestrator for tracked work items"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Debug-level tracing on stderr (ignored when `RUST_LOG` is set).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one operation against a work item and publish the result.
    Run {
        item_id: String,
        operation: String,
        /// Attach the agent to this terminal.
        #[arg(long)]
        headed: bool,
        /// Override `agent.timeout_secs`.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Instruct the agent to address an invalid work item (test mode).
        #[arg(long)]
        simulate_failure: bool,
    },
    /// Publish an existing working folder (retry pass).
    Publish {
        working_folder: PathBuf,
        item_id: String,
        operation: String,
    },
    /// Run the pre-sync gate on a working folder.
    Validate {
        working_folder: PathBuf,
        #[arg(long, default_value = "")]
        item_id: String,
        /// Operation whose `expected_status` applies.
        #[arg(long)]
        operation: Option<String>,
        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Refresh the workflow-state lookup cache.
    RefreshCache {
        /// Refresh even if the cache is not stale.
        #[arg(short, long)]
        force: bool,
    },
    /// Report whether the agent CLI is available.
    CheckAgent,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let cfg = load_config(&cli.config)?;
    match cli.command {
        Command::Run {
            item_id,
            operation,
            headed,
            timeout_secs,
            simulate_failure,
        } => cmd_run(
            &cfg,
            &OperationRequest {
                work_item_id: item_id,
                operation,
                headed: headed.then_some(true),
                timeout: timeout_secs.map(Duration::from_secs),
                simulate_failure,
            },
        ),
        Command::Publish {
            working_folder,
            item_id,
            operation,
        } => cmd_publish(&cfg, &working_folder, &item_id, &operation),
        Command::Validate {
            working_folder,
            item_id,
            operation,
            json,
        } => cmd_validate(&cfg, &working_folder, &item_id, operation.as_deref(), json),
        Command::RefreshCache { force } => cmd_refresh_cache(&cfg, force),
        Command::CheckAgent => cmd_check_agent(&cfg),
    }
}

fn cmd_run(cfg: &IssueOpsConfig, request: &OperationRequest) -> Result<i32> {
    let invoker = CliAgentInvoker::from_config(&cfg.agent);
    let cache = LookupCache::from_config(&cfg.lookup_cache);
    let outcome = run_operation(cfg, &invoker, &OfflineTracker, Some(&cache), request)?;

    println!("{}", outcome.working_folder.path.display());
    if !outcome.invocation.success {
        eprintln!("{}", outcome.invocation.stderr.trim());
        return Ok(exit_codes::AGENT_FAILED);
    }
    let Some(parsed) = outcome.parsed else {
        return Ok(exit_codes::AGENT_FAILED);
    };
    println!("status: {:?}", parsed.status);
    for report in &outcome.reports {
        println!("report: {report}");
    }
    match outcome.publish {
        Some(published) => Ok(publish_exit_code(&published)),
        None => Ok(exit_codes::AGENT_FAILED),
    }
}

fn cmd_publish(
    cfg: &IssueOpsConfig,
    working_folder: &Path,
    item_id: &str,
    operation: &str,
) -> Result<i32> {
    ensure_folder(working_folder)?;
    let cache = LookupCache::from_config(&cfg.lookup_cache);
    let operation_settings = cfg.operation(operation);
    let outcome = publish(&PublishContext {
        working_folder,
        work_item_id: item_id,
        operation,
        tracker: &OfflineTracker,
        lookup: Some(&cache),
        settings: &cfg.publish,
        operation_settings: &operation_settings,
    });
    println!(
        "comments: {}, body: {}, status: {}",
        outcome.uploaded_assets.comments.len(),
        outcome.uploaded_assets.issue_body,
        outcome.uploaded_assets.status.as_deref().unwrap_or("unchanged")
    );
    Ok(publish_exit_code(&outcome))
}

fn cmd_validate(
    cfg: &IssueOpsConfig,
    working_folder: &Path,
    item_id: &str,
    operation: Option<&str>,
    json: bool,
) -> Result<i32> {
    ensure_folder(working_folder)?;
    let operation_settings = operation.map(|op| cfg.operation(op)).unwrap_or_default();
    let result = validate_working_folder(&ValidationContext {
        working_folder,
        work_item_id: item_id,
        expected_remote_status: operation_settings.expected_status.as_deref(),
        tracker: Some(&OfflineTracker),
    });
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("serialize validation result")?
        );
    } else {
        print_validation(&result);
    }
    Ok(if result.is_valid {
        exit_codes::OK
    } else {
        exit_codes::GATE_FAILED
    })
}

fn cmd_refresh_cache(cfg: &IssueOpsConfig, force: bool) -> Result<i32> {
    let cache = LookupCache::from_config(&cfg.lookup_cache);
    if cache.refresh(&OfflineTracker, force) {
        println!("refreshed {}", cache.path().display());
    } else {
        println!("not refreshed {}", cache.path().display());
    }
    Ok(exit_codes::OK)
}

fn cmd_check_agent(cfg: &IssueOpsConfig) -> Result<i32> {
    let invoker = CliAgentInvoker::from_config(&cfg.agent);
    if invoker.is_available() {
        println!("agent '{}' is available", cfg.agent.command);
        Ok(exit_codes::OK)
    } else {
        println!("agent '{}' is not available", cfg.agent.command);
        Ok(exit_codes::AGENT_FAILED)
    }
}

fn publish_exit_code(outcome: &PublishOutcome) -> i32 {
    if !outcome.validation.is_valid {
        print_validation(&outcome.validation);
        return exit_codes::GATE_FAILED;
    }
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    for error in &outcome.errors {
        eprintln!("error: {error}");
    }
    if outcome.success {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    }
}

fn print_validation(result: &ValidationResult) {
    if result.is_valid {
        println!("valid");
    }
    for error in &result.errors {
        println!("error: {error}");
    }
    for warning in &result.warnings {
        println!("warning: {warning}");
    }
}

fn ensure_folder(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "working folder not found: {}",
            path.display()
        ))
    }
}
