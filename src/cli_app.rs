//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use container_quota_sentinel::core::config::Config;
use container_quota_sentinel::core::errors::CqsError;
use container_quota_sentinel::monitor::cooldown::{
    ClearReason, CooldownGate, CooldownStore, FileCooldownStore, GateState,
};
use container_quota_sentinel::monitor::pipeline::{
    CheckOptions, RunOutcome, RunReport, run_configured,
};
use container_quota_sentinel::monitor::threshold::{Classification, ContainerStatus};

/// Container Quota Sentinel: warns users before their profile containers fill up.
#[derive(Debug, Parser)]
#[command(
    name = "cqs",
    author,
    version,
    about = "Container Quota Sentinel - logon-time container size warnings",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the logon check: evaluate containers and notify if needed.
    Check(CheckArgs),
    /// Evaluate containers and show their state without notifying.
    Status,
    /// Inspect or reset the notification cooldown.
    Cooldown(CooldownArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct CheckArgs {
    /// Ignore the cooldown window for this run.
    #[arg(long)]
    force: bool,
    /// Evaluate and report, but never notify and never arm the cooldown.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct CooldownArgs {
    #[command(subcommand)]
    command: CooldownCommand,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum CooldownCommand {
    /// Show when the user was last notified and whether the gate is closed.
    Show,
    /// Forget the last notification so the next check may notify again.
    Clear,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type. Every variant exits with status 1.
#[derive(Debug, Error)]
pub enum CliError {
    /// Unusable configuration or state.
    #[error("{0}")]
    Config(#[from] CqsError),
    /// Runtime failure outside the pipeline.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Check(args) => run_check(cli, args),
        Command::Status => run_check(
            cli,
            &CheckArgs {
                force: false,
                dry_run: true,
            },
        ),
        Command::Cooldown(args) => run_cooldown(cli, args.command),
        Command::Config(args) => run_config(cli, args.command.unwrap_or(ConfigCommand::Path)),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

// ──────────────────── check / status ────────────────────

fn run_check(cli: &Cli, args: &CheckArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let options = CheckOptions {
        dry_run: args.dry_run,
    };
    let report = run_configured(&config, Utc::now(), options, args.force)?;

    match output_mode(cli) {
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&report)?;
            if let Value::Object(map) = &mut payload {
                map.insert(
                    "command".to_string(),
                    json!(if args.dry_run { "status" } else { "check" }),
                );
                map.insert("config_hash".to_string(), json!(config.stable_hash()?));
            }
            write_json_line(&payload)?;
        }
        OutputMode::Human if cli.quiet => {}
        OutputMode::Human => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let headline = match report.outcome {
        RunOutcome::CooldownActive => "notifications paused by cooldown".to_string(),
        RunOutcome::NoEnabledContainers => "no container is enabled by policy".to_string(),
        RunOutcome::NoCandidateVolumes => "no container volumes found".to_string(),
        RunOutcome::NoMatchedContainers => "no volume matched an enabled container".to_string(),
        RunOutcome::Healthy => "all containers healthy".to_string(),
        RunOutcome::WouldNotify => format!("would notify ({})", report.worst),
        RunOutcome::Notified => format!("notified ({})", report.worst),
        RunOutcome::DeliveryFailed => "notification could not be delivered".to_string(),
    };
    println!("{} {}", "cqs:".bold(), headline);

    print_gate(report.gate);

    for status in &report.statuses {
        print_status(status);
    }
    for kind in &report.unmatched {
        println!("  {:<12} {}", kind.display_name(), "no matching volume".dimmed());
    }
    let unclaimed = report.assignment.unclaimed();
    if !unclaimed.is_empty() {
        println!("  {} unclaimed volume(s): {}", unclaimed.len(), unclaimed.join(", "));
    }

    if let Some(delivery) = &report.delivery {
        match &delivery.backend {
            Some(backend) => println!("  delivered via {backend}"),
            None => {
                println!("  {}", "delivery failed on every backend".red());
                for failure in &delivery.failures {
                    println!("    {}: {}", failure.provider, failure.message);
                }
            }
        }
    }
    if report.outcome == RunOutcome::WouldNotify
        && let Some(notification) = &report.notification
    {
        println!("  message: {}", notification.title);
        for line in notification.body.lines() {
            println!("    {line}");
        }
    }
}

fn print_status(status: &ContainerStatus) {
    let label = match status.classification {
        Classification::Healthy => "healthy".green(),
        Classification::Warning => "warning".yellow(),
        Classification::Critical => "critical".red().bold(),
    };
    println!(
        "  {:<12} {:>5.1}%  {:>8} / {:<8} MB  {}",
        status.kind.display_name(),
        status.pct,
        status.used_mb,
        status.max_mb,
        label
    );
}

fn print_gate(gate: GateState) {
    match gate {
        GateState::Suppressed { until, .. } => {
            println!("  cooldown: {} until {}", "active".yellow(), format_time(until));
        }
        GateState::Clear { reason } => {
            let text = match reason {
                ClearReason::NeverNotified => "clear (never notified)",
                ClearReason::WindowElapsed => "clear (window elapsed)",
                ClearReason::Override => "clear (forced)",
                ClearReason::Disabled => "disabled",
                ClearReason::UnreadableState => "clear (state unreadable)",
                ClearReason::FutureTimestamp => "clear (stored time in the future)",
            };
            println!("  cooldown: {text}");
        }
    }
}

// ──────────────────── cooldown ────────────────────

fn run_cooldown(cli: &Cli, command: CooldownCommand) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = FileCooldownStore::new(config.paths.state_file.clone());

    match command {
        CooldownCommand::Show => {
            let now = Utc::now();
            let last = store.read().ok().flatten();
            let gate = CooldownGate::from_hours(&store, config.cooldown.window_hours, false);
            let (state, _) = gate.evaluate(now);
            let until = match state {
                GateState::Suppressed { until, .. } => Some(until),
                GateState::Clear { .. } => None,
            };

            match output_mode(cli) {
                OutputMode::Human => {
                    if cli.quiet {
                        return Ok(());
                    }
                    println!("state file: {}", store.path().display());
                    println!("window: {}h", config.cooldown.window_hours);
                    match last {
                        Some(at) => println!("last notified: {}", format_time(at)),
                        None => println!("last notified: never"),
                    }
                    print_gate(state);
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "cooldown show",
                        "state_file": store.path().to_string_lossy(),
                        "window_hours": config.cooldown.window_hours,
                        "last_notified_at": last,
                        "suppressed": until.is_some(),
                        "until": until,
                        "gate": state,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        CooldownCommand::Clear => {
            store.clear()?;
            match output_mode(cli) {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("cooldown cleared: {}", store.path().display());
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "cooldown clear",
                        "state_file": store.path().to_string_lossy(),
                        "cleared": true,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, command: ConfigCommand) -> Result<(), CliError> {
    match command {
        ConfigCommand::Path => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        ConfigCommand::Show => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("failed to render config: {e}")))?;
                    print!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config_hash": config.stable_hash()?,
                        "policy_sources": config.policy.sources,
                        "volume_sources": config.volumes.sources,
                        "notification_backends": config.notifications.backends,
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
    }
}

// ──────────────────── output helpers ────────────────────

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("CQS_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
