//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use repo_sweep::cleanup::executor::Outcome;
use repo_sweep::cleanup::report::{CleanupReport, RunMode};
use repo_sweep::core::cancel::CancelToken;
use repo_sweep::core::config::{Config, Disposal};
use repo_sweep::core::errors::SweepError;
use repo_sweep::core::paths::resolve_absolute_path;
use repo_sweep::logger::activity::{ActivityLoggerHandle, spawn_logger};
use repo_sweep::logger::jsonl::JsonlConfig;
use repo_sweep::pipeline::{Pipeline, restore_from_manifest};
use repo_sweep::protection::ProtectionOrigin;

/// Safe repository cleanup: archive first, delete second, never touch what is still used.
#[derive(Debug, Parser)]
#[command(
    name = "rsweep",
    author,
    version,
    about = "Repository sweep - reachability-aware, reversible cleanup",
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
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Find unreferenced artifacts; archive and remove them with --apply.
    Clean(CleanArgs),
    /// Re-extract a backup archive to its original paths.
    Restore(RestoreArgs),
    /// List every protected path and why it is protected.
    Protected(ProtectedArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct CleanArgs {
    /// Target directory (defaults to the current directory).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
    /// Candidate inclusion glob; replaces the default set (repeatable).
    #[arg(long = "include-pattern", value_name = "GLOB")]
    include_patterns: Vec<String>,
    /// Hard exclusion glob layered on top of protection (repeatable).
    #[arg(long = "exclude-pattern", value_name = "GLOB")]
    exclude_patterns: Vec<String>,
    /// Replay route handlers to recover references only reachable per method.
    #[arg(long)]
    route_scan: bool,
    /// Archive and remove candidates (default is a dry run).
    #[arg(long)]
    apply: bool,
    /// Operator-declared critical-path patterns, one per line.
    #[arg(long, value_name = "PATH")]
    allowlist_file: Option<PathBuf>,
    /// Destination directory for backup archives.
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,
    /// Move candidates here instead of deleting them.
    #[arg(long, value_name = "DIR")]
    quarantine: Option<PathBuf>,
    /// Do not consult version control for tracked paths.
    #[arg(long)]
    no_vcs: bool,
    /// Reference scanner worker threads.
    #[arg(long, value_name = "N")]
    parallelism: Option<usize>,
}

#[derive(Debug, Clone, Args, Serialize)]
struct RestoreArgs {
    /// Manifest written next to the archive (`rsweep-*.manifest.json`).
    #[arg(value_name = "MANIFEST")]
    manifest: PathBuf,
    /// Restore under this directory instead of the recorded root.
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
    /// Overwrite files that already exist.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ProtectedArgs {
    /// Target directory (defaults to the current directory).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
    /// Operator-declared critical-path patterns, one per line.
    #[arg(long, value_name = "PATH")]
    allowlist_file: Option<PathBuf>,
    /// Include route-simulation results.
    #[arg(long)]
    route_scan: bool,
    /// Do not consult version control for tracked paths.
    #[arg(long)]
    no_vcs: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input.
    #[error("{0}")]
    User(String),
    /// Failure reported by the library.
    #[error("{0}")]
    Sweep(#[from] SweepError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Sweep(err) => err.exit_code(),
            Self::Json(_) | Self::Io(_) => 2,
        }
    }
}

/// Dispatch CLI commands; `Ok` carries the process exit code.
pub fn run(cli: &Cli) -> Result<i32, CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Clean(args) => run_clean(cli, args),
        Command::Restore(args) => run_restore(cli, args),
        Command::Protected(args) => run_protected(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(0)
        }
    }
}

// ──────────────────── clean ────────────────────

fn run_clean(cli: &Cli, args: &CleanArgs) -> Result<i32, CliError> {
    let root = resolve_root(args.root.as_deref())?;
    let mut config = Config::load(cli.config.as_deref(), &root)?;
    apply_clean_args(&mut config, args);

    let mode = if args.apply {
        RunMode::Apply
    } else {
        RunMode::DryRun
    };
    let (logger, logger_thread) = start_logger(&config)?;
    let result = Pipeline::new(&root, config)
        .with_mode(mode)
        .with_logger(logger.clone())
        .with_cancel(CancelToken::with_signals())
        .run();
    stop_logger(&logger, logger_thread);
    let outcome = result?;

    match output_mode(cli) {
        OutputMode::Json => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", outcome.report.to_json()?)?;
        }
        OutputMode::Human if !cli.quiet => print_report(&outcome.report, cli.verbose),
        OutputMode::Human => {}
    }
    if let Some(reason) = &outcome.report.apply_refused {
        eprintln!("[RSW-APPLY] {reason}");
    }
    Ok(outcome.exit_code)
}

/// Layer `clean` flags over the loaded configuration. Path flags resolve
/// against the working directory; relative paths from config files resolve
/// against the root.
fn apply_clean_args(config: &mut Config, args: &CleanArgs) {
    if !args.include_patterns.is_empty() {
        config.select.include_patterns.clone_from(&args.include_patterns);
    }
    config
        .select
        .exclude_patterns
        .extend(args.exclude_patterns.iter().cloned());
    if args.route_scan {
        config.scan.route_scan = true;
    }
    if let Some(path) = &args.allowlist_file {
        config.protect.allowlist_file = Some(resolve_absolute_path(path));
    }
    if let Some(dir) = &args.backup_dir {
        config.backup.backup_dir = resolve_absolute_path(dir);
    }
    if let Some(dir) = &args.quarantine {
        config.backup.disposal = Disposal::Quarantine;
        config.backup.quarantine_dir = Some(resolve_absolute_path(dir));
    }
    if args.no_vcs {
        config.vcs.enabled = false;
    }
    if let Some(n) = args.parallelism {
        config.scan.parallelism = n;
    }
}

fn print_report(report: &CleanupReport, verbose: bool) {
    let mode = match report.mode {
        RunMode::DryRun => "dry run".cyan(),
        RunMode::Apply => "apply".yellow(),
    };
    println!("{} {} ({mode})", "rsweep clean".bold(), report.root.display());
    println!(
        "  protected: {} (tracked {}, referenced {}, allowlisted {})",
        report.protected.total.to_string().green(),
        report.protected.tracked,
        report.protected.referenced,
        report.protected.allowlisted
    );
    println!(
        "  scanned {} source files, {} references, {} routes",
        report.sources_scanned,
        report.references,
        report.routes.len()
    );
    println!(
        "  candidates: {} ({})",
        report.candidate_count.to_string().bold(),
        format_bytes(report.candidate_bytes)
    );
    for candidate in &report.candidates {
        println!(
            "    {}  {}  [{}]",
            candidate.path.display(),
            format_bytes(candidate.size_bytes),
            candidate.matched_pattern.dimmed()
        );
    }

    if !report.unresolved.is_empty() {
        println!("  unresolved references: {}", report.unresolved.len());
        if verbose {
            for record in &report.unresolved {
                println!(
                    "    {}:{} {:?} {:?}",
                    record.source_path.display(),
                    record.line,
                    record.kind,
                    record.raw
                );
            }
        }
    }
    if verbose {
        for route in report.routes.iter().filter(|r| r.state_changing_only) {
            println!(
                "  route {} {} ({}) is reachable only by state-changing methods",
                route.rule,
                route.endpoint,
                route.methods.iter().cloned().collect::<Vec<_>>().join(",")
            );
        }
    }
    for warning in &report.warnings {
        let location = warning
            .path
            .as_ref()
            .map(|p| format!("{}: ", p.display()))
            .unwrap_or_default();
        println!("  {} [{}] {location}{}", "warning".yellow(), warning.stage, warning.reason);
    }

    if let Some(manifest) = &report.manifest {
        println!(
            "  archive: {} ({} entries, {} skipped)",
            manifest.archive_path.display(),
            manifest.entries,
            manifest.skipped
        );
        println!("  manifest: {}", manifest.manifest_path.display());
    }
    if report.mode == RunMode::Apply && report.apply_refused.is_none() && !report.actions.is_empty() {
        println!(
            "  actions: {} ok, {} failed",
            report.outcomes.ok.to_string().green(),
            if report.outcomes.failed > 0 {
                report.outcomes.failed.to_string().red()
            } else {
                report.outcomes.failed.to_string().normal()
            }
        );
        for action in &report.actions {
            if let Outcome::Failed { reason, .. } = &action.outcome {
                println!("    {} {}: {reason}", "FAILED".red().bold(), action.path.display());
            }
        }
        for dir in &report.emptied_dirs {
            println!("  now empty: {}/", dir.display());
        }
    }
    if let Some(reason) = &report.apply_refused {
        println!("  {} {reason}", "refused:".red().bold());
    }
    if report.mode == RunMode::DryRun && report.candidate_count > 0 {
        println!("Dry run: no files were changed. Re-run with --apply to archive and remove candidates.");
    }
}

// ──────────────────── restore ────────────────────

fn run_restore(cli: &Cli, args: &RestoreArgs) -> Result<i32, CliError> {
    let config = match &cli.config {
        Some(path) => Config::load(Some(path), Path::new("."))?,
        None => Config::default(),
    };
    let (logger, logger_thread) = start_logger(&config)?;
    let result = restore_from_manifest(&args.manifest, args.root.as_deref(), args.force, &logger);
    stop_logger(&logger, logger_thread);
    let report = result?;

    match output_mode(cli) {
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&report)?;
            if let Value::Object(map) = &mut payload {
                map.insert("command".to_string(), json!("restore"));
            }
            write_json_line(&payload)?;
        }
        OutputMode::Human if !cli.quiet => {
            println!(
                "Restored {} files from {}.",
                report.restored.len().to_string().green(),
                report.archive_path.display()
            );
            if !report.skipped_existing.is_empty() {
                println!(
                    "{} files already exist and were left in place (use --force to overwrite):",
                    report.skipped_existing.len().to_string().yellow()
                );
                for path in &report.skipped_existing {
                    println!("  {}", path.display());
                }
            }
        }
        OutputMode::Human => {}
    }
    Ok(0)
}

// ──────────────────── protected ────────────────────

fn run_protected(cli: &Cli, args: &ProtectedArgs) -> Result<i32, CliError> {
    let root = resolve_root(args.root.as_deref())?;
    let mut config = Config::load(cli.config.as_deref(), &root)?;
    if args.route_scan {
        config.scan.route_scan = true;
    }
    if let Some(path) = &args.allowlist_file {
        config.protect.allowlist_file = Some(resolve_absolute_path(path));
    }
    if args.no_vcs {
        config.vcs.enabled = false;
    }

    let analysis = Pipeline::new(&root, config).analyze()?;
    let protection = &analysis.protection;

    match output_mode(cli) {
        OutputMode::Json => {
            let paths: Vec<Value> = protection
                .iter()
                .map(|path| {
                    json!({ "path": path.to_string_lossy(), "origins": protection.origins(path) })
                })
                .collect();
            let payload = json!({
                "command": "protected",
                "root": analysis.root.to_string_lossy(),
                "counts": protection.counts(),
                "paths": paths,
                "unresolved": analysis.scan.unresolved().collect::<Vec<_>>(),
                "scan_warnings": analysis.scan.warnings,
                "vcs_warning": analysis.tracked.warning,
            });
            write_json_line(&payload)?;
        }
        OutputMode::Human if !cli.quiet => {
            for path in protection.iter() {
                let origins: Vec<&str> = protection
                    .origins(path)
                    .into_iter()
                    .map(ProtectionOrigin::as_str)
                    .collect();
                println!("{}  {}", path.display(), origins.join(",").dimmed());
            }
            let counts = protection.counts();
            println!(
                "{} protected (tracked {}, referenced {}, allowlisted {})",
                counts.total.to_string().bold(),
                counts.tracked,
                counts.referenced,
                counts.allowlisted
            );
            if let Some(warning) = &analysis.tracked.warning {
                println!("{} vcs: {warning}", "warning".yellow());
            }
        }
        OutputMode::Human => {}
    }
    Ok(0)
}

// ──────────────────── helpers ────────────────────

fn resolve_root(root: Option<&Path>) -> Result<PathBuf, CliError> {
    match root {
        Some(path) => Ok(path.to_path_buf()),
        None => std::env::current_dir()
            .map_err(|e| CliError::User(format!("cannot determine current directory: {e}"))),
    }
}

type LoggerThread = Option<JoinHandle<()>>;

fn start_logger(config: &Config) -> Result<(ActivityLoggerHandle, LoggerThread), CliError> {
    match &config.log.jsonl_path {
        Some(path) => {
            let (handle, join) = spawn_logger(JsonlConfig::for_path(path))?;
            Ok((handle, Some(join)))
        }
        None => Ok((ActivityLoggerHandle::disabled(), None)),
    }
}

fn stop_logger(logger: &ActivityLoggerHandle, thread: LoggerThread) {
    logger.shutdown();
    if let Some(join) = thread {
        if join.join().is_err() {
            eprintln!("[RSW-LOG] activity logger thread panicked");
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("RSW_OUTPUT_FORMAT").ok();
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
