//! panecopy - Command-line front end for the PaneCopy transfer engine.
//!
//! Drives copy and move transfers with a progress bar, asks about
//! conflicts when requested, and exposes the engine's digest, statistics
//! and part-file cleanup helpers.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use engine::conflict::AlwaysCreate;
use engine::{
    cleanup_part_files, hash_file, spawn_statistics_scan, transfer, CancellationToken,
    ChecksumAlgorithm, Collaborators, Conflict, ConflictKind, ConflictResolver,
    DestinationPrompt, DigestRequest, EngineOptions, EntryEvent, FileState, Mode, OverwritePolicy,
    ProgressCallback, Resolution, ScanSettings, TransferCounts, TransferJob, TransferOutcome,
    TransferReport, TransferRequest, TransferStatistics,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, Level};

/// panecopy - Copy and move files between panels
#[derive(Parser, Debug)]
#[command(name = "panecopy")]
#[command(version)]
#[command(about = "Copy and move files and directories with progress tracking")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors and hide progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy sources into a destination directory
    Copy(TransferArgs),
    /// Move sources into a destination directory
    Move(TransferArgs),
    /// Print the digest of a file
    Hash(HashArgs),
    /// Count files, directories and bytes under a directory
    Stats(StatsArgs),
    /// Remove orphaned part files left by interrupted copies
    Clean(CleanArgs),
}

#[derive(Args, Debug, Clone)]
struct TransferArgs {
    /// Source files or directories
    #[arg(required = true, value_name = "SOURCE")]
    sources: Vec<PathBuf>,

    /// Destination directory
    #[arg(value_name = "DEST")]
    destination: PathBuf,

    /// What to do when a destination exists: ask, skip, overwrite, or smart
    #[arg(long, value_name = "POLICY", default_value = "skip")]
    on_conflict: String,

    /// Verify each copy with a digest: crc32, md5, sha256, or blake3
    #[arg(long, value_name = "ALGORITHM")]
    verify: Option<String>,

    /// Copy buffer size in KiB
    #[arg(long, value_name = "KIB", default_value_t = 64, env = "PANECOPY_BUFFER_KB")]
    buffer_kb: usize,

    /// Cancel instead of creating a missing destination
    #[arg(long)]
    no_create: bool,

    /// Retry failed same-device renames as copy-then-delete
    #[arg(long)]
    copy_fallback: bool,

    /// Copy the targets of symbolic links instead of the links
    #[arg(long)]
    follow_symlinks: bool,

    /// Leave hidden entries behind
    #[arg(long)]
    no_hidden: bool,

    /// Print a JSON summary on stdout
    #[arg(long)]
    json: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug, Clone)]
struct HashArgs {
    /// File to hash
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Digest algorithm: crc32, md5, sha256, or blake3
    #[arg(short, long, value_name = "ALGORITHM", default_value = "sha256")]
    algorithm: String,

    /// 32-byte key as 64 hex digits (BLAKE3 only)
    #[arg(long, value_name = "HEX")]
    key: Option<String>,

    /// Read buffer size in KiB
    #[arg(long, value_name = "KIB", default_value_t = 64, env = "PANECOPY_BUFFER_KB")]
    buffer_kb: usize,
}

#[derive(Args, Debug, Clone)]
struct StatsArgs {
    /// Directory to scan
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    /// Leave hidden entries out of the totals
    #[arg(long)]
    no_hidden: bool,

    /// Print the totals as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct CleanArgs {
    /// Directory to clean (not recursive)
    #[arg(value_name = "DIR")]
    dir: PathBuf,
}

/// Progress bar implementation of ProgressCallback
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(bar: ProgressBar) -> Self {
        BarProgress { bar }
    }
}

impl ProgressCallback for BarProgress {
    fn on_job_started(&self, job: &TransferJob) {
        self.bar.set_length(job.statistics.total_bytes.max(1));
        self.bar.set_message(format!(
            "{} {} item(s)",
            job.mode,
            job.statistics.total_entries()
        ));
    }

    fn on_file_started(&self, _job: &TransferJob, source: &Path) {
        self.bar.set_message(display_name(source));
    }

    fn on_progress(&self, done: u64, total: u64, _current: &Path) {
        self.bar.set_length(total.max(done).max(1));
        self.bar.set_position(done);
    }

    fn on_file_completed(&self, _job: &TransferJob, event: &EntryEvent<'_>) {
        if event.state == FileState::Failed {
            self.bar
                .println(format!("failed: {}", event.source.display()));
        }
    }

    fn on_job_completed(&self, _job: &TransferJob, _outcome: &TransferOutcome) {
        self.bar.finish_and_clear();
    }
}

fn progress_bar(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar
}

/// Asks the user on the terminal. Also answers the missing-destination question.
struct PromptResolver<R> {
    input: Mutex<R>,
    bar: ProgressBar,
}

impl<R: BufRead> PromptResolver<R> {
    fn new(input: R, bar: ProgressBar) -> Self {
        PromptResolver {
            input: Mutex::new(input),
            bar,
        }
    }

    /// One trimmed, lowercased answer, or None once input is exhausted.
    fn ask(&self, question: &str) -> Option<String> {
        self.bar.suspend(|| {
            eprint!("{} ", question);
            let _ = io::stderr().flush();
            let mut line = String::new();
            let mut input = self.input.lock().ok()?;
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim().to_lowercase()),
            }
        })
    }
}

impl<R: BufRead> ConflictResolver for PromptResolver<R> {
    fn resolve(&self, conflict: &Conflict<'_>) -> Resolution {
        let path = conflict.destination.display();
        let question = match conflict.kind {
            ConflictKind::FileExists => {
                format!("{} already exists. [o]verwrite, [S]kip, [c]ancel?", path)
            }
            ConflictKind::DirectoryNotEmpty => {
                format!("{} is not empty and will not be merged. [S]kip, [c]ancel?", path)
            }
            ConflictKind::TypeMismatch => {
                format!("{} exists with a different type. [S]kip, [c]ancel?", path)
            }
        };
        loop {
            let Some(answer) = self.ask(&question) else {
                return Resolution::Cancel;
            };
            if let Some(resolution) = parse_resolution(&answer) {
                return resolution;
            }
        }
    }
}

impl<R: BufRead> DestinationPrompt for PromptResolver<R> {
    fn confirm_create(&self, destination: &Path) -> bool {
        let question = format!("Create missing destination {}? [y/n]", destination.display());
        loop {
            match self.ask(&question).as_deref() {
                None => return false,
                Some("y") | Some("yes") => return true,
                Some("n") | Some("no") => return false,
                Some(_) => {}
            }
        }
    }
}

fn parse_resolution(answer: &str) -> Option<Resolution> {
    match answer {
        "o" | "overwrite" => Some(Resolution::Overwrite),
        "" | "s" | "skip" => Some(Resolution::Skip),
        "c" | "cancel" => Some(Resolution::Cancel),
        _ => None,
    }
}

fn decline_create(_destination: &Path) -> bool {
    false
}

/// How conflicts are decided for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictChoice {
    Ask,
    Policy(OverwritePolicy),
}

impl FromStr for ConflictChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ask") {
            return Ok(ConflictChoice::Ask);
        }
        OverwritePolicy::from_str(s).map(ConflictChoice::Policy)
    }
}

#[derive(Debug, Serialize)]
struct WarningSummary {
    path: PathBuf,
    kind: String,
    message: String,
}

/// Machine-readable result of a transfer.
#[derive(Debug, Serialize)]
struct TransferSummary {
    job_id: String,
    mode: Mode,
    outcome: &'static str,
    failure: Option<String>,
    bytes_transferred: u64,
    elapsed_ms: u64,
    counts: TransferCounts,
    statistics: TransferStatistics,
    warnings: Vec<WarningSummary>,
}

impl TransferSummary {
    fn from_report(report: &TransferReport, mode: Mode, elapsed: Duration) -> Self {
        let (outcome, failure) = match &report.outcome {
            TransferOutcome::Completed { .. } => ("completed", None),
            TransferOutcome::Cancelled { .. } => ("cancelled", None),
            TransferOutcome::Failed { reason, .. } => ("failed", Some(reason.to_string())),
        };
        TransferSummary {
            job_id: report.job_id.to_string(),
            mode,
            outcome,
            failure,
            bytes_transferred: report.outcome.bytes_transferred(),
            elapsed_ms: elapsed.as_millis() as u64,
            counts: report.counts,
            statistics: report.statistics,
            warnings: report
                .warnings
                .iter()
                .map(|w| WarningSummary {
                    path: w.path.clone(),
                    kind: format!("{:?}", w.error.kind()),
                    message: w.error.to_string(),
                })
                .collect(),
        }
    }
}

fn print_summary(summary: &TransferSummary) {
    eprintln!();
    match summary.outcome {
        "completed" => eprintln!("Transfer complete!"),
        "cancelled" => eprintln!("Transfer cancelled."),
        _ => eprintln!("Transfer failed."),
    }
    let counts = &summary.counts;
    eprintln!(
        "Summary: {} copied, {} renamed, {} skipped, {} failed, {} directories created",
        counts.files_copied,
        counts.files_renamed,
        counts.files_skipped,
        counts.files_failed,
        counts.dirs_created
    );
    eprintln!("Bytes transferred: {}", format_bytes(summary.bytes_transferred));
    eprintln!(
        "Elapsed: {}",
        format_duration(Duration::from_millis(summary.elapsed_ms))
    );

    if !summary.warnings.is_empty() {
        eprintln!();
        eprintln!("Warnings:");
        for warning in &summary.warnings {
            eprintln!("  {}", warning.message);
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn parse_key(hex: &str) -> Result<[u8; 32], String> {
    if hex.len() != 64 || !hex.is_ascii() {
        return Err("Key must be exactly 64 hex digits".to_string());
    }
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| format!("Invalid hex in key: '{}'", &hex[i * 2..i * 2 + 2]))?;
    }
    Ok(key)
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }
}

/// Parse command-line arguments, then run the selected command
fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let exit_code = match run_cli(&cli) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(cli: &Cli) -> Result<(), String> {
    match &cli.command {
        Command::Copy(args) => run_transfer(args, Mode::Copy, cli.quiet),
        Command::Move(args) => run_transfer(args, Mode::Move, cli.quiet),
        Command::Hash(args) => run_hash(args),
        Command::Stats(args) => run_stats(args, cli.quiet),
        Command::Clean(args) => run_clean(args),
    }
}

fn run_transfer(args: &TransferArgs, mode: Mode, quiet: bool) -> Result<(), String> {
    let choice = ConflictChoice::from_str(&args.on_conflict)?;
    let verify = args
        .verify
        .as_deref()
        .map(ChecksumAlgorithm::from_str)
        .transpose()
        .map_err(|e| e.to_string())?;

    let options = EngineOptions {
        buffer_size: args.buffer_kb.saturating_mul(1024),
        verify,
        follow_symlinks: args.follow_symlinks,
        include_hidden: !args.no_hidden,
        copy_fallback_on_rename_failure: args.copy_fallback,
        ..EngineOptions::default()
    };
    info!(
        "{} {} source(s) into {} (buffer {} KiB, conflicts: {})",
        mode,
        args.sources.len(),
        args.destination.display(),
        args.buffer_kb,
        args.on_conflict
    );

    let bar = progress_bar(!(quiet || args.json || args.no_progress));
    let progress = BarProgress::new(bar.clone());
    let prompt = PromptResolver::new(io::stdin().lock(), bar.clone());

    let resolver: &dyn ConflictResolver = match &choice {
        ConflictChoice::Policy(policy) => policy,
        ConflictChoice::Ask => &prompt,
    };
    let destination_prompt: &dyn DestinationPrompt = if args.no_create {
        &decline_create
    } else if choice == ConflictChoice::Ask {
        &prompt
    } else {
        &AlwaysCreate
    };
    let collaborators = Collaborators::new(resolver)
        .with_progress(&progress)
        .with_destination_prompt(destination_prompt);

    let request = TransferRequest::new(args.sources.iter().cloned(), &args.destination, mode);
    let started = Instant::now();
    let report = transfer(request, options, &collaborators, &CancellationToken::new());
    bar.finish_and_clear();

    let summary = TransferSummary::from_report(&report, mode, started.elapsed());
    if args.json {
        let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
        println!("{}", json);
    } else if !quiet {
        print_summary(&summary);
    }

    match report.outcome {
        TransferOutcome::Failed { reason, .. } => Err(format!("Transfer failed: {}", reason)),
        TransferOutcome::Cancelled { .. } => Err("Transfer cancelled".to_string()),
        TransferOutcome::Completed { .. } if report.counts.files_failed > 0 => {
            Err("One or more files failed to transfer".to_string())
        }
        TransferOutcome::Completed { .. } => Ok(()),
    }
}

fn run_hash(args: &HashArgs) -> Result<(), String> {
    let algorithm = ChecksumAlgorithm::from_str(&args.algorithm).map_err(|e| e.to_string())?;
    let key = args.key.as_deref().map(parse_key).transpose()?;

    let mut request =
        DigestRequest::new(&args.file, algorithm).buffer_size(args.buffer_kb.saturating_mul(1024));
    if let Some(key) = &key {
        request = request.key(key);
    }
    let value = hash_file(&request).map_err(|e| format!("Hashing failed: {}", e))?;

    println!("{}  {}", value.hex(), args.file.display());
    Ok(())
}

fn run_stats(args: &StatsArgs, quiet: bool) -> Result<(), String> {
    let settings = ScanSettings {
        include_hidden: !args.no_hidden,
        ..ScanSettings::default()
    };
    let scan = spawn_statistics_scan(args.dir.clone(), CancellationToken::new(), settings);

    let spinner = if quiet || args.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    let ticker = crossbeam_channel::tick(Duration::from_millis(100));
    while !scan.is_finished() {
        if ticker.recv().is_err() {
            break;
        }
        let partial = scan.progress();
        spinner.set_message(format!(
            "{} files, {} dirs, {}",
            partial.total_files,
            partial.total_dirs,
            format_bytes(partial.total_bytes)
        ));
        spinner.tick();
    }
    spinner.finish_and_clear();

    let totals = scan.join().map_err(|e| format!("Scan failed: {}", e))?;
    if args.json {
        let json = serde_json::to_string_pretty(&totals).map_err(|e| e.to_string())?;
        println!("{}", json);
    } else {
        println!("Files: {}", totals.total_files);
        println!("Directories: {}", totals.total_dirs);
        println!("Size: {} ({} bytes)", format_bytes(totals.total_bytes), totals.total_bytes);
    }
    Ok(())
}

fn run_clean(args: &CleanArgs) -> Result<(), String> {
    let removed =
        cleanup_part_files(&args.dir).map_err(|e| format!("Cleanup failed: {}", e))?;
    println!("Removed {} part file(s) from {}", removed, args.dir.display());
    Ok(())
}
