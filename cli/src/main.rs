//! BackUP - Command-line interface for the backup engine.
//!
//! Runs one or more directory backups with live progress, accepts
//! pause/resume/cancel commands on stdin while they run, and shows the task
//! history and warnings logs kept in a history file.

use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use backup_engine::{
    format_duration, BackupService, BackupTask, EngineConfig, JsonTaskStore, MemoryTaskStore,
    ProgressEvent, ProgressHub, ProgressKind, TaskId, TaskStatus, TaskStore, TerminalEvent,
    WarningsReport,
};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// BackUP - Directory backup tool
#[derive(Parser, Debug)]
#[command(name = "backup")]
#[command(version = "0.1.0")]
#[command(about = "Back up directories with progress tracking and pause/resume/cancel")]
struct Cli {
    /// Enable verbose output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up each --src into the --dst at the same position
    Run(RunArgs),
    /// List stored backups, newest first
    History(HistoryArgs),
    /// Show a backup's warnings log
    Warnings(WarningsArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Source directory (repeatable)
    #[arg(long, value_name = "PATH", required = true)]
    src: Vec<PathBuf>,

    /// Destination directory (repeatable)
    #[arg(long, value_name = "PATH", required = true)]
    dst: Vec<PathBuf>,

    /// Number of backups copying at the same time
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Pause check interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// JSON engine configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON file keeping the task history
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    /// JSON file keeping the task history
    #[arg(long, value_name = "FILE")]
    history: PathBuf,
}

#[derive(Args, Debug)]
struct WarningsArgs {
    /// JSON file keeping the task history
    #[arg(long, value_name = "FILE")]
    history: PathBuf,

    /// Task id (defaults to the most recently finished backup)
    #[arg(long, value_name = "ID")]
    task: Option<u64>,
}

/// Parse arguments, set up logging, then dispatch
fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match run_cli(&cli) {
        Ok(code) => code,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "backup=debug,backup_engine=debug"
    } else {
        "backup=info,backup_engine=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Main CLI logic - separated for testability
fn run_cli(cli: &Cli) -> Result<i32, String> {
    match &cli.command {
        Command::Run(args) => run_backups(args, stdin_commands()),
        Command::History(args) => {
            for line in history_lines(args)? {
                println!("{}", line);
            }
            Ok(0)
        }
        Command::Warnings(args) => {
            println!("{}", warnings_text(args)?);
            Ok(0)
        }
    }
}

/// Forward stdin lines to the command loop.
///
/// The reader thread is left detached; it blocks on stdin until the process
/// exits.
fn stdin_commands() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        debug!("operator commands unavailable: {}", e);
    }
    rx
}

fn load_config(args: &RunArgs) -> Result<EngineConfig, String> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(ms) = args.poll_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    Ok(config)
}

fn open_store(history: Option<&PathBuf>) -> Result<Arc<dyn TaskStore>, String> {
    let store: Arc<dyn TaskStore> = match history {
        Some(path) => Arc::new(
            JsonTaskStore::open(path)
                .map_err(|e| format!("Cannot open history {}: {}", path.display(), e))?,
        ),
        None => Arc::new(MemoryTaskStore::new()),
    };
    Ok(store)
}

/// Run a batch of backups to completion and return the exit code.
///
/// 0 when every backup completed, 1 when any failed or was cancelled,
/// 2 when any pair was rejected before starting.
fn run_backups(args: &RunArgs, commands: Receiver<String>) -> Result<i32, String> {
    let config = load_config(args)?;
    let store = open_store(args.history.as_ref())?;
    let hub = Arc::new(ProgressHub::new());
    let service =
        BackupService::new(config, store, hub.clone()).map_err(|e| e.to_string())?;

    supervise(service, hub, args, commands)
}

/// Start the batch, relay operator commands until every task has ended,
/// then shut the service down and print the summary.
fn supervise(
    service: BackupService,
    hub: Arc<ProgressHub>,
    args: &RunArgs,
    commands: Receiver<String>,
) -> Result<i32, String> {
    let events = hub.subscribe();
    let printer = thread::Builder::new()
        .name("progress-printer".to_string())
        .spawn(move || print_progress(events))
        .map_err(|e| format!("Cannot start progress printer: {}", e))?;

    let batch = service
        .start_backup(&args.src, &args.dst)
        .map_err(|e| e.to_string())?;
    for rejected in &batch.rejected {
        eprintln!(
            "Rejected {} -> {}: {}",
            rejected.source.display(),
            rejected.destination.display(),
            rejected.error
        );
    }
    for id in &batch.started {
        println!("Started task {}", id);
    }

    while batch.started.iter().any(|id| is_live(&service, *id)) {
        match commands.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => {
                if let Some(reply) = handle_command(&service, &line) {
                    println!("{}", reply);
                }
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    let mut finished = Vec::new();
    for id in &batch.started {
        finished.push(service.status(*id).map_err(|e| e.to_string())?);
    }

    service.shutdown();
    drop(hub);
    let _ = printer.join();

    println!();
    println!("Summary:");
    for task in &finished {
        println!("  {}", task_line(task));
    }

    Ok(exit_code(batch.rejected.len(), &finished))
}

/// 2 if any pair was rejected, 1 if any task did not complete, else 0.
fn exit_code(rejected: usize, finished: &[BackupTask]) -> i32 {
    if rejected > 0 {
        2
    } else if finished.iter().any(|t| t.status != TaskStatus::Completed) {
        1
    } else {
        0
    }
}

/// True until the task's job has finished and released it.
fn is_live(service: &BackupService, id: TaskId) -> bool {
    matches!(service.wait_for(id, Duration::ZERO), Ok(None))
}

/// Execute one operator command; `None` for blank input.
fn handle_command(service: &BackupService, line: &str) -> Option<String> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;
    let id = words.next().map(|w| w.parse::<u64>().map(TaskId));

    let reply = match (verb, id) {
        ("active", None) => {
            let active = service.list_active();
            if active.is_empty() {
                "No active backups".to_string()
            } else {
                active.iter().map(task_line).collect::<Vec<_>>().join("\n")
            }
        }
        ("pause" | "resume" | "cancel" | "status", Some(Ok(id))) => match verb {
            "pause" => control_reply(service.pause(id), id, "paused"),
            "resume" => control_reply(service.resume(id), id, "resumed"),
            "cancel" => control_reply(service.cancel(id), id, "cancelled"),
            _ => match service.status(id) {
                Ok(task) => task_line(&task),
                Err(e) => e.to_string(),
            },
        },
        ("pause" | "resume" | "cancel" | "status", _) => {
            format!("Usage: {} <task id>", verb)
        }
        _ => format!(
            "Unknown command '{}'. Use pause|resume|cancel|status <id> or active",
            line.trim()
        ),
    };
    Some(reply)
}

fn control_reply(accepted: bool, id: TaskId, done: &str) -> String {
    if accepted {
        format!("Task {} {}", id, done)
    } else {
        format!("Task {} cannot be {} in its current state", id, done)
    }
}

/// Print progress lines until every sender is gone.
fn print_progress(events: Receiver<ProgressEvent>) {
    let mut last_percent: HashMap<TaskId, u8> = HashMap::new();

    for event in events {
        match event {
            ProgressEvent::Progress(p) => {
                // Only print when the whole percent changes
                if last_percent.insert(p.task_id, p.percent) == Some(p.percent)
                    && p.kind == ProgressKind::Copied
                {
                    continue;
                }
                let note = match p.kind {
                    ProgressKind::Paused => " (paused)",
                    ProgressKind::Resumed => " (resumed)",
                    ProgressKind::Started | ProgressKind::Copied => "",
                };
                eprintln!(
                    "[task {}] {} {}/{} files{} {}",
                    p.task_id,
                    progress_bar(p.percent),
                    p.processed,
                    p.total,
                    note,
                    p.current_file
                );
            }
            ProgressEvent::Control { kind, task_id, status } => {
                eprintln!("[task {}] {:?} -> {}", task_id, kind, status);
            }
            ProgressEvent::Terminal(terminal) => eprintln!("{}", terminal_line(&terminal)),
        }
    }
}

fn progress_bar(percent: u8) -> String {
    let filled = (percent / 5) as usize;
    let empty = 20 - filled;
    format!("[{}{}] {:3}%", "=".repeat(filled), " ".repeat(empty), percent)
}

fn terminal_line(event: &TerminalEvent) -> String {
    match event {
        TerminalEvent::Completed { task_id, message: Some(msg) } => {
            format!("[task {}] {}", task_id, msg)
        }
        TerminalEvent::Completed { task_id, message: None } => {
            format!("[task {}] Completed", task_id)
        }
        TerminalEvent::Cancelled { task_id } => format!("[task {}] Cancelled", task_id),
        TerminalEvent::Failed { task_id, error } => format!("[task {}] Failed: {}", task_id, error),
    }
}

fn task_line(task: &BackupTask) -> String {
    let duration = task
        .duration()
        .map(format_duration)
        .unwrap_or_else(|| "--:--:--".to_string());
    let mut line = format!(
        "#{} {:<9} {} -> {} | {} files, {} MB | started {} | {}",
        task.id,
        task.status,
        task.source_path.display(),
        task.destination_path.display(),
        task.file_count,
        task.total_size_mb,
        task.started_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
        duration
    );
    if let Some(msg) = &task.error_message {
        line.push_str(" | ");
        line.push_str(msg);
    }
    line
}

fn history_lines(args: &HistoryArgs) -> Result<Vec<String>, String> {
    let store = JsonTaskStore::open(&args.history).map_err(|e| e.to_string())?;
    let mut tasks = store.find_all().map_err(|e| e.to_string())?;
    if tasks.is_empty() {
        return Ok(vec!["No backups recorded".to_string()]);
    }
    tasks.reverse();
    Ok(tasks.iter().map(task_line).collect())
}

fn warnings_text(args: &WarningsArgs) -> Result<String, String> {
    let store = JsonTaskStore::open(&args.history).map_err(|e| e.to_string())?;
    let task = match args.task {
        Some(id) => store
            .find_by_id(TaskId(id))
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Task not found: {}", id))?,
        None => match store.find_latest_finished().map_err(|e| e.to_string())? {
            Some(task) => task,
            None => return Ok("No finished backups recorded".to_string()),
        },
    };

    let report = WarningsReport::read(&task).map_err(|e| e.to_string())?;
    Ok(match report.contents {
        None => format!("No warnings log for task {} ({})", task.id, report.path.display()),
        Some(ref text) if text.trim().is_empty() => {
            format!("Warnings log for task {} is empty", task.id)
        }
        Some(text) => format!("{}\n{}", report.path.display(), text.trim_end()),
    })
}
