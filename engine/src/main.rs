use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fieldglass_audit::{read_checkpoint, AuditLog};
use fieldglass_core::{Core, CoreCollaborators, RunOptions, RunOptionsOverrides};
use fieldglass_memory::InMemoryArchivalStore;
use fieldglass_observability::{canonical_logs_dir_from_root, init_process_logging, ProcessKind};
use fieldglass_providers::{ScriptedActionBackend, ScriptedModelBackend, ScriptedPerceptionBackend, StaticAllowlist};
use fieldglass_types::Task;
use tracing::info;

const DEFAULT_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "fieldglass")]
#[command(about = "Headless desktop-automation agent core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive run_task end to end and print the resulting TaskResult as JSON.
    Run {
        description: String,
        #[arg(long)]
        state_dir: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        no_planner: bool,
    },
    /// Pretty-print a checkpoint file.
    InspectCheckpoint { path: PathBuf },
    /// Replay an audit.jsonl file and print a summary.
    ReplayAudit { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let state_dir_flag = match &cli.command {
        Command::Run { state_dir, .. } => state_dir.clone(),
        _ => None,
    };
    let logs_dir = canonical_logs_dir_from_root(&resolve_state_dir(state_dir_flag));
    let _guard = init_process_logging(ProcessKind::Cli, &logs_dir, DEFAULT_RETENTION_DAYS).ok();

    match cli.command {
        Command::Run {
            description,
            state_dir,
            config,
            no_planner,
        } => run(description, state_dir, config, no_planner).await?,
        Command::InspectCheckpoint { path } => inspect_checkpoint(&path)?,
        Command::ReplayAudit { path } => replay_audit(&path)?,
    }

    Ok(())
}

/// Drives `run_task` with the scripted collaborator doubles shipped by
/// `fieldglass-providers`. This is integration-test scaffolding: a real
/// deployment supplies its own `ModelBackend`/`PerceptionBackend`/
/// `ActionBackend` implementations to `Core::new` instead.
async fn run(description: String, state_dir: Option<String>, config: Option<PathBuf>, no_planner: bool) -> anyhow::Result<()> {
    let state_dir = resolve_state_dir(state_dir);
    info!("running task in state_dir={}", state_dir.display());

    let overrides = RunOptionsOverrides {
        enable_planner: if no_planner { Some(false) } else { None },
        ..RunOptionsOverrides::default()
    };
    let mut options = fieldglass_core::resolve(config.as_deref(), overrides).context("resolving run options")?;
    options.app_allowlist = Arc::new(StaticAllowlist::new(Vec::new()));

    let collaborators = CoreCollaborators {
        model: Arc::new(ScriptedModelBackend::ok([
            r#"{"milestones":[{"description":"complete the task","success_criteria":["task reported done"]}]}"#,
            "the task is done",
        ])),
        perception: Arc::new(ScriptedPerceptionBackend::ok(["desktop visible, nothing blocking"])),
        action: Arc::new(ScriptedActionBackend::new()),
    };

    let core = Core::new(state_dir, Arc::new(InMemoryArchivalStore::new()), collaborators);
    let task = Task::new(description);
    let result = core.run_task(task, options).await;

    match result {
        Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        Err(error) => {
            println!("{}", serde_json::to_string_pretty(&error)?);
            std::process::exit(1);
        }
    }
    Ok(())
}

fn inspect_checkpoint(path: &std::path::Path) -> anyhow::Result<()> {
    match read_checkpoint(path)? {
        Some(checkpoint) => println!("{}", serde_json::to_string_pretty(&checkpoint)?),
        None => println!("no checkpoint at {}", path.display()),
    }
    Ok(())
}

fn replay_audit(path: &std::path::Path) -> anyhow::Result<()> {
    let records = AuditLog::new(path).read_all()?;
    if records.is_empty() {
        println!("{} contains no step records", path.display());
        return Ok(());
    }

    let first = records.first().unwrap().step_index;
    let last = records.last().unwrap().step_index;
    let error_count = records.iter().filter(|r| r.error.is_some()).count();

    println!("steps {first}..={last} ({} records)", records.len());
    println!("errors: {error_count}");
    for record in &records {
        let status = if record.error.is_some() { "err " } else { "ok  " };
        println!("[{status}] step={} reasoning={}", record.step_index, record.reasoning);
    }
    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("FIELDGLASS_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".fieldglass")
}
