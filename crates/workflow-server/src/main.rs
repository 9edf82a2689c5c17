//! Delivery orchestrator executable
//!
//! `serve` runs the engine and processes commands dropped into the inbox.
//! The other subcommands enqueue commands or print persisted state.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{anyhow, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use workflow_core::workflow::enqueue_command;
use workflow_core::{OrchestratorConfig, OrchestratorRuntime, WorkflowPaths, WorkflowStore};
use workflow_types::{
    ApprovalAction, EscalationAction, Phase, WorkflowCommand, WorkflowFilter, WorkflowId, WorkflowStatus,
};

fn cli() -> Command {
    let workflow_id = || {
        Arg::new("workflow-id")
            .value_name("WORKFLOW_ID")
            .required(true)
            .help("Workflow id")
    };

    Command::new("workflow-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-phase delivery workflow orchestrator")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .env("ORCHESTRATOR_CONFIG")
                .global(true)
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .env("ORCHESTRATOR_DATA_DIR")
                .global(true)
                .help("Data directory for workflow documents (overrides the config file)"),
        )
        .subcommand(Command::new("serve").about("Run the engine and watch the command inbox"))
        .subcommand(
            Command::new("start")
                .about("Start a new workflow")
                .arg(Arg::new("instruction").required(true).help("What should be delivered"))
                .arg(
                    Arg::new("project")
                        .long("project")
                        .short('p')
                        .value_name("PROJECT_ID")
                        .required(true)
                        .help("Project the work belongs to"),
                ),
        )
        .subcommand(
            Command::new("decide")
                .about("Submit an approval decision")
                .arg(workflow_id())
                .arg(
                    Arg::new("action")
                        .required(true)
                        .value_parser(["approve", "request_revision", "reject"])
                        .help("Decision"),
                )
                .arg(Arg::new("feedback").long("feedback").short('f').value_name("TEXT")),
        )
        .subcommand(
            Command::new("escalate")
                .about("Resolve an outstanding escalation")
                .arg(workflow_id())
                .arg(
                    Arg::new("action")
                        .required(true)
                        .value_parser(["retry", "skip", "abort"])
                        .help("Escalation action"),
                )
                .arg(Arg::new("reason").long("reason").value_name("TEXT")),
        )
        .subcommand(
            Command::new("terminate")
                .about("Terminate a workflow")
                .arg(workflow_id())
                .arg(Arg::new("reason").long("reason").value_name("TEXT")),
        )
        .subcommand(
            Command::new("rollback")
                .about("Roll a workflow back to an earlier phase")
                .arg(workflow_id())
                .arg(Arg::new("phase").required(true).value_name("PHASE")),
        )
        .subcommand(
            Command::new("status")
                .about("Print a workflow's persisted state")
                .arg(workflow_id())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the full state document"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List workflows")
                .arg(Arg::new("status").long("status").value_name("STATUS"))
                .arg(Arg::new("phase").long("phase").value_name("PHASE"))
                .arg(Arg::new("project").long("project").value_name("PROJECT_ID")),
        )
        .subcommand(Command::new("approvals").about("List workflows waiting for a human decision"))
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<OrchestratorConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            let config = OrchestratorConfig::from_file(path)?;
            log::info!("Loaded configuration from {}", path);
            config
        }
        None => {
            let data_dir = matches
                .get_one::<String>("data-dir")
                .ok_or_else(|| anyhow!("either --config or --data-dir is required"))?;
            OrchestratorConfig::new(data_dir)
        }
    };
    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.data_root = PathBuf::from(data_dir);
    }
    config.validate()?;
    Ok(config)
}

fn workflow_id_arg(matches: &ArgMatches) -> anyhow::Result<WorkflowId> {
    let raw = matches
        .get_one::<String>("workflow-id")
        .ok_or_else(|| anyhow!("workflow id is required"))?;
    Ok(WorkflowId::from_string(raw)?)
}

fn optional_text(matches: &ArgMatches, name: &str) -> Option<String> {
    matches.get_one::<String>(name).cloned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    let paths = WorkflowPaths::new(&config.data_root);

    match matches.subcommand() {
        Some(("serve", _)) => serve(config).await,
        Some(("start", sub)) => {
            let command = WorkflowCommand::Start {
                instruction: sub.get_one::<String>("instruction").cloned().unwrap_or_default(),
                project_id: sub.get_one::<String>("project").cloned().unwrap_or_default(),
            };
            enqueue(&paths, command).await
        }
        Some(("decide", sub)) => {
            let action = sub.get_one::<String>("action").map(String::as_str).unwrap_or_default();
            let command = WorkflowCommand::Decide {
                workflow_id: workflow_id_arg(sub)?,
                action: ApprovalAction::from_str(action)?,
                feedback: optional_text(sub, "feedback"),
            };
            enqueue(&paths, command).await
        }
        Some(("escalate", sub)) => {
            let action = sub.get_one::<String>("action").map(String::as_str).unwrap_or_default();
            let command = WorkflowCommand::Escalation {
                workflow_id: workflow_id_arg(sub)?,
                action: EscalationAction::from_str(action)?,
                reason: optional_text(sub, "reason"),
            };
            enqueue(&paths, command).await
        }
        Some(("terminate", sub)) => {
            let command = WorkflowCommand::Terminate {
                workflow_id: workflow_id_arg(sub)?,
                reason: optional_text(sub, "reason"),
            };
            enqueue(&paths, command).await
        }
        Some(("rollback", sub)) => {
            let phase = sub.get_one::<String>("phase").map(String::as_str).unwrap_or_default();
            let command = WorkflowCommand::Rollback {
                workflow_id: workflow_id_arg(sub)?,
                target_phase: Phase::from_str(phase)?,
            };
            enqueue(&paths, command).await
        }
        Some(("status", sub)) => show_status(&paths, &workflow_id_arg(sub)?, sub.get_flag("json")).await,
        Some(("list", sub)) => list(&paths, sub).await,
        Some(("approvals", _)) => approvals(&paths).await,
        _ => Err(anyhow!("No action specified. Use --help for options.")),
    }
}

async fn enqueue(paths: &WorkflowPaths, command: WorkflowCommand) -> anyhow::Result<()> {
    let path = enqueue_command(paths, &command)
        .await
        .with_context(|| format!("failed to enqueue {} command", command.name()))?;
    println!("Queued {} command: {}", command.name(), path.display());
    Ok(())
}

async fn serve(config: OrchestratorConfig) -> anyhow::Result<()> {
    let poll_interval = Duration::from_secs(config.inbox.poll_interval_secs);
    let runtime = OrchestratorRuntime::build(config).await?;
    runtime.restore().await?;

    let inbox = runtime.paths.inbox_dir();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => log::warn!("Inbox watcher error: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&inbox, RecursiveMode::NonRecursive)?;
    log::info!("Watching command inbox {}", inbox.display());

    let mut interval = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                return Ok(());
            }
            event = rx.recv() => {
                if event.is_none() {
                    return Err(anyhow!("inbox watcher stopped"));
                }
                runtime.watcher.process_pending().await;
            }
            _ = interval.tick() => {
                runtime.watcher.process_pending().await;
            }
        }
    }
}

async fn show_status(paths: &WorkflowPaths, id: &WorkflowId, as_json: bool) -> anyhow::Result<()> {
    let store = WorkflowStore::new(paths.clone());
    let state = store
        .load_state(id)
        .await?
        .ok_or_else(|| anyhow!("workflow {} not found", id))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("Workflow:    {}", state.workflow_id);
    println!("Project:     {}", state.project_id);
    println!("Instruction: {}", state.instruction);
    println!("Phase:       {}", state.current_phase);
    println!("Status:      {}", state.status);
    println!("Updated:     {}", state.updated_at.to_rfc3339());
    if let Some(progress) = &state.progress {
        println!(
            "Tasks:       {} total, {} completed, {} failed, {} skipped",
            progress.total_tasks, progress.completed_tasks, progress.failed_tasks, progress.skipped_tasks
        );
    }
    if let Some(quality) = &state.quality_results {
        println!(
            "Quality:     iteration {}, {}",
            quality.iteration,
            if quality.overall_passed { "passed" } else { "failed" }
        );
    }
    if let Some(escalation) = &state.escalation {
        println!(
            "Escalation:  task {} ({}) after {} retr(ies): {}",
            escalation.ticket_id, escalation.worker_type, escalation.retry_count, escalation.failure_details
        );
    }
    for entry in &state.error_log {
        println!("  [{}] {}: {}", entry.timestamp.to_rfc3339(), entry.phase, entry.message);
    }
    Ok(())
}

async fn list(paths: &WorkflowPaths, matches: &ArgMatches) -> anyhow::Result<()> {
    let filter = WorkflowFilter {
        status: matches
            .get_one::<String>("status")
            .map(|s| WorkflowStatus::from_str(s))
            .transpose()?,
        phase: matches
            .get_one::<String>("phase")
            .map(|s| Phase::from_str(s))
            .transpose()?,
        project_id: optional_text(matches, "project"),
    };

    let store = WorkflowStore::new(paths.clone());
    let mut states: Vec<_> = store
        .load_all_states()
        .await?
        .into_iter()
        .filter(|state| filter.matches(state))
        .collect();
    states.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    for state in states {
        println!(
            "{}  {:<18} {:<16} {:<12} {}",
            state.workflow_id,
            state.current_phase.as_str(),
            state.status.as_str(),
            state.project_id,
            state.instruction
        );
    }
    Ok(())
}

async fn approvals(paths: &WorkflowPaths) -> anyhow::Result<()> {
    let store = WorkflowStore::new(paths.clone());
    for state in store.load_all_states().await? {
        if state.status != WorkflowStatus::WaitingApproval {
            continue;
        }
        match &state.escalation {
            Some(escalation) => println!(
                "{}  escalation  task {}: {}",
                state.workflow_id, escalation.ticket_id, escalation.failure_details
            ),
            None => println!("{}  {} approval  {}", state.workflow_id, state.current_phase, state.instruction),
        }
    }
    Ok(())
}
