//! Builtin `workflow` command group: run, validate, list, show, clean.

use super::parse_flag_pairs;
use crate::cli::{EXIT_CONFIG, EXIT_INTERRUPT, EXIT_RUNTIME};
use crate::context::AppContext;
use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use cliforge_core::utils::parse_duration;
use cliforge_engine::dag;
use cliforge_engine::executor::ExecutionObserver;
use cliforge_engine::workflow::{ExecutionStatus, StepResult, Workflow};
use cliforge_watch::progress::multistep::{MultiStep, StepStatus};
use cliforge_watch::progress::ProgressIndicator;
use log::info;
use serde_json::json;
use std::sync::Arc;

pub fn command() -> Command {
    Command::new("workflow")
        .about("Run and inspect multi-step workflows")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Execute a workflow definition")
                .arg(Arg::new("file").required(true).value_name("FILE").help("Workflow YAML file"))
                .arg(
                    Arg::new("flag")
                        .long("flag")
                        .short('f')
                        .value_name("KEY=VALUE")
                        .action(ArgAction::Append)
                        .help("Flag binding visible to expressions"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Print the execution plan without running it"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Parse and DAG-check a workflow definition")
                .arg(Arg::new("file").required(true).value_name("FILE")),
        )
        .subcommand(Command::new("list").about("List stored workflow checkpoints"))
        .subcommand(
            Command::new("show")
                .about("Show one stored checkpoint")
                .arg(Arg::new("id").required(true).value_name("WORKFLOW_ID")),
        )
        .subcommand(
            Command::new("clean")
                .about("Delete stored checkpoints")
                .arg(
                    Arg::new("older-than")
                        .long("older-than")
                        .value_name("DURATION")
                        .help("Only delete checkpoints older than this (e.g. 7d as 168h)"),
                ),
        )
}

pub async fn execute(matches: &ArgMatches, context: &AppContext) -> Result<i32> {
    match matches.subcommand() {
        Some(("run", sub)) => run(sub, context).await,
        Some(("validate", sub)) => validate(sub),
        Some(("list", _)) => list(context),
        Some(("show", sub)) => show(sub, context),
        Some(("clean", sub)) => clean(sub, context),
        _ => Ok(EXIT_CONFIG),
    }
}

// Definition problems are configuration failures for exit-code purposes.
fn load_workflow(path: &str) -> Result<Workflow> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        cliforge_core::error::CliforgeError::Config(cliforge_core::error::ConfigError::FileRead {
            path: path.to_string(),
            reason: e.to_string(),
        })
    })?;
    let workflow =
        Workflow::from_yaml(&raw).map_err(cliforge_core::error::CliforgeError::Workflow)?;
    Ok(workflow)
}

async fn run(matches: &ArgMatches, context: &AppContext) -> Result<i32> {
    let path = matches.get_one::<String>("file").expect("required arg");
    let workflow = load_workflow(path)?;
    let flags = parse_flag_pairs(matches, "flag");

    if matches.get_flag("dry-run") {
        let dag = dag::parse(&workflow).map_err(cliforge_core::error::CliforgeError::Workflow)?;
        println!("workflow '{}': {} level(s)", workflow.name, dag.execution_order.len());
        for (index, level) in dag.execution_order.iter().enumerate() {
            println!("  level {}: {}", index, level.join(", "));
        }
        return Ok(0);
    }

    let tree = Arc::new(MultiStep::new());
    let dag = dag::parse(&workflow).map_err(cliforge_core::error::CliforgeError::Workflow)?;
    for level in &dag.execution_order {
        for id in level {
            let node = dag.node(id).expect("scheduled step exists");
            let label = node.step.description.clone().unwrap_or_else(|| id.clone());
            tree.add_step(id.clone(), label);
        }
    }
    tree.start(&format!("workflow {}", workflow.name));

    let observer = Arc::new(TreeObserver {
        tree: Arc::clone(&tree),
    });
    let outcome = context
        .executor()
        .with_observer(observer)
        .execute(&workflow, flags)
        .await?;

    match outcome.state.status {
        ExecutionStatus::Completed => {
            tree.succeed(&format!("workflow {} completed", workflow.name));
            let summary = json!({
                "workflow": workflow.name,
                "status": "completed",
                "steps": outcome.state.completed_steps,
            });
            println!("{}", context.render(&summary)?);
            Ok(0)
        }
        status => {
            tree.fail(&format!(
                "workflow {} {}",
                workflow.name,
                match status {
                    ExecutionStatus::RolledBack => "failed (rolled back)",
                    _ => "failed",
                }
            ));
            if let Some(error) = &outcome.state.error {
                eprintln!("{}", error);
            }
            if context.cancel.is_cancelled() {
                Ok(EXIT_INTERRUPT)
            } else {
                Ok(EXIT_RUNTIME)
            }
        }
    }
}

fn validate(matches: &ArgMatches) -> Result<i32> {
    let path = matches.get_one::<String>("file").expect("required arg");
    let workflow = load_workflow(path)?;
    let dag = dag::parse(&workflow).map_err(cliforge_core::error::CliforgeError::Workflow)?;
    println!(
        "{}: {} step(s), {} level(s)",
        workflow.name,
        dag.nodes.len(),
        dag.execution_order.len()
    );
    Ok(0)
}

fn list(context: &AppContext) -> Result<i32> {
    let states = context.state.list();
    let rows: Vec<serde_json::Value> = states
        .iter()
        .map(|state| {
            json!({
                "workflow_id": state.workflow_id,
                "status": state.status,
                "started": state.start_time.to_rfc3339(),
                "steps": state.completed_steps.len(),
            })
        })
        .collect();
    println!("{}", context.render(&json!(rows))?);
    Ok(0)
}

fn show(matches: &ArgMatches, context: &AppContext) -> Result<i32> {
    let id = matches.get_one::<String>("id").expect("required arg");
    let state = context.state.load(id)?;
    println!("{}", context.render(&serde_json::to_value(&state)?)?);
    Ok(0)
}

fn clean(matches: &ArgMatches, context: &AppContext) -> Result<i32> {
    let removed = match matches.get_one::<String>("older-than") {
        Some(age) => {
            let age = parse_duration(age)?;
            context.state.prune(age)
        }
        None => {
            let mut removed = 0;
            for state in context.state.list() {
                if context.state.delete(&state.workflow_id).unwrap_or(false) {
                    removed += 1;
                }
            }
            removed
        }
    };
    info!("removed {} checkpoint(s)", removed);
    println!("removed {} checkpoint(s)", removed);
    Ok(0)
}

/// Bridges executor lifecycle events onto the step tree
struct TreeObserver {
    tree: Arc<MultiStep>,
}

impl ExecutionObserver for TreeObserver {
    fn on_step_started(&self, step_id: &str) {
        self.tree.set_status(step_id, StepStatus::Running);
    }

    fn on_step_finished(&self, result: &StepResult) {
        let status = if !result.success {
            StepStatus::Failed
        } else if result.output.get("skipped").is_some_and(|v| v == &json!(true)) {
            StepStatus::Skipped
        } else {
            StepStatus::Completed
        };
        self.tree.set_status(&result.step_id, status);
    }
}
