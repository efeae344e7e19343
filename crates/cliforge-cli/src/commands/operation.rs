//! Catalog-driven operation commands.
//!
//! An operation either resolves to a single HTTP call or, when the
//! catalog attaches a workflow, to a full engine run. A `watch` section
//! optionally streams live status events afterwards.

use crate::cli::{EXIT_INTERRUPT, EXIT_RUNTIME};
use crate::context::AppContext;
use anyhow::{anyhow, Result};
use clap::ArgMatches;
use cliforge_core::types::{HttpRequest, OperationSpec};
use cliforge_engine::context::ExecutionContext;
use cliforge_engine::dag;
use cliforge_engine::expression::Evaluator;
use cliforge_engine::workflow::{ExecutionStatus, Workflow};
use cliforge_watch::coordinator::{ExitCondition, WatchCoordinator, WatchOptions};
use cliforge_watch::progress::spinner::Spinner;
use cliforge_watch::progress::{default_manager, ProgressIndicator};
use cliforge_watch::stream::polling::PollingClient;
use cliforge_watch::stream::socket::SocketClient;
use cliforge_watch::stream::sse::SseClient;
use cliforge_watch::stream::{ReconnectPolicy, StreamClient};
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
struct WatchSpec {
    #[serde(default = "default_transport")]
    transport: String,
    endpoint: String,
    #[serde(default = "default_watch_interval")]
    interval_seconds: f64,
    #[serde(default)]
    show_logs: bool,
    #[serde(default)]
    exit_conditions: Vec<ExitConditionSpec>,
}

fn default_transport() -> String {
    "sse".to_string()
}

fn default_watch_interval() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
struct ExitConditionSpec {
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub async fn execute(
    operation: &OperationSpec,
    matches: &ArgMatches,
    context: &AppContext,
) -> Result<i32> {
    let flags = collect_flags(operation, matches);

    if let Some(definition) = &operation.workflow {
        return execute_workflow(operation, definition.clone(), matches, context, flags).await;
    }

    let execution = ExecutionContext::new(flags.clone());
    let response = perform_call(operation, context, &execution).await?;

    let rendered = context.render(&response)?;
    println!("{}", rendered);

    if should_watch(operation, matches) {
        return run_watch(operation, context, &execution).await;
    }
    Ok(0)
}

fn collect_flags(operation: &OperationSpec, matches: &ArgMatches) -> HashMap<String, Value> {
    let mut flags = HashMap::new();
    for parameter in &operation.parameters {
        if let Ok(Some(value)) = matches.try_get_one::<String>(&parameter.name) {
            flags.insert(parameter.name.clone(), json!(value));
        }
    }
    for flag in &operation.cli_flags {
        if let Ok(Some(value)) = matches.try_get_one::<String>(&flag.name) {
            flags.insert(flag.name.clone(), json!(value));
        } else if let Some(default) = &flag.default {
            flags.insert(flag.name.clone(), default.clone());
        }
    }
    flags
}

fn should_watch(operation: &OperationSpec, matches: &ArgMatches) -> bool {
    operation.watch.is_some()
        && matches
            .try_get_one::<bool>("watch")
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false)
}

async fn execute_workflow(
    operation: &OperationSpec,
    definition: Value,
    matches: &ArgMatches,
    context: &AppContext,
    flags: HashMap<String, Value>,
) -> Result<i32> {
    let workflow =
        Workflow::from_value(definition).map_err(cliforge_core::error::CliforgeError::Workflow)?;

    if matches
        .try_get_one::<bool>("dry-run")
        .ok()
        .flatten()
        .copied()
        .unwrap_or(false)
    {
        let dag = dag::parse(&workflow).map_err(cliforge_core::error::CliforgeError::Workflow)?;
        println!("workflow '{}': {} level(s)", workflow.name, dag.execution_order.len());
        for (index, level) in dag.execution_order.iter().enumerate() {
            println!("  level {}: {}", index, level.join(", "));
        }
        return Ok(0);
    }

    let progress: Arc<dyn ProgressIndicator> = Arc::new(Spinner::default());
    default_manager().activate(Arc::clone(&progress));
    progress.start(&format!("running {}", workflow.name));

    let outcome = context.executor().execute(&workflow, flags.clone()).await?;

    match outcome.state.status {
        ExecutionStatus::Completed => {
            progress.succeed(&format!("{} completed", workflow.name));

            if should_watch(operation, matches) {
                // Rebuild the evaluation scope so the watch endpoint can
                // reference step outputs.
                let execution = ExecutionContext::new(flags);
                for result in outcome.step_results.values() {
                    execution.set_step_result(result.clone());
                }
                return run_watch(operation, context, &execution).await;
            }
            Ok(0)
        }
        status => {
            progress.fail(&format!(
                "{} {}",
                workflow.name,
                if status == ExecutionStatus::RolledBack {
                    "failed (rolled back)"
                } else {
                    "failed"
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

async fn perform_call(
    operation: &OperationSpec,
    context: &AppContext,
    execution: &ExecutionContext,
) -> Result<Value> {
    let evaluator = Evaluator::new(execution);

    // Path parameters substitute into the operation path.
    let mut path = operation.path.clone();
    for parameter in &operation.parameters {
        if parameter.location == "path" {
            let value = execution
                .flag(&parameter.name)
                .map(|v| cliforge_core::types::coerce::display_string(&v))
                .ok_or_else(|| anyhow!("missing required parameter: {}", parameter.name))?;
            path = path.replace(&format!("{{{}}}", parameter.name), &value);
        }
    }
    let path = evaluator.interpolate_string(&path)?;

    let url = format!(
        "{}/{}",
        context.base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut request = HttpRequest::new(operation.method.to_uppercase(), url);

    for parameter in &operation.parameters {
        match parameter.location.as_str() {
            "query" => {
                if let Some(value) = execution.flag(&parameter.name) {
                    request.query.push((
                        parameter.name.clone(),
                        cliforge_core::types::coerce::display_string(&value),
                    ));
                }
            }
            "header" => {
                if let Some(value) = execution.flag(&parameter.name) {
                    request.headers.insert(
                        parameter.name.clone(),
                        cliforge_core::types::coerce::display_string(&value),
                    );
                }
            }
            "body" => {
                if let Some(value) = execution.flag(&parameter.name) {
                    let body = request.body.get_or_insert_with(|| json!({}));
                    if let Value::Object(map) = body {
                        map.insert(parameter.name.clone(), value);
                    }
                }
            }
            _ => {}
        }
    }
    if request.body.is_some() {
        request
            .headers
            .entry("Content-Type".to_string())
            .or_insert_with(|| "application/json".to_string());
    }

    debug!("operation {}: {} {}", operation.operation_id, request.method, request.url);
    let response = context.transport.execute(request, &context.cancel).await?;
    if !response.is_success() {
        return Err(cliforge_core::error::CliforgeError::Http(
            cliforge_core::error::HttpError::Status {
                status: response.status,
                body: response.body,
            },
        )
        .into());
    }
    Ok(response.parsed_body())
}

async fn run_watch(
    operation: &OperationSpec,
    context: &AppContext,
    execution: &ExecutionContext,
) -> Result<i32> {
    let spec: WatchSpec = serde_json::from_value(
        operation
            .watch
            .clone()
            .ok_or_else(|| anyhow!("operation has no watch configuration"))?,
    )?;

    let endpoint = Evaluator::new(execution).interpolate_string(&spec.endpoint)?;
    let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint
    } else {
        format!(
            "{}/{}",
            context.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    };

    let _slot = default_manager().begin_watch()?;
    let cancel = context.cancel.child_token();
    let policy = ReconnectPolicy::default();
    let client: Arc<dyn StreamClient> = match spec.transport.as_str() {
        "sse" => Arc::new(SseClient::new(url, policy, cancel.clone())?),
        "socket" => Arc::new(SocketClient::new(url, policy, cancel.clone())?),
        "polling" => Arc::new(PollingClient::new(
            url,
            Duration::from_secs_f64(spec.interval_seconds.max(0.5)),
            policy,
            cancel.clone(),
        )?),
        other => return Err(anyhow!("unknown watch transport: {}", other)),
    };

    let progress: Arc<dyn ProgressIndicator> = Arc::new(Spinner::default());
    default_manager().activate(Arc::clone(&progress));

    let options = WatchOptions {
        show_logs: spec.show_logs,
        exit_conditions: spec
            .exit_conditions
            .into_iter()
            .map(|c| ExitCondition {
                event_type: c.event_type,
                condition: c.condition,
                message: c.message,
            })
            .collect(),
    };

    let coordinator = WatchCoordinator::new(client, progress, options, cancel);
    let outcome = coordinator.run().await?;
    match outcome {
        cliforge_watch::WatchOutcome::ConditionMet { .. } => Ok(0),
        cliforge_watch::WatchOutcome::Interrupted => Ok(EXIT_INTERRUPT),
        cliforge_watch::WatchOutcome::StreamEnded => Ok(EXIT_RUNTIME),
    }
}
