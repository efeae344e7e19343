//! The wait step: a fixed sleep or a polling loop.
//!
//! Polling tolerates everything except its own timeout: transport
//! errors, non-200 statuses and unparseable payloads are retried until
//! a terminal state or the exit condition matches.

use super::{AttemptError, AttemptOutcome, StepRunner};
use crate::context::ExecutionContext;
use crate::expression::Evaluator;
use crate::workflow::WaitStep;
use cliforge_core::types::HttpRequest;
use log::debug;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) async fn run(
    runner: &StepRunner,
    payload: &WaitStep,
    context: &ExecutionContext,
) -> AttemptOutcome {
    match &payload.endpoint {
        None => fixed_sleep(runner, payload).await,
        Some(endpoint) => poll(runner, payload, endpoint, context).await,
    }
}

async fn fixed_sleep(runner: &StepRunner, payload: &WaitStep) -> AttemptOutcome {
    let seconds = payload.seconds.unwrap_or(0.0).max(0.0);
    debug!("wait {}s", seconds);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {}
        _ = runner.cancel.cancelled() => {
            return AttemptOutcome::failed(HashMap::new(), AttemptError::Other("cancelled".to_string()));
        }
    }
    let mut output = HashMap::new();
    output.insert("waited_seconds".to_string(), json!(seconds));
    AttemptOutcome::ok(output)
}

async fn poll(
    runner: &StepRunner,
    payload: &WaitStep,
    endpoint: &str,
    context: &ExecutionContext,
) -> AttemptOutcome {
    let endpoint = match Evaluator::new(context).interpolate_string(endpoint) {
        Ok(endpoint) => endpoint,
        Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
    };
    let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.clone()
    } else {
        format!(
            "{}/{}",
            runner.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    };

    let interval = Duration::from_secs_f64(payload.interval_seconds.max(0.1));
    let deadline = Instant::now() + Duration::from_secs(payload.timeout_seconds);
    let mut polls = 0u64;

    loop {
        if Instant::now() >= deadline {
            return AttemptOutcome::failed(
                HashMap::new(),
                AttemptError::Other(format!(
                    "polling {} exceeded {}s ({} poll(s))",
                    endpoint, payload.timeout_seconds, polls
                )),
            );
        }

        polls += 1;
        let request = HttpRequest::get(url.clone());
        match runner.transport.execute(request, &runner.cancel).await {
            Ok(response) if response.status == 200 => {
                let body: Value = match serde_json::from_str(&response.body) {
                    Ok(body) => body,
                    Err(_) => {
                        // Not JSON yet; the operation may still be warming up.
                        debug!("poll {}: non-JSON payload, retrying", polls);
                        if !sleep_or_cancel(runner, interval).await {
                            return cancelled();
                        }
                        continue;
                    }
                };

                if let Some(field) = &payload.status_field {
                    if let Some(status) = body.get(field.as_str()).and_then(Value::as_str) {
                        if payload.terminal_states.iter().any(|s| s == status) {
                            let mut output = HashMap::new();
                            output.insert("final_status".to_string(), json!(status));
                            output.insert("response".to_string(), body);
                            output.insert("polls".to_string(), json!(polls));
                            return AttemptOutcome::ok(output);
                        }
                    }
                }

                if let Some(condition) = &payload.condition {
                    let evaluator = Evaluator::new(context).bind("response", body.clone());
                    match evaluator.evaluate_condition(condition) {
                        Ok(true) => {
                            let mut output = HashMap::new();
                            output.insert("response".to_string(), body);
                            output.insert("polls".to_string(), json!(polls));
                            return AttemptOutcome::ok(output);
                        }
                        Ok(false) => {}
                        Err(e) => {
                            return AttemptOutcome::failed(
                                HashMap::new(),
                                AttemptError::Other(e.to_string()),
                            )
                        }
                    }
                }
            }
            Ok(response) => {
                debug!("poll {}: HTTP {}, retrying", polls, response.status);
            }
            Err(e) => {
                if runner.cancel.is_cancelled() {
                    return cancelled();
                }
                debug!("poll {}: transport error ({}), retrying", polls, e);
            }
        }

        if !sleep_or_cancel(runner, interval).await {
            return cancelled();
        }
    }
}

async fn sleep_or_cancel(runner: &StepRunner, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = runner.cancel.cancelled() => false,
    }
}

fn cancelled() -> AttemptOutcome {
    AttemptOutcome::failed(HashMap::new(), AttemptError::Other("cancelled".to_string()))
}
