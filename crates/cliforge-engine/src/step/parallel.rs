//! The parallel step: one task per inner step over cloned contexts.

use super::{AttemptError, AttemptOutcome, StepRunner};
use crate::context::ExecutionContext;
use log::debug;
use serde_json::json;
use std::collections::HashMap;
use tokio::task::JoinSet;

pub(crate) async fn run(
    runner: &StepRunner,
    payload: &crate::workflow::ParallelStep,
    context: &ExecutionContext,
) -> AttemptOutcome {
    debug!("parallel fan-out over {} step(s)", payload.steps.len());

    let mut set = JoinSet::new();
    for (index, step) in payload.steps.iter().cloned().enumerate() {
        let runner = runner.clone();
        let scope = context.child();
        set.spawn(async move {
            let result = runner.execute_step(&step, &scope).await;
            (index, result)
        });
    }

    // The level completes only when every task has returned; the first
    // failure becomes the step error but siblings are never cancelled.
    let mut slots: Vec<Option<serde_json::Value>> = vec![None; payload.steps.len()];
    let mut failure: Option<AttemptError> = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => {
                if !result.success && failure.is_none() {
                    failure = Some(AttemptError::Other(format!(
                        "parallel step '{}' failed: {}",
                        result.step_id,
                        result.error.as_deref().unwrap_or("unknown error")
                    )));
                }
                slots[index] = Some(json!({
                    "step_id": result.step_id,
                    "success": result.success,
                    "error": result.error,
                }));
            }
            Err(e) => {
                if failure.is_none() {
                    failure = Some(AttemptError::Other(format!("parallel task panicked: {}", e)));
                }
            }
        }
    }

    let parallel_results: Vec<_> = slots.into_iter().flatten().collect();
    let mut output = HashMap::new();
    output.insert("parallel_results".to_string(), json!(parallel_results));

    match failure {
        Some(error) => AttemptOutcome::failed(output, error),
        None => AttemptOutcome::ok(output),
    }
}
