//! The conditional step: branch selection over nested steps.

use super::{AttemptError, AttemptOutcome, StepRunner};
use crate::context::ExecutionContext;
use crate::expression::Evaluator;
use crate::workflow::ConditionalStep;
use log::debug;
use serde_json::json;
use std::collections::HashMap;

pub(crate) async fn run(
    runner: &StepRunner,
    payload: &ConditionalStep,
    context: &ExecutionContext,
) -> AttemptOutcome {
    let selected = match Evaluator::new(context).evaluate_condition(&payload.condition) {
        Ok(selected) => selected,
        Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
    };
    let (branch, steps) = if selected {
        ("then", &payload.then)
    } else {
        ("else", &payload.otherwise)
    };
    debug!("conditional took the {} branch ({} step(s))", branch, steps.len());

    let mut branch_results = Vec::new();
    let mut failure: Option<AttemptError> = None;
    for step in steps {
        let result = runner.execute_step(step, context).await;
        branch_results.push(json!({
            "step_id": result.step_id,
            "success": result.success,
            "error": result.error,
        }));
        if !result.success && step.required {
            failure = Some(AttemptError::Other(format!(
                "required step '{}' failed: {}",
                result.step_id,
                result.error.as_deref().unwrap_or("unknown error")
            )));
            break;
        }
    }

    let mut output = HashMap::new();
    output.insert("condition".to_string(), json!(selected));
    output.insert("branch".to_string(), json!(branch));
    output.insert("branch_results".to_string(), json!(branch_results));

    match failure {
        Some(error) => AttemptOutcome::failed(output, error),
        None => AttemptOutcome::ok(output),
    }
}
