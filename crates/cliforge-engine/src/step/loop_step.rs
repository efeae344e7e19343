//! The loop step: iteration over an evaluated collection.
//!
//! Each iteration runs in a cloned context so the iterator bindings
//! never leak between iterations or into the parent scope; step results
//! still land in the shared tables.

use super::{AttemptError, AttemptOutcome, StepRunner};
use crate::context::ExecutionContext;
use crate::expression::Evaluator;
use crate::workflow::LoopStep;
use log::debug;
use serde_json::{json, Value};
use std::collections::HashMap;

pub(crate) async fn run(
    runner: &StepRunner,
    payload: &LoopStep,
    context: &ExecutionContext,
) -> AttemptOutcome {
    let collection = match Evaluator::new(context).evaluate(&payload.collection) {
        Ok(value) => value,
        Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
    };
    let items: Vec<Value> = match collection {
        Value::Array(items) => items,
        other => {
            return AttemptOutcome::failed(
                HashMap::new(),
                AttemptError::Other(format!(
                    "loop collection '{}' is not a sequence: {}",
                    payload.collection, other
                )),
            )
        }
    };
    debug!("loop over {} item(s)", items.len());

    let mut iteration_results = Vec::new();
    let mut failure: Option<AttemptError> = None;

    'outer: for (index, item) in items.iter().enumerate() {
        let scope = context.child();
        scope.set_variable(payload.iterator.clone(), item.clone());
        scope.set_variable(format!("{}_index", payload.iterator), json!(index));

        let mut step_summaries = Vec::new();
        for step in &payload.steps {
            let result = runner.execute_step(step, &scope).await;
            step_summaries.push(json!({
                "step_id": result.step_id,
                "success": result.success,
                "error": result.error,
            }));
            if !result.success && step.required {
                failure = Some(AttemptError::Other(format!(
                    "iteration {}: required step '{}' failed: {}",
                    index,
                    result.step_id,
                    result.error.as_deref().unwrap_or("unknown error")
                )));
                iteration_results.push(json!({
                    "index": index,
                    "item": item,
                    "results": step_summaries,
                }));
                break 'outer;
            }
        }
        iteration_results.push(json!({
            "index": index,
            "item": item,
            "results": step_summaries,
        }));
    }

    let mut output = HashMap::new();
    output.insert("collection_size".to_string(), json!(items.len()));
    output.insert("iteration_results".to_string(), json!(iteration_results));

    match failure {
        Some(error) => AttemptOutcome::failed(output, error),
        None => AttemptOutcome::ok(output),
    }
}
