//! The plugin step: delegation to an external plugin executor.
//!
//! The engine itself does not know how to invoke plugins; a binary that
//! supports them registers a `PluginInvoker`. Workflows containing
//! plugin steps are rejected at load time when no invoker is present.

use super::{AttemptError, AttemptOutcome, StepRunner};
use crate::context::ExecutionContext;
use crate::expression::Evaluator;
use crate::workflow::PluginStep;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Contract a host binary implements to make plugin steps executable
#[async_trait]
pub trait PluginInvoker: Send + Sync {
    /// Invoke `command` of the named plugin with an interpolated input
    /// document; the returned value becomes the step's `result` output.
    async fn invoke(&self, plugin_name: &str, command: &str, input: Option<Value>) -> Result<Value>;
}

pub(crate) async fn run(
    runner: &StepRunner,
    payload: &PluginStep,
    context: &ExecutionContext,
) -> AttemptOutcome {
    let evaluator = Evaluator::new(context);

    let plugin_name = match evaluator.interpolate_string(&payload.plugin_name) {
        Ok(name) => name,
        Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
    };
    let command = match evaluator.interpolate_string(&payload.command) {
        Ok(command) => command,
        Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
    };
    let input = match &payload.input {
        Some(input) => match evaluator.interpolate(input) {
            Ok(input) => Some(input),
            Err(e) => {
                return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string()))
            }
        },
        None => None,
    };

    let mut output = HashMap::new();
    output.insert("plugin".to_string(), json!(plugin_name));
    output.insert("command".to_string(), json!(command));
    if let Some(input) = &input {
        output.insert("input".to_string(), input.clone());
    }

    match &runner.plugins {
        Some(invoker) => {
            debug!("plugin {} {}", plugin_name, command);
            match invoker.invoke(&plugin_name, &command, input).await {
                Ok(result) => {
                    output.insert("result".to_string(), result);
                    AttemptOutcome::ok(output)
                }
                Err(e) => AttemptOutcome::failed(
                    output,
                    AttemptError::Plugin {
                        error_type: "invocation".to_string(),
                        message: e.to_string(),
                    },
                ),
            }
        }
        None => AttemptOutcome::failed(
            output,
            AttemptError::Plugin {
                error_type: "unavailable".to_string(),
                message: format!("no plugin executor registered for '{}'", plugin_name),
            },
        ),
    }
}
