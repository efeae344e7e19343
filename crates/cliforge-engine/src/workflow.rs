//! Declarative workflow definitions.
//!
//! A workflow is an ordered sequence of steps, each carrying exactly one
//! variant payload (api_call, plugin, conditional, loop, wait, parallel
//! or noop) plus the shared attributes: dependencies, guard condition,
//! retry policy, rollback step and output mappings. Definitions are
//! immutable once parsed.

use chrono::{DateTime, Utc};
use cliforge_core::error::WorkflowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "default_workflow_name")]
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

fn default_workflow_name() -> String {
    "workflow".to_string()
}

impl Workflow {
    pub fn from_yaml(raw: &str) -> Result<Self, WorkflowError> {
        let workflow: Workflow =
            serde_yaml::from_str(raw).map_err(|e| WorkflowError::ParseFailed(e.to_string()))?;
        workflow.validate_variants()?;
        Ok(workflow)
    }

    pub fn from_value(value: Value) -> Result<Self, WorkflowError> {
        let workflow: Workflow =
            serde_json::from_value(value).map_err(|e| WorkflowError::ParseFailed(e.to_string()))?;
        workflow.validate_variants()?;
        Ok(workflow)
    }

    fn validate_variants(&self) -> Result<(), WorkflowError> {
        for step in self.all_steps() {
            step.variant()?;
        }
        Ok(())
    }

    /// Every step in the workflow, nested ones included
    pub fn all_steps(&self) -> Vec<&Step> {
        let mut out = Vec::new();
        for step in &self.steps {
            collect_steps(step, &mut out);
        }
        out
    }
}

fn collect_steps<'a>(step: &'a Step, out: &mut Vec<&'a Step>) {
    out.push(step);
    if let Some(conditional) = &step.conditional {
        for nested in conditional.then.iter().chain(conditional.otherwise.iter()) {
            collect_steps(nested, out);
        }
    }
    if let Some(loop_step) = &step.loop_step {
        for nested in &loop_step.steps {
            collect_steps(nested, out);
        }
    }
    if let Some(parallel) = &step.parallel {
        for nested in &parallel.steps {
            collect_steps(nested, out);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub fail_fast: bool,
    /// 0 disables the workflow timeout
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            parallel: false,
            fail_fast: false,
            timeout_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Guard expression; empty or missing means the step always runs
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Compensating step pushed on success, executed on workflow failure
    #[serde(default)]
    pub rollback: Option<Box<Step>>,
    /// output name -> expression evaluated after the step ran
    #[serde(default)]
    pub output: HashMap<String, String>,

    #[serde(default)]
    pub api_call: Option<ApiCallStep>,
    #[serde(default)]
    pub plugin: Option<PluginStep>,
    #[serde(default)]
    pub conditional: Option<ConditionalStep>,
    #[serde(default, rename = "loop")]
    pub loop_step: Option<LoopStep>,
    #[serde(default)]
    pub wait: Option<WaitStep>,
    #[serde(default)]
    pub parallel: Option<ParallelStep>,
    #[serde(default)]
    pub noop: Option<NoopStep>,
}

impl Step {
    /// The populated variant; more or fewer than one is a definition error
    pub fn variant(&self) -> Result<StepVariant<'_>, WorkflowError> {
        let mut found = Vec::new();
        if let Some(api_call) = &self.api_call {
            found.push(StepVariant::ApiCall(api_call));
        }
        if let Some(plugin) = &self.plugin {
            found.push(StepVariant::Plugin(plugin));
        }
        if let Some(conditional) = &self.conditional {
            found.push(StepVariant::Conditional(conditional));
        }
        if let Some(loop_step) = &self.loop_step {
            found.push(StepVariant::Loop(loop_step));
        }
        if let Some(wait) = &self.wait {
            found.push(StepVariant::Wait(wait));
        }
        if let Some(parallel) = &self.parallel {
            found.push(StepVariant::Parallel(parallel));
        }
        if self.noop.is_some() {
            found.push(StepVariant::Noop);
        }

        match found.len() {
            1 => Ok(found.into_iter().next().expect("length checked")),
            0 => Err(WorkflowError::InvalidVariant {
                step: self.id.clone(),
                reason: "no variant payload populated".to_string(),
            }),
            n => Err(WorkflowError::InvalidVariant {
                step: self.id.clone(),
                reason: format!("{} variant payloads populated", n),
            }),
        }
    }

    /// Every string-valued attribute, scanned for implicit references
    pub fn string_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        if let Some(condition) = &self.condition {
            fields.push(condition.as_str());
        }
        for expression in self.output.values() {
            fields.push(expression.as_str());
        }
        if let Some(api_call) = &self.api_call {
            fields.push(api_call.endpoint.as_str());
            for value in api_call.headers.values() {
                fields.push(value.as_str());
            }
            for value in api_call.query.values() {
                fields.push(value.as_str());
            }
            if let Some(body) = &api_call.body {
                collect_value_strings(body, &mut fields);
            }
        }
        if let Some(plugin) = &self.plugin {
            fields.push(plugin.plugin_name.as_str());
            fields.push(plugin.command.as_str());
            if let Some(input) = &plugin.input {
                collect_value_strings(input, &mut fields);
            }
        }
        if let Some(conditional) = &self.conditional {
            fields.push(conditional.condition.as_str());
        }
        if let Some(loop_step) = &self.loop_step {
            fields.push(loop_step.collection.as_str());
        }
        if let Some(wait) = &self.wait {
            if let Some(endpoint) = &wait.endpoint {
                fields.push(endpoint.as_str());
            }
            if let Some(condition) = &wait.condition {
                fields.push(condition.as_str());
            }
        }
        fields
    }
}

fn collect_value_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s.as_str()),
        Value::Array(items) => {
            for item in items {
                collect_value_strings(item, out);
            }
        }
        Value::Object(map) => {
            for child in map.values() {
                collect_value_strings(child, out);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StepVariant<'a> {
    ApiCall(&'a ApiCallStep),
    Plugin(&'a PluginStep),
    Conditional(&'a ConditionalStep),
    Loop(&'a LoopStep),
    Wait(&'a WaitStep),
    Parallel(&'a ParallelStep),
    Noop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallStep {
    pub endpoint: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStep {
    pub plugin_name: String,
    pub command: String,
    #[serde(default)]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalStep {
    pub condition: String,
    #[serde(default)]
    pub then: Vec<Step>,
    #[serde(default, rename = "else")]
    pub otherwise: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStep {
    /// Expression producing the sequence to iterate
    pub collection: String,
    #[serde(default = "default_iterator")]
    pub iterator: String,
    pub steps: Vec<Step>,
}

fn default_iterator() -> String {
    "item".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitStep {
    /// Fixed sleep when no endpoint is configured
    #[serde(default)]
    pub seconds: Option<f64>,
    /// Polling target
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: f64,
    #[serde(default = "default_poll_timeout")]
    pub timeout_seconds: u64,
    /// Terminal-state match on a field of the parsed response
    #[serde(default)]
    pub status_field: Option<String>,
    #[serde(default)]
    pub terminal_states: Vec<String>,
    /// Alternative exit condition evaluated with `response` bound
    #[serde(default)]
    pub condition: Option<String>,
}

fn default_poll_interval() -> f64 {
    2.0
}

fn default_poll_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelStep {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NoopStep {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Option<Backoff>,
    #[serde(default)]
    pub retryable_errors: Option<Vec<ErrorMatch>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backoff {
    pub kind: BackoffKind,
    #[serde(default)]
    pub initial_seconds: f64,
    #[serde(default)]
    pub multiplier: f64,
    /// 0 disables the clamp
    #[serde(default)]
    pub max_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

/// Predicate deciding whether a failed attempt may be retried
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMatch {
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub error_type: Option<String>,
}

/// Outcome of one step, committed to the execution context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: HashMap<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retries: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub duration: Duration,
}

impl StepResult {
    pub fn success(step_id: impl Into<String>, output: HashMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            success: true,
            output,
            error: None,
            retries: 0,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
        }
    }

    pub fn failure(step_id: impl Into<String>, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            success: false,
            output: HashMap::new(),
            error: Some(error.into()),
            retries: 0,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

/// Checkpointable state of one workflow invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub workflow_id: String,
    #[serde(default)]
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionState {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            status: ExecutionStatus::Pending,
            completed_steps: Vec::new(),
            current_step: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_workflow() {
        let workflow = Workflow::from_yaml(
            r#"
name: provision
steps:
  - id: create
    api_call:
      endpoint: /resources
      method: POST
  - id: done
    depends_on: [create]
    noop: {}
"#,
        )
        .unwrap();
        assert_eq!(workflow.name, "provision");
        assert_eq!(workflow.steps.len(), 2);
        assert!(matches!(workflow.steps[0].variant().unwrap(), StepVariant::ApiCall(_)));
        assert!(matches!(workflow.steps[1].variant().unwrap(), StepVariant::Noop));
    }

    #[test]
    fn rejects_cross_variant_payloads() {
        let err = Workflow::from_yaml(
            r#"
steps:
  - id: bad
    api_call:
      endpoint: /x
    noop: {}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidVariant { .. }));
    }

    #[test]
    fn rejects_steps_without_a_variant() {
        let err = Workflow::from_yaml(
            r#"
steps:
  - id: empty
"#,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidVariant { .. }));
    }

    #[test]
    fn all_steps_walks_nested_blocks() {
        let workflow = Workflow::from_yaml(
            r#"
steps:
  - id: branch
    conditional:
      condition: "flags.fast == true"
      then:
        - id: fast_path
          noop: {}
      else:
        - id: slow_path
          noop: {}
  - id: fan
    parallel:
      steps:
        - id: fan_a
          noop: {}
        - id: fan_b
          noop: {}
"#,
        )
        .unwrap();
        let ids: Vec<_> = workflow.all_steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["branch", "fast_path", "slow_path", "fan", "fan_a", "fan_b"]);
    }

    #[test]
    fn string_fields_cover_bodies_recursively() {
        let workflow = Workflow::from_yaml(
            r#"
steps:
  - id: call
    api_call:
      endpoint: "/items/{create.id}"
      headers:
        X-Trace: "{flags.trace}"
      body:
        nested:
          - "{steps.create.name}"
    output:
      item: "steps.call.response"
"#,
        )
        .unwrap();
        let fields = workflow.steps[0].string_fields();
        assert!(fields.contains(&"/items/{create.id}"));
        assert!(fields.contains(&"{flags.trace}"));
        assert!(fields.contains(&"{steps.create.name}"));
        assert!(fields.contains(&"steps.call.response"));
    }
}
