//! Top-level workflow driver.
//!
//! Walks the parsed DAG level by level, fanning out within a level when
//! the workflow allows it, enforcing the workflow timeout and fail-fast
//! policy between levels, pushing rollback actions for successful steps
//! and unwinding them on failure.

use crate::context::{ExecutionContext, RollbackAction};
use crate::dag;
use crate::rollback::{RollbackManager, RollbackMode, RollbackStatus};
use crate::state::StateManager;
use crate::step::StepRunner;
use crate::workflow::{ExecutionState, ExecutionStatus, Step, StepResult, Workflow};
use cliforge_core::error::{CliforgeError, StepError, TimeoutError};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Lifecycle hooks a progress sink can observe. All methods default to
/// no-ops; only top-level steps are reported.
pub trait ExecutionObserver: Send + Sync {
    fn on_level_started(&self, _level: usize, _step_ids: &[String]) {}
    fn on_step_started(&self, _step_id: &str) {}
    fn on_step_finished(&self, _result: &StepResult) {}
    fn on_rollback_started(&self, _actions: usize) {}
}

struct NullObserver;

impl ExecutionObserver for NullObserver {}

/// What one workflow invocation produced
#[derive(Debug)]
pub struct WorkflowOutcome {
    pub state: ExecutionState,
    pub step_results: HashMap<String, StepResult>,
    pub rollback: Option<RollbackStatus>,
}

impl WorkflowOutcome {
    pub fn succeeded(&self) -> bool {
        self.state.status == ExecutionStatus::Completed
    }
}

pub struct WorkflowExecutor {
    runner: StepRunner,
    state_manager: Option<Arc<StateManager>>,
    rollback_mode: RollbackMode,
    observer: Arc<dyn ExecutionObserver>,
}

impl WorkflowExecutor {
    pub fn new(runner: StepRunner) -> Self {
        Self {
            runner,
            state_manager: None,
            rollback_mode: RollbackMode::default(),
            observer: Arc::new(NullObserver),
        }
    }

    pub fn with_state_manager(mut self, state_manager: Arc<StateManager>) -> Self {
        self.state_manager = Some(state_manager);
        self
    }

    pub fn with_rollback_mode(mut self, mode: RollbackMode) -> Self {
        self.rollback_mode = mode;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run a workflow to completion. `Err` means the workflow never
    /// started (definition or DAG errors); execution failures are
    /// reported through the outcome's state.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        flags: HashMap<String, Value>,
    ) -> Result<WorkflowOutcome, CliforgeError> {
        let dag = dag::parse(workflow).map_err(CliforgeError::Workflow)?;

        // Plugin steps are rejected up front unless an invoker exists.
        if self.runner.plugins.is_none() {
            for step in workflow.all_steps() {
                if let Some(plugin) = &step.plugin {
                    return Err(CliforgeError::Step(StepError::PluginUnavailable {
                        step: step.id.clone(),
                        plugin: plugin.plugin_name.clone(),
                    }));
                }
            }
        }

        let context = ExecutionContext::new(flags);
        let mut state = ExecutionState::new(workflow.name.clone());
        state.status = ExecutionStatus::Running;
        self.checkpoint(&state);

        let started = Instant::now();
        let mut pushed_rollbacks: HashSet<String> = HashSet::new();
        let mut abort: Option<CliforgeError> = None;

        info!(
            "workflow '{}': {} level(s), parallel={}",
            workflow.name,
            dag.execution_order.len(),
            workflow.settings.parallel
        );

        for (level_index, level) in dag.execution_order.iter().enumerate() {
            if self.runner.cancel_token().is_cancelled() {
                abort = Some(CliforgeError::Cancelled(workflow.name.clone()));
                break;
            }
            if workflow.settings.timeout_seconds > 0
                && started.elapsed().as_secs() > workflow.settings.timeout_seconds
            {
                abort = Some(CliforgeError::Timeout(TimeoutError::Workflow {
                    workflow_id: workflow.name.clone(),
                    limit_seconds: workflow.settings.timeout_seconds,
                }));
                break;
            }

            debug!("level {}: {:?}", level_index, level);
            self.observer.on_level_started(level_index, level);
            let steps: Vec<&Step> = level
                .iter()
                .map(|id| &dag.node(id).expect("scheduled step exists").step)
                .collect();

            let level_results = if workflow.settings.parallel && steps.len() > 1 {
                self.run_level_parallel(&steps, &context).await
            } else {
                let mut results = Vec::with_capacity(steps.len());
                for step in &steps {
                    state.current_step = Some(step.id.clone());
                    self.observer.on_step_started(&step.id);
                    let result = self.runner.execute_step(step, &context).await;
                    self.observer.on_step_finished(&result);
                    results.push(result);
                }
                results
            };

            // Rollback actions for every newly successful step that
            // declares one, nested steps included, in commit order.
            for step_id in context.completed_steps() {
                if pushed_rollbacks.contains(&step_id) {
                    continue;
                }
                let Some(node) = dag.node(&step_id) else {
                    continue;
                };
                let Some(rollback) = &node.step.rollback else {
                    continue;
                };
                if context.get_step_result(&step_id).is_some_and(|r| r.success) {
                    pushed_rollbacks.insert(step_id.clone());
                    context.add_rollback_action(RollbackAction {
                        step_id: step_id.clone(),
                        action: (**rollback).clone(),
                    });
                }
            }

            state.completed_steps = context.completed_steps();
            self.checkpoint(&state);

            // Fail-fast and required-step policy, applied between levels.
            let mut level_error: Option<String> = None;
            for (step, result) in steps.iter().zip(&level_results) {
                if result.success {
                    continue;
                }
                let message = result.error.clone().unwrap_or_else(|| "unknown error".to_string());
                if step.required {
                    abort = Some(CliforgeError::Step(StepError::RequiredStepFailed {
                        step: step.id.clone(),
                        reason: message.clone(),
                    }));
                    break;
                }
                if level_error.is_none() {
                    level_error = Some(format!("step '{}' failed: {}", step.id, message));
                }
            }
            if abort.is_none() {
                if let Some(message) = level_error {
                    if workflow.settings.fail_fast {
                        abort = Some(CliforgeError::Step(StepError::ExecutionFailed {
                            step: workflow.name.clone(),
                            reason: message,
                        }));
                    } else {
                        warn!("workflow '{}': {} (continuing)", workflow.name, message);
                    }
                }
            }
            if abort.is_some() {
                break;
            }
        }

        let outcome = match abort {
            None => {
                state.status = ExecutionStatus::Completed;
                state.current_step = None;
                state.completed_steps = context.completed_steps();
                self.checkpoint(&state);
                WorkflowOutcome {
                    state,
                    step_results: collect_results(&context),
                    rollback: None,
                }
            }
            Some(error) => {
                state.status = ExecutionStatus::Failed;
                state.error = Some(error.to_string());
                self.checkpoint(&state);

                self.observer.on_rollback_started(context.rollback_stack_len());
                let rollback_status = RollbackManager::new(self.rollback_mode)
                    .execute(&self.runner, &context)
                    .await;
                if rollback_status.is_clean() {
                    state.status = ExecutionStatus::RolledBack;
                } else {
                    state.error = Some(format!(
                        "{}; rollback: {} of {} action(s) failed",
                        error,
                        rollback_status.errors.len(),
                        rollback_status.executed
                    ));
                }
                state.completed_steps = context.completed_steps();
                self.checkpoint(&state);

                WorkflowOutcome {
                    state,
                    step_results: collect_results(&context),
                    rollback: Some(rollback_status),
                }
            }
        };

        Ok(outcome)
    }

    /// Fan a level out into one task per step. The level only completes
    /// when every task has returned; the first failure becomes the
    /// level error but siblings run to completion regardless.
    async fn run_level_parallel(&self, steps: &[&Step], context: &ExecutionContext) -> Vec<StepResult> {
        let mut set = JoinSet::new();
        for (index, step) in steps.iter().map(|s| (*s).clone()).enumerate() {
            let runner = self.runner.clone();
            let scope = context.child();
            self.observer.on_step_started(&step.id);
            set.spawn(async move {
                let result = runner.execute_step(&step, &scope).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<StepResult>> = vec![None; steps.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    self.observer.on_step_finished(&result);
                    slots[index] = Some(result);
                }
                Err(e) => warn!("level task panicked: {}", e),
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| StepResult::failure(&steps[index].id, "task panicked"))
            })
            .collect()
    }

    fn checkpoint(&self, state: &ExecutionState) {
        if let Some(manager) = &self.state_manager {
            manager.checkpoint(state);
        }
    }
}

fn collect_results(context: &ExecutionContext) -> HashMap<String, StepResult> {
    context
        .completed_steps()
        .into_iter()
        .filter_map(|id| context.get_step_result(&id).map(|result| (id, result)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use tokio_util::sync::CancellationToken;

    fn executor_with(transport: Arc<MockTransport>) -> WorkflowExecutor {
        let runner = StepRunner::new(transport, "https://api.test", CancellationToken::new());
        WorkflowExecutor::new(runner)
    }

    fn parse(raw: &str) -> Workflow {
        Workflow::from_yaml(raw).expect("workflow parses")
    }

    #[tokio::test]
    async fn empty_workflow_completes_immediately() {
        let transport = Arc::new(MockTransport::new());
        let outcome = executor_with(transport)
            .execute(&parse("steps: []"), HashMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        assert!(outcome.step_results.is_empty());
    }

    #[tokio::test]
    async fn two_step_dependency_runs_in_order() {
        let transport = Arc::new(MockTransport::new());
        transport.route("/resources", 201, r#"{"id": "r1"}"#);
        transport.route("/notify", 200, "{}");

        let workflow = parse(
            r#"
name: provision
steps:
  - id: create
    api_call:
      endpoint: /resources
      method: POST
    output:
      id: "steps.create.response.id"
  - id: notify
    depends_on: [create]
    api_call:
      endpoint: /notify
      method: POST
      body:
        resource: "{create.id}"
"#,
        );
        let outcome = executor_with(transport.clone())
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        assert_eq!(outcome.state.completed_steps, vec!["create", "notify"]);
        assert_eq!(
            outcome.step_results["create"].output["id"],
            serde_json::json!("r1")
        );
        // notify's body saw create's mapped output
        let requests = transport.requests();
        let notify_body = requests[1].body.as_ref().unwrap();
        assert_eq!(notify_body["resource"], serde_json::json!("r1"));
    }

    #[tokio::test]
    async fn required_failure_rolls_back() {
        let transport = Arc::new(MockTransport::new());
        transport.route("/resources", 201, r#"{"id": "r1"}"#);
        transport.route("/explode", 500, r#"{"message": "boom"}"#);
        transport.route("/resources/r1", 200, "{}");

        let workflow = parse(
            r#"
name: doomed
steps:
  - id: create
    api_call:
      endpoint: /resources
      method: POST
    output:
      id: "steps.create.response.id"
    rollback:
      id: delete_create
      api_call:
        endpoint: "/resources/{create.id}"
        method: DELETE
  - id: fail
    required: true
    depends_on: [create]
    api_call:
      endpoint: /explode
"#,
        );
        let outcome = executor_with(transport.clone())
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        assert_eq!(outcome.state.status, ExecutionStatus::RolledBack);
        let rollback = outcome.rollback.unwrap();
        assert!(rollback.is_clean());
        assert_eq!(rollback.executed, 1);

        let paths = transport.requested_paths();
        assert_eq!(paths, vec!["/resources", "/explode", "/resources/r1"]);
        let delete = &transport.requests()[2];
        assert_eq!(delete.method, "DELETE");
    }

    #[tokio::test]
    async fn required_failure_blocks_next_level() {
        let transport = Arc::new(MockTransport::new());
        transport.route("/explode", 500, "{}");
        transport.route("/later", 200, "{}");

        let workflow = parse(
            r#"
steps:
  - id: fail
    required: true
    api_call:
      endpoint: /explode
  - id: later
    depends_on: [fail]
    api_call:
      endpoint: /later
"#,
        );
        let outcome = executor_with(transport.clone())
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        assert_ne!(outcome.state.status, ExecutionStatus::Completed);
        assert!(!transport.requested_paths().contains(&"/later".to_string()));
    }

    #[tokio::test]
    async fn optional_failure_continues_without_fail_fast() {
        let transport = Arc::new(MockTransport::new());
        transport.route("/flaky", 500, "{}");
        transport.route("/after", 200, "{}");

        let workflow = parse(
            r#"
steps:
  - id: flaky
    api_call:
      endpoint: /flaky
  - id: after
    depends_on: [flaky]
    api_call:
      endpoint: /after
"#,
        );
        let outcome = executor_with(transport.clone())
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        assert!(transport.requested_paths().contains(&"/after".to_string()));
        assert!(!outcome.step_results["flaky"].success);
    }

    #[tokio::test]
    async fn fail_fast_aborts_after_the_level() {
        let transport = Arc::new(MockTransport::new());
        transport.route("/flaky", 500, "{}");
        transport.route("/after", 200, "{}");

        let workflow = parse(
            r#"
settings:
  fail_fast: true
steps:
  - id: flaky
    api_call:
      endpoint: /flaky
  - id: after
    depends_on: [flaky]
    api_call:
      endpoint: /after
"#,
        );
        let outcome = executor_with(transport.clone())
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        assert_ne!(outcome.state.status, ExecutionStatus::Completed);
        assert!(!transport.requested_paths().contains(&"/after".to_string()));
    }

    #[tokio::test]
    async fn conditional_skip_makes_no_http_call() {
        let transport = Arc::new(MockTransport::new());

        let workflow = parse(
            r#"
steps:
  - id: guarded
    condition: "flags.enabled == true"
    api_call:
      endpoint: /guarded
"#,
        );
        let mut flags = HashMap::new();
        flags.insert("enabled".to_string(), serde_json::json!(false));

        let outcome = executor_with(transport.clone())
            .execute(&workflow, flags)
            .await
            .unwrap();

        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        let result = &outcome.step_results["guarded"];
        assert!(result.success);
        assert_eq!(result.output["skipped"], serde_json::json!(true));
        assert_eq!(result.output["reason"], serde_json::json!("condition not met"));
        assert_eq!(result.duration, std::time::Duration::ZERO);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn parallel_steps_overlap_in_time() {
        let transport = Arc::new(MockTransport::new());
        transport.set_delay(std::time::Duration::from_millis(10));

        let workflow = parse(
            r#"
steps:
  - id: fan
    parallel:
      steps:
        - id: fan_a
          api_call:
            endpoint: /a
        - id: fan_b
          api_call:
            endpoint: /b
"#,
        );
        let started = Instant::now();
        let outcome = executor_with(transport.clone())
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        assert!(elapsed < std::time::Duration::from_millis(50), "took {:?}", elapsed);
        assert!(outcome.step_results.contains_key("fan_a"));
        assert!(outcome.step_results.contains_key("fan_b"));
    }

    #[tokio::test]
    async fn parallel_level_records_all_results() {
        let transport = Arc::new(MockTransport::new());
        transport.route("/a", 200, "{}");
        transport.route("/b", 500, "{}");

        let workflow = parse(
            r#"
settings:
  parallel: true
  fail_fast: true
steps:
  - id: a
    api_call:
      endpoint: /a
  - id: b
    api_call:
      endpoint: /b
"#,
        );
        let outcome = executor_with(transport)
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        // Both siblings ran to completion even though one failed.
        assert!(outcome.step_results["a"].success);
        assert!(!outcome.step_results["b"].success);
        assert_ne!(outcome.state.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn plugin_steps_rejected_without_invoker() {
        let transport = Arc::new(MockTransport::new());
        let workflow = parse(
            r#"
steps:
  - id: ext
    plugin:
      plugin_name: terraform
      command: apply
"#,
        );
        let err = executor_with(transport)
            .execute(&workflow, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CliforgeError::Step(StepError::PluginUnavailable { .. })));
    }

    #[tokio::test]
    async fn retry_reaches_success() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_with(vec![
            (500, "{}".to_string()),
            (500, "{}".to_string()),
            (200, r#"{"ok": true}"#.to_string()),
        ]);

        let workflow = parse(
            r#"
steps:
  - id: persistent
    retry:
      max_attempts: 3
      backoff:
        kind: fixed
        initial_seconds: 0.01
    api_call:
      endpoint: /eventually
"#,
        );
        let outcome = executor_with(transport.clone())
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        assert_eq!(outcome.step_results["persistent"].retries, 2);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn loop_iterates_with_isolated_bindings() {
        let transport = Arc::new(MockTransport::new());
        transport.route("/volumes", 200, r#"["v1", "v2", "v3"]"#);

        let workflow = parse(
            r#"
steps:
  - id: fetch
    api_call:
      endpoint: /volumes
  - id: each
    loop:
      collection: "steps.fetch.response"
      iterator: volume
      steps:
        - id: resize
          api_call:
            endpoint: "/volumes/{volume}/resize"
"#,
        );
        let outcome = executor_with(transport.clone())
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        let each = &outcome.step_results["each"];
        assert_eq!(each.output["collection_size"], serde_json::json!(3));
        let paths = transport.requested_paths();
        assert!(paths.contains(&"/volumes/v1/resize".to_string()));
        assert!(paths.contains(&"/volumes/v3/resize".to_string()));
    }

    #[tokio::test]
    async fn conditional_selects_the_else_branch() {
        let transport = Arc::new(MockTransport::new());
        transport.route("/slow", 200, "{}");

        let workflow = parse(
            r#"
steps:
  - id: branch
    conditional:
      condition: "flags.fast == true"
      then:
        - id: fast_path
          api_call:
            endpoint: /fast
      else:
        - id: slow_path
          api_call:
            endpoint: /slow
"#,
        );
        let mut flags = HashMap::new();
        flags.insert("fast".to_string(), serde_json::json!(false));
        let outcome = executor_with(transport.clone())
            .execute(&workflow, flags)
            .await
            .unwrap();

        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        let branch = &outcome.step_results["branch"];
        assert_eq!(branch.output["branch"], serde_json::json!("else"));
        assert_eq!(transport.requested_paths(), vec!["/slow"]);
        assert!(outcome.step_results.contains_key("slow_path"));
    }

    #[tokio::test]
    async fn wait_polls_until_terminal_state() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_with(vec![
            (200, r#"{"status": "pending"}"#.to_string()),
            (500, "transient".to_string()),
            (200, "not json".to_string()),
            (200, r#"{"status": "ready"}"#.to_string()),
        ]);

        let workflow = parse(
            r#"
steps:
  - id: ready
    wait:
      endpoint: /deployments/d1
      interval_seconds: 0.1
      timeout_seconds: 30
      status_field: status
      terminal_states: [ready, failed]
"#,
        );
        let outcome = executor_with(transport.clone())
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        assert_eq!(outcome.state.status, ExecutionStatus::Completed);
        let result = &outcome.step_results["ready"];
        assert_eq!(result.output["final_status"], serde_json::json!("ready"));
        // Errors and non-JSON payloads were retried, never fatal.
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn wait_polling_times_out() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_always(200, r#"{"status": "pending"}"#);

        let workflow = parse(
            r#"
steps:
  - id: stuck
    required: true
    wait:
      endpoint: /deployments/d1
      interval_seconds: 0.2
      timeout_seconds: 1
      status_field: status
      terminal_states: [ready]
"#,
        );
        let outcome = executor_with(transport)
            .execute(&workflow, HashMap::new())
            .await
            .unwrap();

        assert_ne!(outcome.state.status, ExecutionStatus::Completed);
        let result = &outcome.step_results["stuck"];
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or_default().contains("exceeded"));
    }

    #[tokio::test]
    async fn cancellation_fails_and_rolls_back() {
        let transport = Arc::new(MockTransport::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = StepRunner::new(transport, "https://api.test", cancel);
        let outcome = WorkflowExecutor::new(runner)
            .execute(
                &parse(
                    r#"
steps:
  - id: never
    api_call:
      endpoint: /never
"#,
                ),
                HashMap::new(),
            )
            .await
            .unwrap();
        assert_ne!(outcome.state.status, ExecutionStatus::Completed);
        assert!(outcome.rollback.is_some());
    }
}
