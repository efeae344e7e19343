//! LIFO compensating executor.
//!
//! On workflow failure the rollback stack is drained newest-first, each
//! action running through the normal step executor.

use crate::context::{ExecutionContext, RollbackAction};
use crate::step::StepRunner;
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackMode {
    /// Run every action, collecting errors (the default)
    #[default]
    ContinueOnError,
    /// Abort after the first failing action
    StopOnFirstError,
}

#[derive(Debug, Clone)]
pub struct RollbackStatus {
    /// Actions popped from the stack
    pub total: usize,
    /// Actions actually executed before any abort
    pub executed: usize,
    pub errors: Vec<String>,
}

impl RollbackStatus {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct RollbackManager {
    mode: RollbackMode,
}

impl RollbackManager {
    pub fn new(mode: RollbackMode) -> Self {
        Self { mode }
    }

    /// Execute the context's rollback stack in reverse-of-push order
    pub async fn execute(&self, runner: &StepRunner, context: &ExecutionContext) -> RollbackStatus {
        let actions: Vec<RollbackAction> = context.rollback_actions();
        let total = actions.len();
        info!("rolling back {} action(s)", total);

        let mut executed = 0;
        let mut errors = Vec::new();
        for action in actions {
            executed += 1;
            let result = runner.execute_step(&action.action, context).await;
            if !result.success {
                let message = format!(
                    "rollback of '{}' via '{}' failed: {}",
                    action.step_id,
                    action.action.id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                warn!("{}", message);
                errors.push(message);
                if self.mode == RollbackMode::StopOnFirstError {
                    break;
                }
            }
        }

        RollbackStatus {
            total,
            executed,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::workflow::{ApiCallStep, NoopStep, Step};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn step_with(id: &str, api_call: Option<ApiCallStep>) -> Step {
        Step {
            id: id.to_string(),
            description: None,
            depends_on: Vec::new(),
            condition: None,
            required: false,
            retry: None,
            rollback: None,
            output: HashMap::new(),
            api_call: api_call.clone(),
            plugin: None,
            conditional: None,
            loop_step: None,
            wait: None,
            parallel: None,
            noop: if api_call.is_some() { None } else { Some(NoopStep::default()) },
        }
    }

    fn delete_call(endpoint: &str) -> ApiCallStep {
        ApiCallStep {
            endpoint: endpoint.to_string(),
            method: Some("DELETE".to_string()),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn actions_run_in_reverse_order() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_always(200, "{}");
        let runner = StepRunner::new(transport.clone(), "https://api.test", CancellationToken::new());
        let context = ExecutionContext::new(HashMap::new());

        for (step_id, endpoint) in [("a", "/a"), ("b", "/b"), ("c", "/c")] {
            context.add_rollback_action(RollbackAction {
                step_id: step_id.to_string(),
                action: step_with(&format!("undo_{}", step_id), Some(delete_call(endpoint))),
            });
        }

        let status = RollbackManager::new(RollbackMode::ContinueOnError)
            .execute(&runner, &context)
            .await;
        assert!(status.is_clean());
        assert_eq!(status.executed, 3);

        let paths = transport.requested_paths();
        assert_eq!(paths, vec!["/c", "/b", "/a"]);
    }

    #[tokio::test]
    async fn continue_on_error_runs_everything() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_with(vec![(500, "boom".to_string()), (200, "{}".to_string())]);
        let runner = StepRunner::new(transport.clone(), "https://api.test", CancellationToken::new());
        let context = ExecutionContext::new(HashMap::new());

        context.add_rollback_action(RollbackAction {
            step_id: "first".to_string(),
            action: step_with("undo_first", Some(delete_call("/first"))),
        });
        context.add_rollback_action(RollbackAction {
            step_id: "second".to_string(),
            action: step_with("undo_second", Some(delete_call("/second"))),
        });

        let status = RollbackManager::new(RollbackMode::ContinueOnError)
            .execute(&runner, &context)
            .await;
        assert_eq!(status.total, 2);
        assert_eq!(status.executed, 2);
        assert_eq!(status.errors.len(), 1);
    }

    #[tokio::test]
    async fn stop_on_first_error_aborts() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_with(vec![(500, "boom".to_string()), (200, "{}".to_string())]);
        let runner = StepRunner::new(transport.clone(), "https://api.test", CancellationToken::new());
        let context = ExecutionContext::new(HashMap::new());

        context.add_rollback_action(RollbackAction {
            step_id: "first".to_string(),
            action: step_with("undo_first", Some(delete_call("/first"))),
        });
        context.add_rollback_action(RollbackAction {
            step_id: "second".to_string(),
            action: step_with("undo_second", Some(delete_call("/second"))),
        });

        let status = RollbackManager::new(RollbackMode::StopOnFirstError)
            .execute(&runner, &context)
            .await;
        assert_eq!(status.total, 2);
        assert_eq!(status.executed, 1);
        assert_eq!(status.errors.len(), 1);
    }
}
