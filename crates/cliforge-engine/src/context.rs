//! Thread-safe shared state for one workflow invocation.
//!
//! Clones share step results, the completed-step order and the rollback
//! stack with their parent; variables are copied by value so loop
//! iterators stay isolated per scope. Flags are fixed at start and
//! read-only afterwards.

use crate::workflow::{Step, StepResult};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A compensating action recorded for a successfully completed step
#[derive(Debug, Clone)]
pub struct RollbackAction {
    pub step_id: String,
    pub action: Step,
}

#[derive(Debug, Default)]
struct SharedTables {
    step_results: HashMap<String, StepResult>,
    completed_steps: Vec<String>,
    rollback_stack: Vec<RollbackAction>,
}

#[derive(Debug)]
pub struct ExecutionContext {
    flags: Arc<HashMap<String, Value>>,
    variables: Arc<RwLock<HashMap<String, Value>>>,
    shared: Arc<RwLock<SharedTables>>,
}

// Poisoning only happens when a writer panicked mid-update; the tables
// are plain inserts, so the data is still coherent and we recover it.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExecutionContext {
    pub fn new(flags: HashMap<String, Value>) -> Self {
        Self {
            flags: Arc::new(flags),
            variables: Arc::new(RwLock::new(HashMap::new())),
            shared: Arc::new(RwLock::new(SharedTables::default())),
        }
    }

    /// Child scope: shared tables by reference, variables by value
    pub fn child(&self) -> Self {
        let variables = read(&self.variables).clone();
        Self {
            flags: Arc::clone(&self.flags),
            variables: Arc::new(RwLock::new(variables)),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn flag(&self, name: &str) -> Option<Value> {
        self.flags.get(name).cloned()
    }

    pub fn flags(&self) -> &HashMap<String, Value> {
        &self.flags
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        write(&self.variables).insert(name.into(), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        read(&self.variables).get(name).cloned()
    }

    pub fn set_step_result(&self, result: StepResult) {
        let mut shared = write(&self.shared);
        shared.completed_steps.push(result.step_id.clone());
        shared.step_results.insert(result.step_id.clone(), result);
    }

    pub fn get_step_result(&self, step_id: &str) -> Option<StepResult> {
        read(&self.shared).step_results.get(step_id).cloned()
    }

    /// Step ids in the order their results were committed
    pub fn completed_steps(&self) -> Vec<String> {
        read(&self.shared).completed_steps.clone()
    }

    pub fn add_rollback_action(&self, action: RollbackAction) {
        write(&self.shared).rollback_stack.push(action);
    }

    /// Snapshot of the rollback stack in reverse-of-insertion order
    pub fn rollback_actions(&self) -> Vec<RollbackAction> {
        let shared = read(&self.shared);
        shared.rollback_stack.iter().rev().cloned().collect()
    }

    pub fn rollback_stack_len(&self) -> usize {
        read(&self.shared).rollback_stack.len()
    }

    /// The `steps.<id>` view the evaluator binds: success, error flag,
    /// and every named output of the step.
    pub fn step_scope(&self, step_id: &str) -> Option<Value> {
        let shared = read(&self.shared);
        let result = shared.step_results.get(step_id)?;
        let mut scope = Map::new();
        scope.insert("success".to_string(), json!(result.success));
        scope.insert("error".to_string(), json!(!result.success));
        for (name, value) in &result.output {
            scope.insert(name.clone(), value.clone());
        }
        Some(Value::Object(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::NoopStep;

    fn noop_step(id: &str) -> Step {
        Step {
            id: id.to_string(),
            description: None,
            depends_on: Vec::new(),
            condition: None,
            required: false,
            retry: None,
            rollback: None,
            output: HashMap::new(),
            api_call: None,
            plugin: None,
            conditional: None,
            loop_step: None,
            wait: None,
            parallel: None,
            noop: Some(NoopStep::default()),
        }
    }

    #[test]
    fn child_variables_are_isolated() {
        let parent = ExecutionContext::new(HashMap::new());
        parent.set_variable("item", json!("a"));

        let child = parent.child();
        child.set_variable("item", json!("b"));

        assert_eq!(parent.get_variable("item"), Some(json!("a")));
        assert_eq!(child.get_variable("item"), Some(json!("b")));
    }

    #[test]
    fn child_shares_results_and_rollback_stack() {
        let parent = ExecutionContext::new(HashMap::new());
        let child = parent.child();

        child.set_step_result(StepResult::success("created", HashMap::new()));
        child.add_rollback_action(RollbackAction {
            step_id: "created".to_string(),
            action: noop_step("undo_created"),
        });

        assert!(parent.get_step_result("created").is_some());
        assert_eq!(parent.completed_steps(), vec!["created".to_string()]);
        assert_eq!(parent.rollback_stack_len(), 1);
    }

    #[test]
    fn rollback_actions_come_back_in_reverse_order() {
        let context = ExecutionContext::new(HashMap::new());
        for id in ["first", "second", "third"] {
            context.add_rollback_action(RollbackAction {
                step_id: id.to_string(),
                action: noop_step(id),
            });
        }
        let order: Vec<_> = context
            .rollback_actions()
            .into_iter()
            .map(|a| a.step_id)
            .collect();
        assert_eq!(order, vec!["third", "second", "first"]);
    }

    #[test]
    fn step_scope_exposes_success_error_and_outputs() {
        let context = ExecutionContext::new(HashMap::new());
        let mut output = HashMap::new();
        output.insert("id".to_string(), json!("r1"));
        context.set_step_result(StepResult::success("create", output));

        let scope = context.step_scope("create").unwrap();
        assert_eq!(scope["success"], json!(true));
        assert_eq!(scope["error"], json!(false));
        assert_eq!(scope["id"], json!("r1"));
        assert!(context.step_scope("missing").is_none());
    }
}
