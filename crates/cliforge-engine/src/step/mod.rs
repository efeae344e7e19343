//! Polymorphic step execution.
//!
//! Every step runs through the same envelope: guard condition, retry
//! loop with backoff, variant dispatch, output-mapping evaluation, and
//! a single commit of the final result into the execution context.

pub mod api_call;
pub mod conditional;
pub mod loop_step;
pub mod parallel;
pub mod plugin;
pub mod wait;

pub use plugin::PluginInvoker;

use crate::context::ExecutionContext;
use crate::expression::Evaluator;
use crate::workflow::{Backoff, BackoffKind, RetryPolicy, Step, StepResult, StepVariant};
use chrono::Utc;
use cliforge_core::traits::HttpTransport;
use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = StepResult> + Send + 'a>>;

/// How one attempt of a variant handler ended
#[derive(Debug, Clone)]
pub(crate) struct AttemptOutcome {
    pub output: HashMap<String, Value>,
    pub error: Option<AttemptError>,
}

impl AttemptOutcome {
    pub fn ok(output: HashMap<String, Value>) -> Self {
        Self {
            output,
            error: None,
        }
    }

    pub fn failed(output: HashMap<String, Value>, error: AttemptError) -> Self {
        Self {
            output,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum AttemptError {
    /// HTTP failure status from an api-call
    Http { status: u16, body: String },
    /// Plugin failure with its machine-readable type
    Plugin { error_type: String, message: String },
    /// Everything else
    Other(String),
}

impl AttemptError {
    pub fn message(&self) -> String {
        match self {
            AttemptError::Http { status, body } => {
                if body.is_empty() {
                    format!("HTTP {}", status)
                } else {
                    format!("HTTP {}: {}", status, body)
                }
            }
            AttemptError::Plugin { error_type, message } => {
                format!("{} ({})", message, error_type)
            }
            AttemptError::Other(message) => message.clone(),
        }
    }
}

/// Executes steps of every variant against a shared context
#[derive(Clone)]
pub struct StepRunner {
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) base_url: String,
    pub(crate) plugins: Option<Arc<dyn PluginInvoker>>,
    pub(crate) cancel: CancellationToken,
}

impl StepRunner {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            plugins: None,
            cancel,
        }
    }

    pub fn with_plugins(mut self, plugins: Arc<dyn PluginInvoker>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one step to completion, commit its result to the context and
    /// return it. Failures are encoded in the result, never panicked.
    pub fn execute_step<'a>(&'a self, step: &'a Step, context: &'a ExecutionContext) -> StepFuture<'a> {
        Box::pin(async move {
            let start_time = Utc::now();
            let clock = Instant::now();

            if self.cancel.is_cancelled() {
                let result = StepResult::failure(&step.id, "cancelled");
                context.set_step_result(result.clone());
                return result;
            }

            // Guard condition: a false guard is a successful skip.
            if let Some(condition) = &step.condition {
                match Evaluator::new(context).evaluate_condition(condition) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("step {} skipped: condition not met", step.id);
                        let mut output = HashMap::new();
                        output.insert("skipped".to_string(), json!(true));
                        output.insert("reason".to_string(), json!("condition not met"));
                        let result = StepResult {
                            step_id: step.id.clone(),
                            success: true,
                            output,
                            error: None,
                            retries: 0,
                            start_time,
                            end_time: Utc::now(),
                            duration: Duration::ZERO,
                        };
                        context.set_step_result(result.clone());
                        return result;
                    }
                    Err(e) => {
                        let result = StepResult::failure(&step.id, e.to_string());
                        context.set_step_result(result.clone());
                        return result;
                    }
                }
            }

            let max_attempts = step
                .retry
                .as_ref()
                .map(|policy| policy.max_attempts.max(1))
                .unwrap_or(1);

            let mut outcome;
            let mut attempt = 0u32;
            loop {
                if attempt > 0 {
                    let delay = backoff_delay(
                        step.retry.as_ref().and_then(|p| p.backoff.as_ref()),
                        attempt - 1,
                    );
                    debug!("step {} retry {} after {:?}", step.id, attempt, delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            let result = StepResult::failure(&step.id, "cancelled");
                            context.set_step_result(result.clone());
                            return result;
                        }
                    }
                }

                outcome = self.run_variant(step, context).await;

                if outcome.error.is_none() {
                    break;
                }
                attempt += 1;
                if attempt >= max_attempts
                    || !should_retry(step, step.retry.as_ref(), outcome.error.as_ref().expect("error checked"))
                {
                    break;
                }
            }

            let retries = attempt.saturating_sub(if outcome.error.is_some() { 1 } else { 0 });
            let success = outcome.error.is_none();
            let mut output = outcome.output;

            // Declared output mappings see the step's own outputs before
            // the result is committed.
            if success && !step.output.is_empty() {
                let mut evaluator = Evaluator::new(context).bind(step.id.clone(), scope_of(&output));
                for (name, value) in &output {
                    evaluator = evaluator.bind(name.clone(), value.clone());
                }
                let mut mapped = HashMap::new();
                for (name, expression) in &step.output {
                    let value = if expression.contains('{') {
                        evaluator.interpolate_string(expression).map(Value::String)
                    } else {
                        evaluator.evaluate(expression)
                    };
                    match value {
                        Ok(value) => {
                            mapped.insert(name.clone(), value);
                        }
                        Err(e) => {
                            warn!("step {} output '{}': {}", step.id, name, e);
                            mapped.insert(name.clone(), Value::Null);
                        }
                    }
                }
                output.extend(mapped);
            }

            let result = StepResult {
                step_id: step.id.clone(),
                success,
                output,
                error: outcome.error.as_ref().map(AttemptError::message),
                retries,
                start_time,
                end_time: Utc::now(),
                duration: clock.elapsed(),
            };
            context.set_step_result(result.clone());
            result
        })
    }

    async fn run_variant(&self, step: &Step, context: &ExecutionContext) -> AttemptOutcome {
        let variant = match step.variant() {
            Ok(variant) => variant,
            Err(e) => return AttemptOutcome::failed(HashMap::new(), AttemptError::Other(e.to_string())),
        };
        match variant {
            StepVariant::ApiCall(payload) => api_call::run(self, payload, context).await,
            StepVariant::Plugin(payload) => plugin::run(self, payload, context).await,
            StepVariant::Conditional(payload) => conditional::run(self, payload, context).await,
            StepVariant::Loop(payload) => loop_step::run(self, payload, context).await,
            StepVariant::Wait(payload) => wait::run(self, payload, context).await,
            StepVariant::Parallel(payload) => parallel::run(self, payload, context).await,
            StepVariant::Noop => AttemptOutcome::ok(HashMap::new()),
        }
    }
}

/// The `steps.<id>` view of a not-yet-committed output map
fn scope_of(output: &HashMap<String, Value>) -> Value {
    let mut scope = serde_json::Map::new();
    scope.insert("success".to_string(), json!(true));
    scope.insert("error".to_string(), json!(false));
    for (name, value) in output {
        scope.insert(name.clone(), value.clone());
    }
    Value::Object(scope)
}

/// Delay before retry number `attempt` (0-based)
pub fn backoff_delay(backoff: Option<&Backoff>, attempt: u32) -> Duration {
    let (kind, initial, multiplier, max) = match backoff {
        Some(b) => (b.kind, b.initial_seconds, b.multiplier, b.max_seconds),
        None => (BackoffKind::Fixed, 1.0, 0.0, 0.0),
    };
    let initial = if initial <= 0.0 { 1.0 } else { initial };
    let multiplier = if multiplier < 1.0 { 2.0 } else { multiplier };

    let seconds = match kind {
        BackoffKind::Fixed => initial,
        BackoffKind::Linear => initial * (attempt as f64 + 1.0),
        BackoffKind::Exponential => initial * multiplier.powi(attempt as i32),
    };
    let seconds = if max > 0.0 { seconds.min(max) } else { seconds };
    Duration::from_secs_f64(seconds)
}

/// Whether a failed attempt may be retried under the step's policy
fn should_retry(step: &Step, policy: Option<&RetryPolicy>, error: &AttemptError) -> bool {
    let Some(policy) = policy else {
        return false;
    };

    if let Some(matchers) = &policy.retryable_errors {
        return matchers.iter().any(|matcher| match error {
            AttemptError::Http { status, .. } => matcher.http_status == Some(*status),
            AttemptError::Plugin { error_type, .. } => {
                matcher.error_type.as_deref() == Some(error_type.as_str())
            }
            AttemptError::Other(_) => false,
        });
    }

    // Default policy per variant: server errors for api-calls, always
    // for plugins (within the attempt budget), never for the rest.
    match error {
        AttemptError::Http { status, .. } => step.api_call.is_some() && (500..=599).contains(status),
        AttemptError::Plugin { .. } => true,
        AttemptError::Other(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ErrorMatch;

    fn exponential(initial: f64, multiplier: f64, max: f64) -> Backoff {
        Backoff {
            kind: BackoffKind::Exponential,
            initial_seconds: initial,
            multiplier,
            max_seconds: max,
        }
    }

    #[test]
    fn exponential_backoff_series_clamps() {
        let backoff = exponential(1.0, 2.0, 5.0);
        let series: Vec<u64> = (0..5)
            .map(|attempt| backoff_delay(Some(&backoff), attempt).as_secs())
            .collect();
        assert_eq!(series, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = Backoff {
            kind: BackoffKind::Linear,
            initial_seconds: 2.0,
            multiplier: 0.0,
            max_seconds: 0.0,
        };
        assert_eq!(backoff_delay(Some(&linear), 0), Duration::from_secs(2));
        assert_eq!(backoff_delay(Some(&linear), 2), Duration::from_secs(6));

        let fixed = Backoff {
            kind: BackoffKind::Fixed,
            initial_seconds: 3.0,
            multiplier: 0.0,
            max_seconds: 0.0,
        };
        assert_eq!(backoff_delay(Some(&fixed), 4), Duration::from_secs(3));
    }

    #[test]
    fn zero_valued_backoff_defaults() {
        let backoff = exponential(0.0, 0.0, 0.0);
        assert_eq!(backoff_delay(Some(&backoff), 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(Some(&backoff), 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(None, 3), Duration::from_secs(1));
    }

    #[test]
    fn retry_matchers_take_precedence() {
        let mut step = blank_step("s");
        step.api_call = Some(crate::workflow::ApiCallStep {
            endpoint: "/x".to_string(),
            method: None,
            headers: HashMap::new(),
            query: HashMap::new(),
            body: None,
        });
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: None,
            retryable_errors: Some(vec![ErrorMatch {
                http_status: Some(429),
                error_type: None,
            }]),
        };
        let too_many = AttemptError::Http {
            status: 429,
            body: String::new(),
        };
        let server_error = AttemptError::Http {
            status: 500,
            body: String::new(),
        };
        assert!(should_retry(&step, Some(&policy), &too_many));
        // 500 is not in the matcher list, so the default does not apply.
        assert!(!should_retry(&step, Some(&policy), &server_error));
    }

    #[test]
    fn default_retry_policy_per_variant() {
        let mut api_step = blank_step("api");
        api_step.api_call = Some(crate::workflow::ApiCallStep {
            endpoint: "/x".to_string(),
            method: None,
            headers: HashMap::new(),
            query: HashMap::new(),
            body: None,
        });
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: None,
            retryable_errors: None,
        };
        let server_error = AttemptError::Http {
            status: 503,
            body: String::new(),
        };
        let client_error = AttemptError::Http {
            status: 404,
            body: String::new(),
        };
        assert!(should_retry(&api_step, Some(&policy), &server_error));
        assert!(!should_retry(&api_step, Some(&policy), &client_error));

        let plugin_error = AttemptError::Plugin {
            error_type: "io".to_string(),
            message: "broken pipe".to_string(),
        };
        assert!(should_retry(&blank_step("p"), Some(&policy), &plugin_error));
        assert!(!should_retry(
            &blank_step("n"),
            Some(&policy),
            &AttemptError::Other("boom".to_string())
        ));
    }

    fn blank_step(id: &str) -> Step {
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
            noop: None,
        }
    }
}
