//! Watch coordinator: ties a stream client to a progress indicator and
//! a set of exit conditions.
//!
//! Log lines are echoed with a timestamp prefix, `status` events drive
//! the indicator, `error` events are surfaced on the error stream, and
//! the first matching exit condition ends the watch. An OS interrupt
//! cancels the watch context and cleans up the stream.

use crate::event::Event;
use crate::progress::ProgressIndicator;
use crate::stream::StreamClient;
use anyhow::{anyhow, Result};
use cliforge_engine::context::ExecutionContext;
use cliforge_engine::expression::Evaluator;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct ExitCondition {
    /// Event type to match; None matches every type
    pub event_type: Option<String>,
    /// Expression over `event = {type, data, id}`; None always matches
    pub condition: Option<String>,
    /// Printed when the condition fires
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub show_logs: bool,
    pub exit_conditions: Vec<ExitCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// An exit condition matched
    ConditionMet { message: Option<String> },
    /// Interrupt or external cancellation ended the watch
    Interrupted,
    /// The stream closed without a condition firing
    StreamEnded,
}

pub struct WatchCoordinator {
    client: Arc<dyn StreamClient>,
    progress: Arc<dyn ProgressIndicator>,
    options: WatchOptions,
    cancel: CancellationToken,
}

impl WatchCoordinator {
    pub fn new(
        client: Arc<dyn StreamClient>,
        progress: Arc<dyn ProgressIndicator>,
        options: WatchOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            progress,
            options,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<WatchOutcome> {
        let mut events = self
            .client
            .events()
            .ok_or_else(|| anyhow!("event channel already taken"))?;
        let mut errors = self
            .client
            .errors()
            .ok_or_else(|| anyhow!("error channel already taken"))?;

        self.client.connect().await?;
        self.progress.start("watching");

        let outcome = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(outcome) = self.handle_event(&event) {
                            break outcome;
                        }
                    }
                    None => break WatchOutcome::StreamEnded,
                },
                error = errors.recv() => {
                    if let Some(error) = error {
                        eprintln!("watch: {}", error);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!("interrupt received, stopping watch");
                    break WatchOutcome::Interrupted;
                }
                _ = self.cancel.cancelled() => break WatchOutcome::Interrupted,
            }
        };

        self.cancel.cancel();
        self.client.close().await;
        match &outcome {
            WatchOutcome::ConditionMet { message } => {
                self.progress
                    .succeed(message.as_deref().unwrap_or("condition met"));
            }
            WatchOutcome::Interrupted => self.progress.stop(),
            WatchOutcome::StreamEnded => self.progress.stop(),
        }
        Ok(outcome)
    }

    fn handle_event(&self, event: &Event) -> Option<WatchOutcome> {
        match event.event_type.as_str() {
            "log" | "message" => {
                if self.options.show_logs {
                    println!("[{}] {}", event.timestamp.format("%H:%M:%S"), event.data);
                }
            }
            "status" => {
                let message = match event.parsed_data() {
                    Value::Object(map) => map
                        .get("message")
                        .or_else(|| map.get("state"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| event.data.clone()),
                    _ => event.data.clone(),
                };
                self.progress.update(&message);
            }
            "error" => {
                eprintln!("error: {}", event.data);
            }
            _ => {}
        }

        for condition in &self.options.exit_conditions {
            if self.condition_met(condition, event) {
                if let Some(message) = &condition.message {
                    println!("{}", message);
                }
                return Some(WatchOutcome::ConditionMet {
                    message: condition.message.clone(),
                });
            }
        }
        None
    }

    fn condition_met(&self, condition: &ExitCondition, event: &Event) -> bool {
        if let Some(event_type) = &condition.event_type {
            if event_type != &event.event_type {
                return false;
            }
        }
        let Some(expression) = &condition.condition else {
            return true;
        };
        let context = ExecutionContext::new(HashMap::new());
        let evaluator = Evaluator::new(&context).bind("event", event.scope());
        match evaluator.evaluate_condition(expression) {
            Ok(met) => met,
            Err(e) => {
                warn!("exit condition '{}': {}", expression, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingProgress;
    use crate::testing::MockStreamClient;

    fn coordinator(
        client: Arc<MockStreamClient>,
        progress: Arc<RecordingProgress>,
        options: WatchOptions,
    ) -> WatchCoordinator {
        WatchCoordinator::new(client, progress, options, CancellationToken::new())
    }

    #[tokio::test]
    async fn exit_condition_with_expression_terminates() {
        let client = Arc::new(MockStreamClient::new());
        client.script(vec![
            Event::new("status", r#"{"state":"running"}"#),
            Event::new("status", r#"{"state":"completed"}"#),
        ]);
        let progress = Arc::new(RecordingProgress::new());
        let options = WatchOptions {
            show_logs: false,
            exit_conditions: vec![ExitCondition {
                event_type: Some("status".to_string()),
                condition: Some("event.data ~= 'completed'".to_string()),
                message: Some("deployment finished".to_string()),
            }],
        };

        let outcome = coordinator(client, progress.clone(), options).run().await.unwrap();
        assert_eq!(
            outcome,
            WatchOutcome::ConditionMet {
                message: Some("deployment finished".to_string())
            }
        );
        let entries = progress.entries();
        assert!(entries.iter().any(|e| e == "succeed:deployment finished"));
    }

    #[tokio::test]
    async fn type_only_condition_matches_first_event_of_that_type() {
        let client = Arc::new(MockStreamClient::new());
        client.script(vec![
            Event::new("log", "starting"),
            Event::new("done", ""),
        ]);
        let progress = Arc::new(RecordingProgress::new());
        let options = WatchOptions {
            show_logs: false,
            exit_conditions: vec![ExitCondition {
                event_type: Some("done".to_string()),
                condition: None,
                message: None,
            }],
        };

        let outcome = coordinator(client, progress, options).run().await.unwrap();
        assert_eq!(outcome, WatchOutcome::ConditionMet { message: None });
    }

    #[tokio::test]
    async fn status_events_drive_the_indicator() {
        let client = Arc::new(MockStreamClient::new());
        client.script(vec![
            Event::new("status", r#"{"message":"provisioning"}"#),
            Event::new("done", ""),
        ]);
        let progress = Arc::new(RecordingProgress::new());
        let options = WatchOptions {
            show_logs: false,
            exit_conditions: vec![ExitCondition {
                event_type: Some("done".to_string()),
                ..ExitCondition::default()
            }],
        };

        coordinator(client, progress.clone(), options).run().await.unwrap();
        assert!(progress.entries().contains(&"update:provisioning".to_string()));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_watch() {
        let client = Arc::new(MockStreamClient::new());
        let progress = Arc::new(RecordingProgress::new());
        let cancel = CancellationToken::new();
        let coordinator = WatchCoordinator::new(
            client,
            progress.clone(),
            WatchOptions::default(),
            cancel.clone(),
        );

        cancel.cancel();
        let outcome = coordinator.run().await.unwrap();
        assert_eq!(outcome, WatchOutcome::Interrupted);
        assert!(progress.entries().contains(&"stop".to_string()));
    }
}
