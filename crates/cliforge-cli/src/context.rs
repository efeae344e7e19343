//! Shared per-invocation dependencies handed to command handlers.

use crate::output::DefaultFormatter;
use anyhow::Result;
use cliforge_core::config::ComposedConfig;
use cliforge_core::traits::{HttpTransport, OutputFormatter};
use cliforge_engine::state::StateManager;
use cliforge_engine::step::StepRunner;
use cliforge_engine::executor::WorkflowExecutor;
use serde_json::Value;
use std::io::IsTerminal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AppContext {
    pub app: String,
    pub composed: ComposedConfig,
    pub transport: Arc<dyn HttpTransport>,
    pub base_url: String,
    pub profile: Option<String>,
    pub cancel: CancellationToken,
    pub formatter: DefaultFormatter,
    pub state: Arc<StateManager>,
}

impl AppContext {
    pub fn new(
        app: String,
        composed: ComposedConfig,
        transport: Arc<dyn HttpTransport>,
        base_url: String,
        profile: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        let state = Arc::new(StateManager::for_app(&app));
        Self {
            app,
            composed,
            transport,
            base_url,
            profile,
            cancel,
            formatter: DefaultFormatter,
            state,
        }
    }

    pub fn runner(&self) -> StepRunner {
        StepRunner::new(
            Arc::clone(&self.transport),
            self.base_url.clone(),
            self.cancel.clone(),
        )
    }

    pub fn executor(&self) -> WorkflowExecutor {
        WorkflowExecutor::new(self.runner()).with_state_manager(Arc::clone(&self.state))
    }

    pub fn color_enabled(&self) -> bool {
        match self.composed.config.defaults.output.color.as_str() {
            "always" => true,
            "never" => false,
            _ => std::io::stdout().is_terminal(),
        }
    }

    /// Render a value with the configured output defaults
    pub fn render(&self, value: &Value) -> Result<String> {
        let output = &self.composed.config.defaults.output;
        self.formatter
            .render(value, &output.format, self.color_enabled(), output.pretty_print)
    }
}
