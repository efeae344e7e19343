//! Indeterminate spinner over indicatif.

use super::{ProgressData, ProgressIndicator};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Branding-controlled spinner appearance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpinnerConfig {
    pub frames: String,
    /// Tick interval in milliseconds
    pub interval: u64,
    pub success_symbol: String,
    pub failure_symbol: String,
}

impl Default for SpinnerConfig {
    fn default() -> Self {
        SpinnerConfig {
            frames: "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏".to_string(),
            interval: 100,
            success_symbol: "✓".to_string(),
            failure_symbol: "✗".to_string(),
        }
    }
}

pub struct Spinner {
    bar: ProgressBar,
    config: SpinnerConfig,
    active: AtomicBool,
}

impl Spinner {
    pub fn new(config: SpinnerConfig) -> Self {
        let bar = ProgressBar::new_spinner();
        let frames: Vec<String> = config.frames.chars().map(|c| c.to_string()).collect();
        let frame_refs: Vec<&str> = frames.iter().map(String::as_str).collect();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .expect("static template")
                .tick_strings(&frame_refs),
        );
        Self {
            bar,
            config,
            active: AtomicBool::new(false),
        }
    }
}

impl Default for Spinner {
    fn default() -> Self {
        Self::new(SpinnerConfig::default())
    }
}

impl ProgressIndicator for Spinner {
    fn start(&self, message: &str) {
        self.active.store(true, Ordering::SeqCst);
        self.bar.set_message(message.to_string());
        self.bar.enable_steady_tick(Duration::from_millis(self.config.interval));
    }

    fn update(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn update_with_data(&self, data: &ProgressData) {
        if let Some(message) = &data.message {
            self.bar.set_message(message.clone());
        }
    }

    fn succeed(&self, message: &str) {
        self.active.store(false, Ordering::SeqCst);
        self.bar
            .finish_with_message(format!("{} {}", self.config.success_symbol.green(), message));
    }

    fn fail(&self, message: &str) {
        self.active.store(false, Ordering::SeqCst);
        self.bar
            .finish_with_message(format!("{} {}", self.config.failure_symbol.red(), message));
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.bar.finish_and_clear();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
