//! Multi-step tree indicator for workflow visualisation.
//!
//! Each labelled step carries a status and up to one level of substeps;
//! the tree re-renders on every transition.

use super::{ProgressData, ProgressIndicator};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    fn glyph(self) -> String {
        match self {
            StepStatus::Pending => "○".to_string(),
            StepStatus::Running => "→".cyan().to_string(),
            StepStatus::Completed => "✓".green().to_string(),
            StepStatus::Failed => "✗".red().to_string(),
            StepStatus::Skipped => "⊘".dimmed().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct StepLine {
    id: String,
    label: String,
    status: StepStatus,
    substeps: Vec<StepLine>,
}

#[derive(Default)]
struct TreeState {
    title: String,
    steps: Vec<StepLine>,
}

pub struct MultiStep {
    bar: ProgressBar,
    state: Mutex<TreeState>,
    active: AtomicBool,
}

impl MultiStep {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{msg}").expect("static template"));
        Self {
            bar,
            state: Mutex::new(TreeState::default()),
            active: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_step(&self, id: impl Into<String>, label: impl Into<String>) {
        self.state().steps.push(StepLine {
            id: id.into(),
            label: label.into(),
            status: StepStatus::Pending,
            substeps: Vec::new(),
        });
        self.redraw();
    }

    /// Substeps nest one level below their parent
    pub fn add_substep(&self, parent: &str, id: impl Into<String>, label: impl Into<String>) {
        let mut state = self.state();
        if let Some(step) = state.steps.iter_mut().find(|s| s.id == parent) {
            step.substeps.push(StepLine {
                id: id.into(),
                label: label.into(),
                status: StepStatus::Pending,
                substeps: Vec::new(),
            });
        }
        drop(state);
        self.redraw();
    }

    pub fn set_status(&self, id: &str, status: StepStatus) {
        let mut state = self.state();
        for step in state.steps.iter_mut() {
            if step.id == id {
                step.status = status;
            } else if let Some(substep) = step.substeps.iter_mut().find(|s| s.id == id) {
                substep.status = status;
            }
        }
        drop(state);
        self.redraw();
    }

    /// The rendered tree, one glyph-prefixed line per step
    pub fn render(&self) -> String {
        let state = self.state();
        let mut lines = Vec::new();
        if !state.title.is_empty() {
            lines.push(state.title.clone());
        }
        for step in &state.steps {
            lines.push(format!("  {} {}", step.status.glyph(), step.label));
            for substep in &step.substeps {
                lines.push(format!("    {} {}", substep.status.glyph(), substep.label));
            }
        }
        lines.join("\n")
    }

    fn redraw(&self) {
        if self.is_active() {
            self.bar.set_message(self.render());
        }
    }
}

impl Default for MultiStep {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressIndicator for MultiStep {
    fn start(&self, message: &str) {
        self.active.store(true, Ordering::SeqCst);
        self.state().title = message.to_string();
        self.bar.set_message(self.render());
    }

    fn update(&self, message: &str) {
        self.state().title = message.to_string();
        self.redraw();
    }

    fn update_with_data(&self, data: &ProgressData) {
        if let Some(message) = &data.message {
            self.state().title = message.clone();
        }
        if let (Some(step), Some(status)) = (data.fields.get("step"), data.fields.get("status")) {
            let status = match status.as_str() {
                "running" => StepStatus::Running,
                "completed" => StepStatus::Completed,
                "failed" => StepStatus::Failed,
                "skipped" => StepStatus::Skipped,
                _ => StepStatus::Pending,
            };
            self.set_status(step, status);
            return;
        }
        self.redraw();
    }

    fn succeed(&self, message: &str) {
        self.active.store(false, Ordering::SeqCst);
        self.state().title = message.to_string();
        self.bar.finish_with_message(self.render());
    }

    fn fail(&self, message: &str) {
        self.active.store(false, Ordering::SeqCst);
        self.state().title = message.to_string();
        self.bar.abandon_with_message(self.render());
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.bar.finish_and_clear();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_statuses_and_substeps() {
        let tree = MultiStep::new();
        tree.start("deploy");
        tree.add_step("create", "Create resource");
        tree.add_step("verify", "Verify resource");
        tree.add_substep("verify", "verify_dns", "DNS resolves");
        tree.set_status("create", StepStatus::Completed);
        tree.set_status("verify", StepStatus::Running);
        tree.set_status("verify_dns", StepStatus::Pending);

        let rendered = tree.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("deploy"));
        assert!(lines[1].contains("Create resource"));
        assert!(lines[2].contains("Verify resource"));
        assert!(lines[3].starts_with("    "));
        assert!(lines[3].contains("DNS resolves"));
    }

    #[test]
    fn status_transitions_change_glyphs() {
        let tree = MultiStep::new();
        tree.start("run");
        tree.add_step("a", "Step A");
        let pending = tree.render();
        tree.set_status("a", StepStatus::Failed);
        let failed = tree.render();
        assert_ne!(pending, failed);
        assert!(pending.contains('○'));
        assert!(failed.contains('✗'));
    }

    #[test]
    fn update_with_data_routes_step_fields() {
        let tree = MultiStep::new();
        tree.start("run");
        tree.add_step("a", "Step A");
        let mut data = ProgressData::default();
        data.fields.insert("step".to_string(), "a".to_string());
        data.fields.insert("status".to_string(), "completed".to_string());
        tree.update_with_data(&data);
        assert!(tree.render().contains('✓'));
    }
}
