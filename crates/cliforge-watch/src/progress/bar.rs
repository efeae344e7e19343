//! Determinate progress bar over indicatif.

use super::{ProgressData, ProgressIndicator};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct Bar {
    bar: ProgressBar,
    active: AtomicBool,
}

impl Bar {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                .expect("static template")
                .progress_chars("=> "),
        );
        Self {
            bar,
            active: AtomicBool::new(false),
        }
    }
}

impl ProgressIndicator for Bar {
    fn start(&self, message: &str) {
        self.active.store(true, Ordering::SeqCst);
        self.bar.set_message(message.to_string());
    }

    fn update(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn update_with_data(&self, data: &ProgressData) {
        if let Some(message) = &data.message {
            self.bar.set_message(message.clone());
        }
        if let Some(total) = data.total {
            self.bar.set_length(total);
        }
        if let Some(current) = data.current {
            self.bar.set_position(current);
        }
    }

    fn succeed(&self, message: &str) {
        self.active.store(false, Ordering::SeqCst);
        self.bar.finish_with_message(message.to_string());
    }

    fn fail(&self, message: &str) {
        self.active.store(false, Ordering::SeqCst);
        self.bar.abandon_with_message(message.to_string());
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.bar.finish_and_clear();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn increment(&self, delta: u64) {
        self.bar.inc(delta);
    }
}
