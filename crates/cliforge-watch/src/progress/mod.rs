//! Progress indicators as a capability.
//!
//! Terminal rendering sits behind the `ProgressIndicator` trait so the
//! engine and watch coordinator never talk to a terminal directly;
//! tests substitute `RecordingProgress`.

pub mod bar;
pub mod multistep;
pub mod spinner;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Structured payload for `update_with_data`
#[derive(Debug, Clone, Default)]
pub struct ProgressData {
    pub message: Option<String>,
    pub current: Option<u64>,
    pub total: Option<u64>,
    pub fields: HashMap<String, String>,
}

pub trait ProgressIndicator: Send + Sync {
    fn start(&self, message: &str);
    fn update(&self, message: &str);
    fn update_with_data(&self, data: &ProgressData);
    fn succeed(&self, message: &str);
    fn fail(&self, message: &str);
    fn stop(&self);
    fn is_active(&self) -> bool;

    /// Bars advance by deltas; other indicators ignore this
    fn increment(&self, _delta: u64) {}
}

/// Serialises progress usage: at most one active indicator and one
/// active watch per manager.
pub struct ProgressManager {
    active: Mutex<Option<Arc<dyn ProgressIndicator>>>,
    watching: AtomicBool,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            watching: AtomicBool::new(false),
        }
    }

    /// Register an indicator as the active one, stopping any predecessor
    pub fn activate(&self, indicator: Arc<dyn ProgressIndicator>) -> Arc<dyn ProgressIndicator> {
        let mut active = self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = active.take() {
            if previous.is_active() {
                previous.stop();
            }
        }
        *active = Some(Arc::clone(&indicator));
        indicator
    }

    pub fn finish(&self) {
        let mut active = self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(indicator) = active.take() {
            if indicator.is_active() {
                indicator.stop();
            }
        }
    }

    /// Claim the single watch slot; the guard releases it on drop
    pub fn begin_watch(&self) -> Result<WatchSlot<'_>> {
        if self.watching.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("another watch is already running"));
        }
        Ok(WatchSlot { manager: self })
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WatchSlot<'a> {
    manager: &'a ProgressManager,
}

impl Drop for WatchSlot<'_> {
    fn drop(&mut self) {
        self.manager.watching.store(false, Ordering::SeqCst);
    }
}

static DEFAULT_MANAGER: Lazy<ProgressManager> = Lazy::new(ProgressManager::new);

/// Process-wide convenience manager; reachable only through this call
pub fn default_manager() -> &'static ProgressManager {
    &DEFAULT_MANAGER
}

/// Test double capturing the lifecycle as a sequence of entries
#[derive(Default)]
pub struct RecordingProgress {
    log: Mutex<Vec<String>>,
    active: AtomicBool,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(entry);
    }
}

impl ProgressIndicator for RecordingProgress {
    fn start(&self, message: &str) {
        self.active.store(true, Ordering::SeqCst);
        self.record(format!("start:{}", message));
    }

    fn update(&self, message: &str) {
        self.record(format!("update:{}", message));
    }

    fn update_with_data(&self, data: &ProgressData) {
        self.record(format!(
            "update_with_data:{}",
            data.message.clone().unwrap_or_default()
        ));
    }

    fn succeed(&self, message: &str) {
        self.active.store(false, Ordering::SeqCst);
        self.record(format!("succeed:{}", message));
    }

    fn fail(&self, message: &str) {
        self.active.store(false, Ordering::SeqCst);
        self.record(format!("fail:{}", message));
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.record("stop".to_string());
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn increment(&self, delta: u64) {
        self.record(format!("increment:{}", delta));
    }
}
