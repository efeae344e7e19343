//! Test doubles for the watch subsystem.

use crate::event::Event;
use crate::stream::{ClientShared, EventHandler, StreamClient};
use anyhow::Result;
use async_trait::async_trait;
use cliforge_core::error::WatchError;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Stream client replaying a scripted event sequence
pub struct MockStreamClient {
    shared: Arc<ClientShared>,
    script: Mutex<Vec<Event>>,
}

impl MockStreamClient {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            shared: ClientShared::new(CancellationToken::new()),
            script: Mutex::new(Vec::new()),
        }
    }

    /// Events replayed in order once the client connects
    pub fn script(&self, events: Vec<Event>) {
        *self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = events;
    }

    /// Push one event immediately
    pub fn emit(&self, event: Event) {
        self.shared.dispatch(event);
    }
}

#[async_trait]
impl StreamClient for MockStreamClient {
    async fn connect(&self) -> Result<()> {
        self.shared.set_connected(true);
        let events: Vec<Event> = std::mem::take(
            &mut *self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            for event in events {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                shared.dispatch(event);
            }
        });
        Ok(())
    }

    fn subscribe(&self, event_type: &str, handler: EventHandler) {
        self.shared.subscribe(event_type, handler);
    }

    fn unsubscribe(&self, event_type: &str) {
        self.shared.unsubscribe(event_type);
    }

    async fn close(&self) {
        self.shared.set_connected(false);
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.shared.take_events()
    }

    fn errors(&self) -> Option<mpsc::UnboundedReceiver<WatchError>> {
        self.shared.take_errors()
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }
}
