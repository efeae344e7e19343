//! Wire-agnostic event-stream clients.
//!
//! All three transports (server-sent events, bidirectional socket,
//! polling) expose the same interface: connect, subscribe handlers per
//! event type, drain the event channel, watch the error channel. The
//! read loops run in background tasks and share one reconnection
//! policy: wait `reconnect_interval` after an error, give up after
//! `max_reconnect_attempts` (0 means retry forever), stop immediately
//! on cancellation.

pub mod polling;
pub mod socket;
pub mod sse;

use crate::event::Event;
use anyhow::Result;
use async_trait::async_trait;
use cliforge_core::error::WatchError;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Handler invoked inline for each event of a subscribed type
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub reconnect_interval: Duration,
    /// 0 means unlimited attempts
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(2),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Open the stream and start the background read loop
    async fn connect(&self) -> Result<()>;

    fn subscribe(&self, event_type: &str, handler: EventHandler);

    fn unsubscribe(&self, event_type: &str);

    async fn close(&self);

    /// The event channel; the receiver can be taken exactly once
    fn events(&self) -> Option<mpsc::UnboundedReceiver<Event>>;

    /// The error channel; the receiver can be taken exactly once
    fn errors(&self) -> Option<mpsc::UnboundedReceiver<WatchError>>;

    fn is_connected(&self) -> bool;
}

/// State shared between a client handle and its read loop
pub(crate) struct ClientShared {
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    error_tx: mpsc::UnboundedSender<WatchError>,
    error_rx: Mutex<Option<mpsc::UnboundedReceiver<WatchError>>>,
    connected: AtomicBool,
    pub cancel: CancellationToken,
}

impl ClientShared {
    pub fn new(cancel: CancellationToken) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            error_tx,
            error_rx: Mutex::new(Some(error_rx)),
            connected: AtomicBool::new(false),
            cancel,
        })
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, event_type: &str, handler: EventHandler) {
        Self::lock(&self.handlers)
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    pub fn unsubscribe(&self, event_type: &str) {
        Self::lock(&self.handlers).remove(event_type);
    }

    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        Self::lock(&self.event_rx).take()
    }

    pub fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<WatchError>> {
        Self::lock(&self.error_rx).take()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Fan an event out to its handlers and the channel. Handler errors
    /// go to the error channel; they never stop the stream.
    pub fn dispatch(&self, event: Event) {
        let handlers: Vec<EventHandler> = Self::lock(&self.handlers)
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            if let Err(e) = handler(&event) {
                self.report(WatchError::Handler {
                    event_type: event.event_type.clone(),
                    reason: e.to_string(),
                });
            }
        }
        debug!("event: {} ({} bytes)", event.event_type, event.data.len());
        let _ = self.event_tx.send(event);
    }

    pub fn report(&self, error: WatchError) {
        warn!("stream: {}", error);
        let _ = self.error_tx.send(error);
    }

    /// Sleep out the reconnect interval. Returns false when the attempt
    /// budget is exhausted or the stream was cancelled.
    pub async fn await_reconnect(&self, policy: &ReconnectPolicy, attempt: u32) -> bool {
        if policy.max_reconnect_attempts > 0 && attempt >= policy.max_reconnect_attempts {
            self.report(WatchError::ReconnectExhausted {
                attempts: policy.max_reconnect_attempts,
            });
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(policy.reconnect_interval) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}
