//! Polling client: periodic GETs turned into `"poll"` events.

use super::{ClientShared, EventHandler, ReconnectPolicy, StreamClient};
use crate::event::Event;
use anyhow::Result;
use async_trait::async_trait;
use cliforge_core::error::WatchError;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct PollingClient {
    url: String,
    headers: HashMap<String, String>,
    interval: Duration,
    policy: ReconnectPolicy,
    http: reqwest::Client,
    shared: Arc<ClientShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingClient {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        policy: ReconnectPolicy,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(policy.connect_timeout)
            .timeout(policy.connect_timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            headers: HashMap::new(),
            interval,
            policy,
            http,
            shared: ClientShared::new(cancel),
            task: Mutex::new(None),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    async fn poll_loop(
        url: String,
        headers: HashMap<String, String>,
        interval: Duration,
        http: reqwest::Client,
        policy: ReconnectPolicy,
        shared: Arc<ClientShared>,
    ) {
        let mut failures = 0u32;
        shared.set_connected(true);
        loop {
            if shared.cancel.is_cancelled() {
                break;
            }

            let mut request = http.get(&url);
            for (name, value) in &headers {
                request = request.header(name, value);
            }

            let response = tokio::select! {
                result = request.send() => result,
                _ = shared.cancel.cancelled() => break,
            };

            match response {
                Ok(response) if response.status().is_success() => {
                    failures = 0;
                    match response.text().await {
                        Ok(body) => {
                            debug!("poll: {} bytes", body.len());
                            shared.dispatch(Event::new("poll", body));
                        }
                        Err(e) => shared.report(WatchError::Protocol(e.to_string())),
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = shared.cancel.cancelled() => break,
                    }
                }
                Ok(response) => {
                    shared.report(WatchError::ConnectFailed(format!(
                        "{} answered HTTP {}",
                        url,
                        response.status()
                    )));
                    failures += 1;
                    if !shared.await_reconnect(&policy, failures - 1).await {
                        break;
                    }
                }
                Err(e) => {
                    shared.report(WatchError::ConnectFailed(e.to_string()));
                    failures += 1;
                    if !shared.await_reconnect(&policy, failures - 1).await {
                        break;
                    }
                }
            }
        }
        shared.set_connected(false);
    }
}

#[async_trait]
impl StreamClient for PollingClient {
    async fn connect(&self) -> Result<()> {
        let task = tokio::spawn(Self::poll_loop(
            self.url.clone(),
            self.headers.clone(),
            self.interval,
            self.http.clone(),
            self.policy.clone(),
            Arc::clone(&self.shared),
        ));
        *self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
        Ok(())
    }

    fn subscribe(&self, event_type: &str, handler: EventHandler) {
        self.shared.subscribe(event_type, handler);
    }

    fn unsubscribe(&self, event_type: &str) {
        self.shared.unsubscribe(event_type);
    }

    async fn close(&self) {
        self.shared.cancel.cancel();
        let task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
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
