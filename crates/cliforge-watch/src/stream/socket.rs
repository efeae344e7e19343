//! Bidirectional socket client over WebSocket framing.
//!
//! Inbound frames become events of type `"message"`; `send` queues
//! outbound frames through the write half of the connection.

use super::{ClientShared, EventHandler, ReconnectPolicy, StreamClient};
use crate::event::Event;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use cliforge_core::error::WatchError;
use futures_util::{SinkExt, StreamExt};
use log::debug;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

pub struct SocketClient {
    url: String,
    policy: ReconnectPolicy,
    shared: Arc<ClientShared>,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketClient {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy, cancel: CancellationToken) -> Result<Self> {
        let url = url.into();
        Url::parse(&url).map_err(|e| anyhow!("invalid socket URL '{}': {}", url, e))?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Ok(Self {
            url,
            policy,
            shared: ClientShared::new(cancel),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
        })
    }

    /// Queue an outbound frame
    pub fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.outbound_tx
            .send(payload)
            .map_err(|_| anyhow!("socket client is closed"))
    }

    async fn read_loop(
        url: String,
        policy: ReconnectPolicy,
        shared: Arc<ClientShared>,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let mut attempt = 0u32;
        loop {
            if shared.cancel.is_cancelled() {
                break;
            }

            let connected = tokio::select! {
                result = connect_async(url.as_str()) => result,
                _ = shared.cancel.cancelled() => break,
            };

            match connected {
                Ok((stream, _response)) => {
                    debug!("socket connected to {}", url);
                    shared.set_connected(true);
                    attempt = 0;

                    let (mut write, mut read) = stream.split();
                    loop {
                        tokio::select! {
                            frame = read.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    let mut event = Event::new("message", text.clone());
                                    event.raw = Some(text);
                                    shared.dispatch(event);
                                }
                                Some(Ok(Message::Binary(bytes))) => {
                                    let text = String::from_utf8_lossy(&bytes).to_string();
                                    let mut event = Event::new("message", text);
                                    event.timestamp = Utc::now();
                                    shared.dispatch(event);
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    shared.report(WatchError::Protocol(e.to_string()));
                                    break;
                                }
                            },
                            payload = outbound.recv() => {
                                if let Some(payload) = payload {
                                    if let Err(e) = write.send(Message::Binary(payload)).await {
                                        shared.report(WatchError::Protocol(e.to_string()));
                                        break;
                                    }
                                }
                            }
                            _ = shared.cancel.cancelled() => break,
                        }
                    }
                    shared.set_connected(false);
                }
                Err(e) => {
                    shared.report(WatchError::ConnectFailed(e.to_string()));
                }
            }

            attempt += 1;
            if !shared.await_reconnect(&policy, attempt - 1).await {
                break;
            }
        }
        shared.set_connected(false);
    }
}

#[async_trait]
impl StreamClient for SocketClient {
    async fn connect(&self) -> Result<()> {
        let outbound = self
            .outbound_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| anyhow!("socket client already connected"))?;
        let task = tokio::spawn(Self::read_loop(
            self.url.clone(),
            self.policy.clone(),
            Arc::clone(&self.shared),
            outbound,
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
