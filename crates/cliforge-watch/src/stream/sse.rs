//! Server-sent events client.
//!
//! Wire format: `event:`, `data:` and `id:` fields, one per line; a
//! blank line commits the event. Multiple `data:` lines concatenate
//! with a newline.

use super::{ClientShared, EventHandler, ReconnectPolicy, StreamClient};
use crate::event::Event;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use cliforge_core::error::WatchError;
use futures_util::StreamExt;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Incremental parser over the line-oriented SSE wire format
#[derive(Debug, Default)]
pub struct SseParser {
    event_type: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    raw: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; a blank line commits and returns the event
    pub fn push_line(&mut self, line: &str) -> Option<Event> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.commit();
        }
        if let Some(comment) = line.strip_prefix(':') {
            debug!("sse comment: {}", comment);
            return None;
        }

        self.raw.push_str(line);
        self.raw.push('\n');

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            other => debug!("sse: ignoring field '{}'", other),
        }
        None
    }

    fn commit(&mut self) -> Option<Event> {
        if self.event_type.is_none() && self.data.is_empty() && self.id.is_none() {
            return None;
        }
        let event = Event {
            event_type: self.event_type.take().unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
            timestamp: Utc::now(),
            raw: Some(std::mem::take(&mut self.raw)),
        };
        Some(event)
    }
}

pub struct SseClient {
    url: String,
    headers: HashMap<String, String>,
    policy: ReconnectPolicy,
    http: reqwest::Client,
    shared: Arc<ClientShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SseClient {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy, cancel: CancellationToken) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(policy.connect_timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            headers: HashMap::new(),
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

    async fn read_loop(
        url: String,
        headers: HashMap<String, String>,
        http: reqwest::Client,
        policy: ReconnectPolicy,
        shared: Arc<ClientShared>,
    ) {
        let mut attempt = 0u32;
        loop {
            if shared.cancel.is_cancelled() {
                break;
            }

            let mut request = http.get(&url).header("Accept", "text/event-stream");
            for (name, value) in &headers {
                request = request.header(name, value);
            }

            let response = tokio::select! {
                result = request.send() => result,
                _ = shared.cancel.cancelled() => break,
            };

            match response {
                Ok(response) if response.status().is_success() => {
                    debug!("sse connected to {}", url);
                    shared.set_connected(true);
                    attempt = 0;

                    let mut stream = response.bytes_stream();
                    let mut parser = SseParser::new();
                    let mut buffer = String::new();
                    loop {
                        let chunk = tokio::select! {
                            chunk = stream.next() => chunk,
                            _ = shared.cancel.cancelled() => None,
                        };
                        match chunk {
                            Some(Ok(bytes)) => {
                                buffer.push_str(&String::from_utf8_lossy(&bytes));
                                while let Some(newline) = buffer.find('\n') {
                                    let line: String = buffer.drain(..=newline).collect();
                                    if let Some(event) = parser.push_line(line.trim_end_matches('\n')) {
                                        shared.dispatch(event);
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                shared.report(WatchError::Protocol(e.to_string()));
                                break;
                            }
                            None => break,
                        }
                    }
                    shared.set_connected(false);
                }
                Ok(response) => {
                    shared.report(WatchError::ConnectFailed(format!(
                        "{} answered HTTP {}",
                        url,
                        response.status()
                    )));
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
impl StreamClient for SseClient {
    async fn connect(&self) -> Result<()> {
        let task = tokio::spawn(Self::read_loop(
            self.url.clone(),
            self.headers.clone(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_frame() {
        let mut parser = SseParser::new();
        assert!(parser.push_line("event: status").is_none());
        assert!(parser.push_line("data: {\"state\":\"running\"}").is_none());
        assert!(parser.push_line("id: 7").is_none());
        let event = parser.push_line("").unwrap();
        assert_eq!(event.event_type, "status");
        assert_eq!(event.data, "{\"state\":\"running\"}");
        assert_eq!(event.id.as_deref(), Some("7"));
        assert!(event.raw.unwrap().contains("event: status"));
    }

    #[test]
    fn multiple_data_lines_concatenate_with_newline() {
        let mut parser = SseParser::new();
        parser.push_line("data: first");
        parser.push_line("data: second");
        let event = parser.push_line("").unwrap();
        assert_eq!(event.event_type, "message");
        assert_eq!(event.data, "first\nsecond");
    }

    #[test]
    fn blank_lines_between_events_commit_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.push_line("").is_none());
        assert!(parser.push_line("").is_none());
    }

    #[test]
    fn comments_and_crlf_are_tolerated() {
        let mut parser = SseParser::new();
        assert!(parser.push_line(": keep-alive").is_none());
        parser.push_line("event: done\r");
        parser.push_line("data: ok\r");
        let event = parser.push_line("\r").unwrap();
        assert_eq!(event.event_type, "done");
        assert_eq!(event.data, "ok");
    }

    #[test]
    fn frames_survive_chunk_splits() {
        // Simulates the read loop's buffering: lines arrive in pieces.
        let wire = "event: status\ndata: {\"state\":\"completed\"}\n\n";
        let mut parser = SseParser::new();
        let mut buffer = String::new();
        let mut events = Vec::new();
        for chunk in wire.as_bytes().chunks(5) {
            buffer.push_str(&String::from_utf8_lossy(chunk));
            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                if let Some(event) = parser.push_line(line.trim_end_matches('\n')) {
                    events.push(event);
                }
            }
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "status");
    }
}
