//! Test doubles for the engine's collaborators.
//!
//! `MockTransport` records every request and serves scripted responses,
//! letting workflow tests run without a network.

use anyhow::Result;
use async_trait::async_trait;
use cliforge_core::error::HttpError;
use cliforge_core::types::{HttpRequest, HttpResponse};
use cliforge_core::traits::HttpTransport;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockState {
    requests: Vec<HttpRequest>,
    script: VecDeque<(u16, String)>,
    routes: HashMap<String, (u16, String)>,
    default_response: (u16, String),
    transport_failures: u32,
    delay: Option<Duration>,
}

/// Scriptable in-memory transport
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                default_response: (200, "{}".to_string()),
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every unmatched request gets this response
    pub fn respond_always(&self, status: u16, body: &str) {
        self.state().default_response = (status, body.to_string());
    }

    /// Responses served in order before falling back to the default
    pub fn respond_with(&self, responses: Vec<(u16, String)>) {
        self.state().script = responses.into();
    }

    /// Fixed response for one request path
    pub fn route(&self, path: &str, status: u16, body: &str) {
        self.state()
            .routes
            .insert(path.to_string(), (status, body.to_string()));
    }

    /// The next `count` requests fail at the transport layer
    pub fn fail_times(&self, count: u32) {
        self.state().transport_failures = count;
    }

    /// Artificial latency per request
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().requests.clone()
    }

    /// URL paths of every request, in arrival order
    pub fn requested_paths(&self) -> Vec<String> {
        self.state()
            .requests
            .iter()
            .map(|request| path_of(&request.url))
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }
}

fn path_of(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    match without_scheme.find('/') {
        Some(slash) => {
            let path = &without_scheme[slash..];
            path.split('?').next().unwrap_or(path).to_string()
        }
        None => "/".to_string(),
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse> {
        if cancel.is_cancelled() {
            return Err(cliforge_core::error::CliforgeError::Cancelled(request.url.clone()).into());
        }

        let (delay, response) = {
            let mut state = self.state();
            let path = path_of(&request.url);
            state.requests.push(request.clone());

            if state.transport_failures > 0 {
                state.transport_failures -= 1;
                return Err(HttpError::Transport("connection refused".to_string()).into());
            }

            let response = if let Some(scripted) = state.script.pop_front() {
                scripted
            } else if let Some(routed) = state.routes.get(&path) {
                routed.clone()
            } else {
                state.default_response.clone()
            };
            (state.delay, response)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(HttpResponse {
            status: response.0,
            headers: HashMap::new(),
            body: response.1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_paths() {
        assert_eq!(path_of("https://api.test/v1/items?page=2"), "/v1/items");
        assert_eq!(path_of("https://api.test"), "/");
    }
}
