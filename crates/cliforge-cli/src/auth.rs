//! Request authentication for generated binaries.
//!
//! The embedded `behaviors.auth` section decides the scheme; tokens are
//! resolved from the environment and attached per request by wrapping
//! the transport.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use cliforge_core::config::AuthBehavior;
use cliforge_core::traits::{Authenticator, HttpTransport};
use cliforge_core::types::{HttpRequest, HttpResponse};
use log::debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct EnvTokenAuthenticator {
    behavior: AuthBehavior,
    env_prefix: String,
}

impl EnvTokenAuthenticator {
    pub fn new(behavior: AuthBehavior, env_prefix: impl Into<String>) -> Self {
        Self {
            behavior,
            env_prefix: env_prefix.into(),
        }
    }

    fn token_variable(&self) -> String {
        self.behavior
            .token_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_KEY", self.env_prefix))
    }
}

#[async_trait]
impl Authenticator for EnvTokenAuthenticator {
    async fn get_token(&self, _profile: Option<&str>) -> Result<String> {
        let variable = self.token_variable();
        std::env::var(&variable)
            .map_err(|_| anyhow!("authentication required: set {}", variable))
    }

    fn attach(&self, request: &mut HttpRequest, token: &str) {
        let header = self.behavior.header.as_deref().unwrap_or("Authorization");
        let value = if header.eq_ignore_ascii_case("authorization") {
            format!("Bearer {}", token)
        } else {
            token.to_string()
        };
        request.headers.insert(header.to_string(), value);
    }
}

/// Transport decorator that authenticates every request
pub struct AuthenticatedTransport {
    inner: Arc<dyn HttpTransport>,
    authenticator: Arc<dyn Authenticator>,
    profile: Option<String>,
}

impl AuthenticatedTransport {
    pub fn new(
        inner: Arc<dyn HttpTransport>,
        authenticator: Arc<dyn Authenticator>,
        profile: Option<String>,
    ) -> Self {
        Self {
            inner,
            authenticator,
            profile,
        }
    }
}

#[async_trait]
impl HttpTransport for AuthenticatedTransport {
    async fn execute(&self, mut request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse> {
        let token = self.authenticator.get_token(self.profile.as_deref()).await?;
        self.authenticator.attach(&mut request, &token);
        debug!("authenticated request to {}", request.url);
        self.inner.execute(request, cancel).await
    }
}
