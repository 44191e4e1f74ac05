//! The wire seam between the engine and a sync server.
//!
//! Everything that talks HTTP lives behind the [`Transport`] trait so the
//! client, bridge and scheduler can be driven by fakes under test. The
//! production implementation is [`HttpTransport`] over `reqwest`.

use crate::protocol::{BootstrapPage, PullRequest, PullResponse, PushRequest, PushResponse};
use crate::{Result, Scope, SyncError};
use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;

/// Server operations the engine needs. One trait, three calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch one page of a bootstrap snapshot.
    async fn bootstrap_page(&self, scope: Scope, cursor: Option<&str>) -> Result<BootstrapPage>;

    /// Push a batch of queued events.
    async fn push(&self, request: &PushRequest) -> Result<PushResponse>;

    /// Pull events newer than the local watermark.
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse>;

    /// Replace the bearer token used for subsequent calls.
    fn set_auth_token(&self, token: Option<String>);
}

/// `reqwest`-backed transport with bearer auth and a per-request timeout.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SyncError::Unsupported(format!("http client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn bearer(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute<T>(&self, builder: reqwest::RequestBuilder, scope: Scope) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|err| classify_reqwest(&err))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), scope, message));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| SyncError::Corrupt(format!("response body: {err}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn bootstrap_page(&self, scope: Scope, cursor: Option<&str>) -> Result<BootstrapPage> {
        let mut builder = self
            .client
            .get(self.url(&format!("/v1/sync/{scope}/bootstrap")));
        if let Some(cursor) = cursor {
            builder = builder.query(&[("cursor", cursor)]);
        }
        self.execute(builder, scope).await
    }

    async fn push(&self, request: &PushRequest) -> Result<PushResponse> {
        let builder = self.client.post(self.url("/v1/sync/push")).json(request);
        self.execute(builder, request.scope).await
    }

    async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
        let builder = self.client.post(self.url("/v1/sync/pull")).json(request);
        self.execute(builder, request.scope).await
    }

    fn set_auth_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

fn classify_reqwest(err: &reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout(err.to_string())
    } else {
        SyncError::Network(err.to_string())
    }
}

/// Map a non-success HTTP status onto the engine's error taxonomy. A 409
/// is the server's staleness signal, 401/403 mean the session must be
/// refreshed before another write is attempted.
pub fn classify_status(status: u16, scope: Scope, message: String) -> SyncError {
    match status {
        401 | 403 => SyncError::Auth { status },
        409 => SyncError::Stale { scope },
        _ => SyncError::Http { status, message },
    }
}
