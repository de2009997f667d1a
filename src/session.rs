//! Session management and authenticated requests
//!
//! [`AuthSession`] trades the API key for a session token. [`AuthenticatedExecutor`]
//! decorates any [`Execute`] so that every request carries that token, logging in lazily
//! before the first call and once more when the server reports the token as expired.

use crate::credential::ApiKey;
use crate::error::{Error, Result};
use crate::request::{ApiResponse, Execute, Request};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Name of the data key carrying the session token
pub const SESSION_FIELD: &str = "session";

/// Login state for one API key
///
/// `logged_in()` is optimistic: it turns true after a successful login and is never
/// re-verified. Only a forced login (usually triggered by an expired-session reply)
/// replaces the token.
pub struct AuthSession {
    api_key: ApiKey,
    login_url: String,
    executor: Arc<dyn Execute>,
    token: RwLock<Option<String>>,
    // Serializes logins so concurrent callers share a single round trip
    login_lock: Mutex<()>,
}

impl AuthSession {
    /// Create a logged-out session; `executor` must not be an authenticated one
    pub fn new(api_key: ApiKey, login_url: impl Into<String>, executor: Arc<dyn Execute>) -> Self {
        Self {
            api_key,
            login_url: login_url.into(),
            executor,
            token: RwLock::new(None),
            login_lock: Mutex::new(()),
        }
    }

    /// The API key this session logs in with
    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    /// True once a login has succeeded
    pub async fn logged_in(&self) -> bool {
        self.token.read().await.is_some()
    }

    pub(crate) async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Log in unless already logged in; `force` always sends a new login request
    ///
    /// # Errors
    ///
    /// - [`Error::LoginFailed`] when the server rejects the key
    /// - [`Error::MalformedResponse`] when the reply has no session token
    /// - transport errors, which are not retried
    pub async fn login(&self, force: bool) -> Result<()> {
        let _guard = self.login_lock.lock().await;
        if !force && self.token.read().await.is_some() {
            return Ok(());
        }
        self.login_locked().await
    }

    /// Forced login, skipped when another caller already replaced `stale`
    async fn refresh(&self, stale: &str) -> Result<()> {
        let _guard = self.login_lock.lock().await;
        if self.token.read().await.as_deref().is_some_and(|t| t != stale) {
            tracing::debug!("session already refreshed by another request");
            return Ok(());
        }
        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<()> {
        tracing::debug!(url = %self.login_url, "logging in");

        let request = Request::post(&self.login_url).with_data("apikey", self.api_key.expose());
        let reply = match self.executor.execute(request).await {
            Ok(reply) => reply.into_json()?,
            Err(Error::RequestFailed(message)) => {
                tracing::warn!(error = %message, "login rejected");
                return Err(Error::LoginFailed(message));
            }
            Err(e) => return Err(e),
        };

        let token = reply
            .get(SESSION_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::MalformedResponse(format!("login reply has no session token: {}", reply))
            })?
            .to_string();

        *self.token.write().await = Some(token);
        tracing::info!("logged in to astrometry.net");
        Ok(())
    }

    /// Current token, logging in first if needed
    async fn ensure_token(&self) -> Result<String> {
        self.login(false).await?;
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::MalformedResponse("session token missing after login".to_string()))
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("api_key", &self.api_key)
            .field("login_url", &self.login_url)
            .finish_non_exhaustive()
    }
}

/// Executor decorator that injects the session token
///
/// On an expired-session reply it logs in again (once) and retries the request (once);
/// a second failure is returned to the caller.
pub struct AuthenticatedExecutor<E> {
    inner: E,
    session: Arc<AuthSession>,
}

impl<E: Execute> AuthenticatedExecutor<E> {
    /// Wrap `inner`
    pub fn new(inner: E, session: Arc<AuthSession>) -> Self {
        Self { inner, session }
    }

    /// The session used for authentication
    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    async fn send_with(&self, request: &Request, token: &str) -> Result<ApiResponse> {
        let mut request = request.clone();
        request
            .data
            .insert(SESSION_FIELD.to_string(), Value::from(token));
        self.inner.execute(request).await
    }
}

#[async_trait]
impl<E: Execute> Execute for AuthenticatedExecutor<E> {
    async fn execute(&self, request: Request) -> Result<ApiResponse> {
        let token = self.session.ensure_token().await?;

        match self.send_with(&request, &token).await {
            Err(e) if e.is_invalid_session() => {
                tracing::info!(url = %request.url, "session expired, logging in again");
                self.session.refresh(&token).await?;
                let fresh = self.session.ensure_token().await?;
                self.send_with(&request, &fresh).await
            }
            other => other,
        }
    }
}
