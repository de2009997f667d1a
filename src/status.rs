//! Polling state machine shared by submissions and jobs
//!
//! Both entities follow the same lifecycle: their state is only known after a status
//! request, they stay pending for a while, and eventually reach a terminal state that
//! never changes again. [`Pollable`] implements status caching, the terminal latch and
//! the wait-with-backoff loop on top of four entity-specific methods.
//!
//! ```text
//! Unknown ──status()──> Pending ──status()──> Succeeded
//!    │                     │                      (or)
//!    └─────────────────────┴──────────────────> Failed
//! ```

use crate::config::PollConfig;
use crate::error::{Error, Result};
use crate::retry::{Backoff, IsRetryable};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of a submission or job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    /// No status request has been made yet
    Unknown,
    /// The server is still working on it
    Pending,
    /// Terminal, successful
    Succeeded,
    /// Terminal, unsuccessful
    Failed,
}

impl PollState {
    /// True for [`PollState::Succeeded`] and [`PollState::Failed`]
    pub fn is_terminal(self) -> bool {
        matches!(self, PollState::Succeeded | PollState::Failed)
    }
}

/// Last status response plus the terminal latch
#[derive(Clone, Debug, Default)]
pub struct StatusCache {
    response: Option<Value>,
    terminal: bool,
}

impl StatusCache {
    /// The most recent status response
    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }
}

/// An entity whose server-side processing can be polled
///
/// Implementors provide the status request and the terminal/success predicates; the
/// provided methods handle caching and waiting.
#[async_trait]
pub trait Pollable: Send {
    /// Entity name used in errors and logs ("submission" or "job")
    const ENTITY: &'static str;

    /// Server-side id
    fn id(&self) -> i64;

    /// Send one status request, update the entity from it and return the raw response
    async fn fetch_status(&mut self) -> Result<Value>;

    /// Terminal according to the fields set by the latest status request
    fn is_terminal(&self) -> bool;

    /// Successful according to the current fields (only meaningful once terminal)
    fn is_success(&self) -> bool;

    /// True once the outcome can no longer change
    ///
    /// Defaults to [`done`](Self::done). Entities whose outcome depends on other
    /// entities still being processed override it, so that [`state`](Self::state) stays
    /// [`PollState::Pending`] until the outcome is final.
    fn is_settled(&self) -> bool {
        self.done()
    }

    /// Status cache
    fn status_cache(&self) -> &StatusCache;

    /// Status cache, mutably
    fn status_cache_mut(&mut self) -> &mut StatusCache;

    /// Current status
    ///
    /// Once terminal, the cached response is returned without a request unless `force`
    /// is set. Otherwise exactly one status request is made. Errors propagate; nothing
    /// is retried here.
    async fn status(&mut self, force: bool) -> Result<Value> {
        if !force && self.done() {
            if let Some(cached) = self.status_cache().response.clone() {
                return Ok(cached);
            }
        }

        let response = self.fetch_status().await?;
        let terminal = self.is_terminal();
        let cache = self.status_cache_mut();
        cache.terminal |= terminal;
        cache.response = Some(response.clone());
        Ok(response)
    }

    /// True once a terminal state has been observed; never reverts
    fn done(&self) -> bool {
        self.status_cache().terminal
    }

    /// True when terminal and successful; false while pending
    fn success(&self) -> bool {
        self.done() && self.is_success()
    }

    /// Current lifecycle state; only ever moves forward
    fn state(&self) -> PollState {
        if self.done() && self.is_settled() {
            if self.is_success() {
                PollState::Succeeded
            } else {
                PollState::Failed
            }
        } else if self.status_cache().response.is_some() {
            PollState::Pending
        } else {
            PollState::Unknown
        }
    }

    /// Poll until terminal and return the terminal response
    ///
    /// Sleeps `start_delay` after the first non-terminal poll, doubling after each
    /// further one up to `max_delay` (None = no cap). With a `timeout`, no sleep runs
    /// past the deadline and [`Error::Timeout`] is returned once it has passed. The
    /// first error aborts the wait.
    async fn until_done(
        &mut self,
        start_delay: Duration,
        max_delay: Option<Duration>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let config = PollConfig {
            start_delay,
            max_delay,
            timeout,
            retry: None,
        };
        self.until_done_with(&config).await
    }

    /// [`until_done`](Pollable::until_done) driven by a [`PollConfig`]
    ///
    /// When `config.retry` is set, retryable errors are retried on their own backoff
    /// schedule; running out of retries yields [`Error::ExhaustedAttempts`].
    async fn until_done_with(&mut self, config: &PollConfig) -> Result<Value> {
        let entity = Self::ENTITY;
        let id = self.id();
        let deadline = config.timeout.map(|t| Instant::now() + t);
        let mut delay = cap(config.start_delay, config.max_delay);
        let mut backoff = config.retry.as_ref().map(Backoff::new);

        loop {
            if self.done() {
                return self.status(false).await;
            }

            if let (Some(deadline), Some(timeout)) = (deadline, config.timeout) {
                if Instant::now() >= deadline {
                    tracing::warn!(entity, id, timeout_ms = timeout.as_millis(), "gave up waiting");
                    return Err(Error::Timeout {
                        entity,
                        id,
                        timeout,
                    });
                }
            }

            let pause = match self.status(false).await {
                Ok(response) => {
                    if self.done() {
                        tracing::debug!(entity, id, state = ?self.state(), "reached terminal state");
                        return Ok(response);
                    }
                    if let (Some(backoff), Some(retry)) = (backoff.as_mut(), config.retry.as_ref())
                    {
                        backoff.reset(retry);
                    }
                    let pause = delay;
                    delay = cap(delay.saturating_mul(2), config.max_delay);
                    tracing::trace!(entity, id, delay_ms = pause.as_millis(), "still pending");
                    pause
                }
                Err(e) => {
                    let Some(backoff) = backoff.as_mut().filter(|_| e.is_retryable()) else {
                        return Err(e);
                    };
                    match backoff.next_delay() {
                        Some(retry_delay) => {
                            tracing::warn!(
                                entity,
                                id,
                                error = %e,
                                attempt = backoff.retries(),
                                delay_ms = retry_delay.as_millis(),
                                "status request failed, retrying"
                            );
                            retry_delay
                        }
                        None => {
                            tracing::error!(entity, id, error = %e, "status request failed after all retries");
                            return Err(Error::ExhaustedAttempts {
                                attempts: backoff.retries() + 1,
                                source: Box::new(e),
                            });
                        }
                    }
                }
            };

            let pause = match deadline {
                Some(deadline) => pause.min(deadline.saturating_duration_since(Instant::now())),
                None => pause,
            };
            tokio::time::sleep(pause).await;
        }
    }
}

fn cap(delay: Duration, max_delay: Option<Duration>) -> Duration {
    match max_delay {
        Some(max) => delay.min(max),
        None => delay,
    }
}
