//! Configuration types for astrometry-client

use crate::error::{Error, Result};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Hard upper bound on simultaneously open submissions in a batch
pub const MAX_IN_FLIGHT: usize = 10;

/// Public astrometry.net instance
pub const DEFAULT_BASE_URL: &str = "https://nova.astrometry.net";

/// Remote service configuration (where to send requests and how long to wait for them)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the service, without the `/api` suffix (default: "https://nova.astrometry.net")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for a single HTTP request (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Polling behavior for [`until_done_with`](crate::status::Pollable::until_done_with)
///
/// The delay between status requests starts at `start_delay` and doubles after every
/// non-terminal poll, capped at `max_delay`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay after the first non-terminal poll (default: 1 second)
    #[serde(default = "default_start_delay", with = "duration_serde")]
    pub start_delay: Duration,

    /// Upper bound for the delay (default: 60 seconds, None = uncapped)
    #[serde(default = "default_poll_max_delay", with = "optional_duration_serde")]
    pub max_delay: Option<Duration>,

    /// Give up waiting after this long (default: None = wait forever)
    #[serde(default, with = "optional_duration_serde")]
    pub timeout: Option<Duration>,

    /// Retry transient errors inside the polling loop (default: None = errors abort the wait)
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            start_delay: default_start_delay(),
            max_delay: default_poll_max_delay(),
            timeout: None,
            retry: None,
        }
    }
}

/// Batch upload behavior
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum submissions open at once (default: 5, at most [`MAX_IN_FLIGHT`])
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Pause between polling rounds over the working set (default: 1 second)
    #[serde(default = "default_round_interval", with = "duration_serde")]
    pub round_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            round_interval: default_round_interval(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Reject schedules that would shrink, stall or never reach their cap
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: format!(
                    "backoff_multiplier must be a finite number of at least 1.0, got {}",
                    self.backoff_multiplier
                ),
                key: Some("backoff_multiplier".to_string()),
            });
        }

        if self.initial_delay > self.max_delay {
            return Err(Error::Config {
                message: format!(
                    "initial_delay ({:?}) must not exceed max_delay ({:?})",
                    self.initial_delay, self.max_delay
                ),
                key: Some("initial_delay".to_string()),
            });
        }

        Ok(())
    }
}

/// Main configuration for [`Client`](crate::Client)
///
/// Fields are organized into sub-configs:
/// - [`api`](ApiConfig): base URL and request timeout
/// - [`poll`](PollConfig): backoff and timeout when waiting on a submission or job
/// - [`batch`](BatchConfig): concurrency bound and round pacing for batch uploads
/// - [`settings`](Settings): solver settings sent with every upload
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote service settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Polling settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Batch upload settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Default solver settings; per-upload settings override them
    #[serde(default)]
    pub settings: Settings,
}

impl Config {
    /// Check the values that cannot be expressed in the types
    pub fn validate(&self) -> Result<()> {
        Endpoints::new(&self.api.base_url)?;

        if self.poll.start_delay.is_zero() {
            return Err(Error::Config {
                message: "poll start_delay must be greater than zero".to_string(),
                key: Some("start_delay".to_string()),
            });
        }

        if let Some(retry) = &self.poll.retry {
            retry.validate()?;
        }

        validate_max_in_flight(self.batch.max_in_flight)
    }
}

/// Check a batch concurrency bound against [`MAX_IN_FLIGHT`]
pub fn validate_max_in_flight(max_in_flight: usize) -> Result<()> {
    if max_in_flight == 0 || max_in_flight > MAX_IN_FLIGHT {
        return Err(Error::Config {
            message: format!(
                "max_in_flight must be between 1 and {}, got {}",
                MAX_IN_FLIGHT, max_in_flight
            ),
            key: Some("max_in_flight".to_string()),
        });
    }
    Ok(())
}

/// URLs of every endpoint the client talks to, derived from one base URL
#[derive(Clone, Debug)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    /// Build the endpoint set, rejecting base URLs that do not parse
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL '{}': {}", base_url, e),
            key: Some("base_url".to_string()),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(Error::Config {
                message: format!("base URL '{}' cannot hold paths", base_url),
                key: Some("base_url".to_string()),
            });
        }

        Ok(Self {
            base: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash
    pub fn base(&self) -> &str {
        &self.base
    }

    /// `POST {base}/api/login`
    pub fn login(&self) -> String {
        format!("{}/api/login", self.base)
    }

    /// `POST {base}/api/upload`
    pub fn upload(&self) -> String {
        format!("{}/api/upload", self.base)
    }

    /// `POST {base}/api/url_upload`
    pub fn url_upload(&self) -> String {
        format!("{}/api/url_upload", self.base)
    }

    /// `GET {base}/api/submissions/{id}`
    pub fn submission(&self, id: i64) -> String {
        format!("{}/api/submissions/{}", self.base, id)
    }

    /// `GET {base}/api/jobs/{id}`
    pub fn job(&self, id: i64) -> String {
        format!("{}/api/jobs/{}", self.base, id)
    }

    /// `GET {base}/api/jobs/{id}/{resource}` (info, calibration, annotations, ...)
    pub fn job_resource(&self, id: i64, resource: &str) -> String {
        format!("{}/api/jobs/{}/{}", self.base, id, resource)
    }

    /// `GET {base}/{kind}/{id}` for result files outside the JSON API
    pub fn job_file(&self, id: i64, kind: &str) -> String {
        format!("{}/{}/{}", self.base, kind, id)
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_start_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_max_delay() -> Option<Duration> {
    Some(Duration::from_secs(60))
}

fn default_max_in_flight() -> usize {
    5
}

fn default_round_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Durations are written as (possibly fractional) seconds
mod duration_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

mod optional_duration_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<f64>::deserialize(deserializer)?;
        secs.map(|s| Duration::try_from_secs_f64(s).map_err(D::Error::custom))
            .transpose()
    }
}
