//! Error types for astrometry-client
//!
//! This module provides the error taxonomy of the library:
//! - Credential and authentication failures (missing key, rejected key, session errors)
//! - Server-reported request failures and protocol violations
//! - Lifecycle errors raised when results are requested too early or from failed jobs
//! - Transport, serialization and I/O errors from the collaborators underneath

use std::time::Duration;
use thiserror::Error;

/// Result type alias for astrometry-client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for astrometry-client
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// No API key was given directly, through a key file or through the environment
    #[error(
        "no API key found: pass one directly, point to a key file, or set the {env_var} environment variable"
    )]
    MissingApiKey {
        /// The environment variable that was consulted last
        env_var: &'static str,
    },

    /// The login endpoint rejected the API key
    #[error("login failed: the API key was rejected ({0})")]
    LoginFailed(String),

    /// The request did not carry a session token
    #[error("no session supplied: {0}")]
    NoSession(String),

    /// The session token is unknown to the server (expired or invalid)
    #[error("invalid or expired session: {0}")]
    InvalidSession(String),

    /// The server answered with an error that is not session related
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The response carried a content type the client does not understand
    #[error("response from {url} has unknown content type {content_type:?}")]
    UnknownContentType {
        /// The URL the request was sent to
        url: String,
        /// The content type the server declared (None when missing)
        content_type: Option<String>,
    },

    /// The server answered with a non-success HTTP status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The HTTP status code
        status: u16,
        /// The URL the request was sent to
        url: String,
    },

    /// A result was requested before the submission or job reached a terminal state
    #[error("{entity} {id} is still processing")]
    StillProcessing {
        /// Kind of entity ("submission" or "job")
        entity: &'static str,
        /// Server-side identifier of the entity
        id: i64,
    },

    /// A result was requested from a job that finished unsuccessfully
    #[error("job {id} finished with status failure")]
    StatusFailed {
        /// The job id
        id: i64,
    },

    /// Polling did not reach a terminal state within the allotted time
    #[error("{entity} {id} did not finish within {timeout:?}")]
    Timeout {
        /// Kind of entity ("submission" or "job")
        entity: &'static str,
        /// Server-side identifier of the entity
        id: i64,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// A retried operation kept failing with transient errors
    #[error("gave up after {attempts} attempts: {source}")]
    ExhaustedAttempts {
        /// Total number of attempts made
        attempts: u32,
        /// The error returned by the last attempt
        #[source]
        source: Box<Error>,
    },

    /// A setting was rejected by validation
    #[error("invalid setting: {0}")]
    Settings(#[from] SettingsError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_in_flight")
        key: Option<String>,
    },

    /// The server reply was well-formed JSON but lacked expected content
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A FITS header could not be parsed
    #[error("FITS error: {0}")]
    Fits(String),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings validation errors
///
/// Assignment that produces one of these errors never modifies the settings map.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    /// The key is not one of the recognized settings
    #[error("{key} is not an allowed setting")]
    UnknownKey {
        /// The rejected key
        key: String,
    },

    /// The value has the wrong type for the setting
    #[error("setting {key} expects a {expected} value, got {actual}")]
    WrongType {
        /// The setting name
        key: &'static str,
        /// Name of the expected type
        expected: &'static str,
        /// Name of the type that was given
        actual: &'static str,
    },

    /// The value is of the right type but outside the allowed range or set
    #[error("value {value} is not allowed for setting {key}")]
    OutOfRange {
        /// The setting name
        key: &'static str,
        /// Display form of the rejected value
        value: String,
    },
}

impl Error {
    /// True when the error is a session error the authentication layer can recover from
    pub fn is_invalid_session(&self) -> bool {
        matches!(self, Error::InvalidSession(_))
    }

    /// True for the two "result not available" lifecycle errors
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            Error::StillProcessing { .. } | Error::StatusFailed { .. }
        )
    }
}
