//! API key loading
//!
//! The key can come from three places. The first non-empty one wins:
//! 1. a value passed directly,
//! 2. a file containing only the key (surrounding whitespace is trimmed),
//! 3. the `ASTROMETRY_API_KEY` environment variable.

use crate::error::{Error, Result};
use std::fmt;
use std::path::Path;

/// Environment variable consulted when no key is given explicitly
pub const API_KEY_ENV: &str = "ASTROMETRY_API_KEY";

/// An astrometry.net API key
///
/// `Debug` never prints the key itself.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key, trimming surrounding whitespace
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(key.as_ref().trim().to_string())
    }

    /// Resolve the key from the first non-empty source
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if `key_file` is given but cannot be read
    /// - [`Error::MissingApiKey`] if all sources are absent or empty
    pub fn resolve(explicit: Option<&str>, key_file: Option<&Path>) -> Result<Self> {
        if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
            return Ok(Self(key.to_string()));
        }

        if let Some(path) = key_file {
            let key = Self::from_file(path)?;
            if !key.0.is_empty() {
                return Ok(key);
            }
            tracing::warn!(path = %path.display(), "API key file is empty, falling back to environment");
        }

        Self::from_env()
    }

    /// Read the key from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read API key file '{}': {}", path.display(), e),
            ))
        })?;
        Ok(Self::new(content))
    }

    /// Read the key from [`API_KEY_ENV`]
    pub fn from_env() -> Result<Self> {
        std::env::var(API_KEY_ENV)
            .ok()
            .map(|k| Self::new(&k))
            .filter(|k| !k.0.is_empty())
            .ok_or(Error::MissingApiKey {
                env_var: API_KEY_ENV,
            })
    }

    /// The raw key, as sent to the login endpoint
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}
