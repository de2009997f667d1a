//! # astrometry-client
//!
//! Async client library for the [astrometry.net](https://nova.astrometry.net) plate-solving
//! web service.
//!
//! ## Design Philosophy
//!
//! astrometry-client is designed to be:
//! - **Lazy** - Nothing is requested until a result is needed, and no result is fetched twice
//! - **Typed** - Solver settings are validated locally, server errors map to [`Error`] variants
//! - **Polite** - Polling backs off exponentially and batch uploads keep a bounded number of
//!   submissions open
//! - **Library-first** - No CLI; the transport is a trait so tests and embedders can swap it
//!
//! ## Quick Start
//!
//! ```no_run
//! use astrometry_client::{ApiKey, Client, Config, Pollable, Settings};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads ASTROMETRY_API_KEY from the environment
//!     let key = ApiKey::resolve(None, None)?;
//!
//!     let mut config = Config::default();
//!     config.settings.set("publicly_visible", "n")?;
//!
//!     let client = Client::connect(config, key).await?;
//!
//!     let mut settings = Settings::new();
//!     settings.set("downsample_factor", 2)?;
//!
//!     let mut job = client.solve_file(Path::new("m31.fits"), Some(&settings)).await?;
//!     if job.success() {
//!         let calibration = job.calibration(false).await?;
//!         println!("center: ra={} dec={}", calibration.ra, calibration.dec);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bounded-concurrency batch uploads
pub mod batch;
/// High-level client
pub mod client;
/// Configuration types
pub mod config;
/// API key loading
pub mod credential;
/// Error types
pub mod error;
/// FITS header reading and writing
pub mod fits;
/// Solving jobs and result artifacts
pub mod job;
/// Request encoding and response classification
pub mod request;
/// Retry classification and backoff schedules
pub mod retry;
/// Login and authenticated requests
pub mod session;
/// Solver settings
pub mod settings;
/// Polling state machine
pub mod status;
/// Submissions
pub mod submission;
/// HTTP transport
pub mod transport;
/// Image uploads
pub mod upload;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use batch::{BatchError, BatchPipeline, BatchResult, Completed};
pub use client::Client;
pub use config::{ApiConfig, BatchConfig, Config, MAX_IN_FLIGHT, PollConfig, RetryConfig};
pub use credential::{API_KEY_ENV, ApiKey};
pub use error::{Error, Result, SettingsError};
pub use fits::Header;
pub use job::{Annotation, Artifact, Calibration, Job, JobInfo, JobStatus};
pub use request::{ApiContext, ApiResponse, Execute, Request, RequestExecutor};
pub use session::{AuthSession, AuthenticatedExecutor};
pub use settings::{ScaleUnit, SettingValue, Settings};
pub use status::{PollState, Pollable};
pub use submission::Submission;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use upload::{UploadSource, Uploader};
