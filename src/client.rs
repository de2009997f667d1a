//! High-level client
//!
//! [`Client`] wires the layers together from one [`Config`]:
//!
//! ```text
//! Client ─┬─ Uploader ──┐
//!         ├─ Submission ├─> AuthenticatedExecutor ─> RequestExecutor ─> Transport
//!         └─ Job ───────┘           │
//!                              AuthSession (login via RequestExecutor)
//! ```

use crate::batch::BatchPipeline;
use crate::config::{Config, Endpoints};
use crate::credential::ApiKey;
use crate::error::{Error, Result};
use crate::fits::Header;
use crate::job::Job;
use crate::request::{ApiContext, RequestExecutor};
use crate::session::{AuthSession, AuthenticatedExecutor};
use crate::settings::Settings;
use crate::status::Pollable;
use crate::submission::Submission;
use crate::transport::{HttpResponse, ReqwestTransport, Transport};
use crate::upload::{UploadSource, Uploader};
use std::path::Path;
use std::sync::Arc;

/// Entry point for talking to an astrometry.net instance
///
/// # Example
///
/// ```no_run
/// use astrometry_client::{ApiKey, Client, Config};
/// use std::path::Path;
///
/// # async fn example() -> astrometry_client::Result<()> {
/// let key = ApiKey::resolve(None, None)?;
/// let client = Client::connect(Config::default(), key).await?;
///
/// if let Some(wcs) = client.calibrate_file_wcs(Path::new("m31.fits"), None).await? {
///     println!("solved: CRVAL1 = {:?}", wcs.get("CRVAL1"));
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    executor: Arc<RequestExecutor>,
    session: Arc<AuthSession>,
    api: ApiContext,
    uploader: Uploader,
}

impl Client {
    /// Build a client over HTTP; no request is made yet
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the configuration is invalid.
    pub fn new(config: Config, api_key: ApiKey) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.api.request_timeout)?);
        Self::with_transport(config, api_key, transport)
    }

    /// Build a client over a custom transport
    pub fn with_transport(
        config: Config,
        api_key: ApiKey,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let endpoints = Endpoints::new(&config.api.base_url)?;

        let executor = Arc::new(RequestExecutor::new(transport));
        let session = Arc::new(AuthSession::new(
            api_key,
            endpoints.login(),
            executor.clone(),
        ));
        let authenticated = AuthenticatedExecutor::new(executor.clone(), session.clone());
        let api = ApiContext::new(Arc::new(authenticated), endpoints);
        let uploader = Uploader::new(api.clone(), config.settings.clone());

        tracing::debug!(base_url = %config.api.base_url, "client created");

        Ok(Self {
            config,
            executor,
            session,
            api,
            uploader,
        })
    }

    /// [`Client::new`] followed by a login
    pub async fn connect(config: Config, api_key: ApiKey) -> Result<Self> {
        let client = Self::new(config, api_key)?;
        client.login(false).await?;
        Ok(client)
    }

    /// Log in (a no-op when already logged in, unless `force`)
    pub async fn login(&self, force: bool) -> Result<()> {
        self.session.login(force).await
    }

    /// The authentication session
    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Configuration the client was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Raw response of the most recent API call
    pub async fn last_response(&self) -> Option<HttpResponse> {
        self.executor.last_response().await
    }

    /// Upload a file; returns the new submission without waiting for it
    pub async fn upload_file(&self, path: &Path, settings: Option<&Settings>) -> Result<Submission> {
        self.uploader.upload_file(path, settings).await
    }

    /// Submit an image URL; returns the new submission without waiting for it
    pub async fn upload_url(&self, url: &str, settings: Option<&Settings>) -> Result<Submission> {
        self.uploader.upload_url(url, settings).await
    }

    /// Upload a file and wait until its first job is terminal
    ///
    /// Waiting follows the client's [`PollConfig`](crate::config::PollConfig), for the
    /// submission and the job alike. The returned job may have failed.
    pub async fn solve_file(&self, path: &Path, settings: Option<&Settings>) -> Result<Job> {
        let mut submission = self.upload_file(path, settings).await?;
        submission.until_done_with(&self.config.poll).await?;

        let id = submission.id();
        let mut job = submission
            .into_jobs()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::MalformedResponse(format!("submission {} has no jobs", id)))?;

        job.until_done_with(&self.config.poll).await?;
        tracing::info!(path = %path.display(), job_id = job.id(), success = job.success(), "file processed");
        Ok(job)
    }

    /// Upload a file and return its WCS solution, or None when it could not be solved
    pub async fn calibrate_file_wcs(
        &self,
        path: &Path,
        settings: Option<&Settings>,
    ) -> Result<Option<Header>> {
        let mut job = self.solve_file(path, settings).await?;
        if !job.success() {
            return Ok(None);
        }
        job.wcs_file(false).await.map(Some)
    }

    /// Batch pipeline over `inputs`
    ///
    /// `max_in_flight` overrides the configured bound.
    pub fn upload_files<I>(&self, inputs: I, max_in_flight: Option<usize>) -> Result<BatchPipeline>
    where
        I: IntoIterator,
        I::Item: Into<UploadSource> + 'static,
        I::IntoIter: Send + 'static,
    {
        let mut batch = self.config.batch.clone();
        if let Some(bound) = max_in_flight {
            batch.max_in_flight = bound;
        }
        BatchPipeline::from_config(self.uploader.clone(), inputs, &batch)
    }

    /// Handle for an existing submission
    pub fn submission(&self, id: i64) -> Submission {
        Submission::new(id, self.api.clone())
    }

    /// Handle for an existing job
    pub fn job(&self, id: i64) -> Job {
        Job::new(id, self.api.clone())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.api.base_url)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{BASE, ScriptedTransport, binary, json, request_json};
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.api.base_url = BASE.to_string();
        config.poll.start_delay = Duration::from_millis(10);
        config.settings.set("publicly_visible", "n").unwrap();
        config
    }

    fn url(path: &str) -> String {
        format!("{}{}", BASE, path)
    }

    fn script_upload(transport: &ScriptedTransport, job_status: &str) {
        transport.on(&url("/api/login"), json(json!({"status": "success", "session": "tok"})));
        transport.on(&url("/api/upload"), json(json!({"status": "success", "subid": 2})));
        transport.on(
            &url("/api/submissions/2"),
            json(json!({
                "processing_started": "2020-08-20 21:39:18.078664",
                "processing_finished": "2020-08-20 21:39:23.751193",
                "jobs": [7],
                "job_calibrations": []
            })),
        );
        transport.on(&url("/api/jobs/7"), json(json!({"status": "solving"})));
        transport.on(&url("/api/jobs/7"), json(json!({ "status": job_status })));
    }

    fn image() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".fits").tempfile().unwrap();
        file.write_all(b"SIMPLE").unwrap();
        file
    }

    #[tokio::test(start_paused = true)]
    async fn calibrate_returns_wcs_for_solved_image() {
        let transport = ScriptedTransport::new();
        script_upload(&transport, "success");
        transport.on(&url("/wcs_file/7"), binary("application/fits", &Header::new().to_bytes()));

        let client = Client::with_transport(config(), ApiKey::new("key"), transport.clone()).unwrap();
        let file = image();
        let wcs = client.calibrate_file_wcs(file.path(), None).await.unwrap();

        assert!(wcs.is_some());
        let upload = transport
            .sent()
            .into_iter()
            .find(|r| r.url == url("/api/upload"))
            .unwrap();
        assert_eq!(
            request_json(&upload),
            Some(json!({"publicly_visible": "n", "session": "tok"}))
        );
        assert_eq!(transport.count(&url("/api/login")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn calibrate_returns_none_for_failed_job() {
        let transport = ScriptedTransport::new();
        script_upload(&transport, "failure");

        let client = Client::with_transport(config(), ApiKey::new("key"), transport.clone()).unwrap();
        let file = image();

        assert!(client.calibrate_file_wcs(file.path(), None).await.unwrap().is_none());
        assert_eq!(transport.count(&url("/wcs_file/7")), 0);
    }

    #[tokio::test]
    async fn handles_for_existing_ids_share_the_session() {
        let transport = ScriptedTransport::new();
        transport.on(&url("/api/login"), json(json!({"status": "success", "session": "tok"})));
        transport.on(&url("/api/jobs/3"), json(json!({"status": "success"})));

        let client = Client::with_transport(config(), ApiKey::new("key"), transport.clone()).unwrap();
        let mut job = client.job(3);
        job.status(false).await.unwrap();

        assert!(client.session().logged_in().await);
        assert_eq!(client.last_response().await.unwrap().status, 200);
        assert_eq!(client.submission(9).id(), 9);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config();
        bad.batch.max_in_flight = 0;
        let transport = ScriptedTransport::new();
        assert!(matches!(
            Client::with_transport(bad, ApiKey::new("key"), transport),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn batch_bound_can_be_overridden() {
        let transport = ScriptedTransport::new();
        let client = Client::with_transport(config(), ApiKey::new("key"), transport).unwrap();

        assert!(client.upload_files(Vec::<std::path::PathBuf>::new(), Some(10)).is_ok());
        assert!(client.upload_files(Vec::<std::path::PathBuf>::new(), Some(11)).is_err());
    }
}
