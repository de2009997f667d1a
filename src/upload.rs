//! Image uploads
//!
//! An upload is a single authenticated POST: either the image itself (multipart) or a URL
//! the service should fetch it from. The reply carries the id of the new submission.

use crate::error::{Error, Result};
use crate::request::{ApiContext, Request};
use crate::settings::Settings;
use crate::submission::Submission;
use crate::transport::FilePart;
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

/// Multipart field holding the image
pub const FILE_FIELD: &str = "file";

/// What to submit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadSource {
    /// A local image file
    File(PathBuf),
    /// An image the service downloads itself
    Url(String),
}

impl fmt::Display for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::File(path) => write!(f, "{}", path.display()),
            UploadSource::Url(url) => f.write_str(url),
        }
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        UploadSource::File(path)
    }
}

impl From<&Path> for UploadSource {
    fn from(path: &Path) -> Self {
        UploadSource::File(path.to_path_buf())
    }
}

/// Submits images with a set of default settings
///
/// Per-call settings are laid over the defaults for that call only; the defaults
/// themselves never change.
#[derive(Clone, Debug)]
pub struct Uploader {
    api: ApiContext,
    defaults: Settings,
}

impl Uploader {
    /// `api` should carry an authenticated executor
    pub fn new(api: ApiContext, defaults: Settings) -> Self {
        Self { api, defaults }
    }

    /// Settings applied to every upload
    pub fn defaults(&self) -> &Settings {
        &self.defaults
    }

    /// Upload a local file
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] when the file cannot be read
    /// - any error of the request or session layers
    pub async fn upload_file(&self, path: &Path, settings: Option<&Settings>) -> Result<Submission> {
        let content = tokio::fs::read(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read '{}': {}", path.display(), e),
            ))
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        tracing::info!(path = %path.display(), bytes = content.len(), "uploading file");

        let request = Request::post(self.api.endpoints().upload())
            .with_settings(&self.effective(settings))
            .with_file(FilePart {
                field: FILE_FIELD.to_string(),
                filename,
                content: Bytes::from(content),
            });
        self.submit_request(request).await
    }

    /// Ask the service to fetch and solve an image from `url`
    pub async fn upload_url(&self, url: &str, settings: Option<&Settings>) -> Result<Submission> {
        let parsed = url::Url::parse(url).map_err(|e| Error::Config {
            message: format!("invalid image URL '{}': {}", url, e),
            key: Some("url".to_string()),
        })?;

        tracing::info!(url = %parsed, "submitting URL");

        let request = Request::post(self.api.endpoints().url_upload())
            .with_data("url", parsed.as_str())
            .with_settings(&self.effective(settings));
        self.submit_request(request).await
    }

    /// Upload either kind of source
    pub async fn submit(&self, source: &UploadSource, settings: Option<&Settings>) -> Result<Submission> {
        match source {
            UploadSource::File(path) => self.upload_file(path, settings).await,
            UploadSource::Url(url) => self.upload_url(url, settings).await,
        }
    }

    fn effective(&self, settings: Option<&Settings>) -> Settings {
        match settings {
            Some(call) => self.defaults.merged(call),
            None => self.defaults.clone(),
        }
    }

    async fn submit_request(&self, request: Request) -> Result<Submission> {
        let reply = self.api.execute(request).await?.into_json()?;
        let id = reply.get("subid").and_then(Value::as_i64).ok_or_else(|| {
            Error::MalformedResponse(format!("upload reply has no submission id: {}", reply))
        })?;

        tracing::info!(submission_id = id, "upload accepted");
        Ok(Submission::new(id, self.api.clone()))
    }
}
