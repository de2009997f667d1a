//! One API call: payload encoding and response classification
//!
//! The astrometry.net API takes its arguments as a single form field, `request-json`,
//! holding a JSON object. Replies are either JSON (served as `text/plain`) or raw result
//! files. [`RequestExecutor`] sends a [`Request`] through a [`Transport`] and turns the reply
//! into an [`ApiResponse`] or a typed [`Error`].

use crate::config::Endpoints;
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::transport::{FilePart, HttpRequest, HttpResponse, Method, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Name of the form field carrying the JSON arguments
pub const REQUEST_JSON_FIELD: &str = "request-json";

/// Content types delivered as raw bytes
const RAW_CONTENT_TYPES: &[&str] = &["application/fits", "image/jpeg", "image/png"];

const NO_SESSION_MESSAGE: &str = "no \"session\" in JSON.";
const INVALID_SESSION_PREFIX: &str = "no session with key";

/// A prepared API call
///
/// `data` carries the call's own arguments, `settings` the solver options that apply
/// to it. Both end up in the same JSON object; on a key collision the setting wins.
#[derive(Clone, Debug)]
pub struct Request {
    /// Verb
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Call arguments
    pub data: Map<String, Value>,
    /// Solver settings for this call
    pub settings: Map<String, Value>,
    /// Optional file, sent as multipart
    pub file: Option<FilePart>,
}

impl Request {
    /// A GET without arguments
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// A POST without arguments
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            data: Map::new(),
            settings: Map::new(),
            file: None,
        }
    }

    /// Add one argument
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Attach solver settings
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.settings.extend(settings.to_json());
        self
    }

    /// Attach a file
    pub fn with_file(mut self, file: FilePart) -> Self {
        self.file = Some(file);
        self
    }

    /// The `request-json` value: `data` overlaid with `settings`, None when both are empty
    pub fn payload(&self) -> Result<Option<String>> {
        if self.data.is_empty() && self.settings.is_empty() {
            return Ok(None);
        }
        let mut merged = self.data.clone();
        for (key, value) in &self.settings {
            merged.insert(key.clone(), value.clone());
        }
        Ok(Some(serde_json::to_string(&Value::Object(merged))?))
    }

    fn to_http(&self) -> Result<HttpRequest> {
        let form = self
            .payload()?
            .map(|json| vec![(REQUEST_JSON_FIELD.to_string(), json)])
            .unwrap_or_default();

        Ok(HttpRequest {
            method: self.method,
            url: self.url.clone(),
            form,
            file: self.file.clone(),
        })
    }
}

/// A successfully classified reply
#[derive(Clone, Debug, PartialEq)]
pub enum ApiResponse {
    /// JSON document
    Json(Value),
    /// Raw file content (FITS or image)
    Binary(Bytes),
}

impl ApiResponse {
    /// The JSON document, or an error for binary replies
    pub fn into_json(self) -> Result<Value> {
        match self {
            ApiResponse::Json(value) => Ok(value),
            ApiResponse::Binary(bytes) => Err(Error::MalformedResponse(format!(
                "expected JSON, got {} bytes of binary content",
                bytes.len()
            ))),
        }
    }

    /// Deserialize the JSON document into `T`
    pub fn parse<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.into_json()?)?)
    }

    /// The raw bytes, or an error for JSON replies
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            ApiResponse::Binary(bytes) => Ok(bytes),
            ApiResponse::Json(value) => Err(Error::MalformedResponse(format!(
                "expected file content, got JSON: {}",
                value
            ))),
        }
    }
}

/// Anything that can carry out a [`Request`]
///
/// Implemented by [`RequestExecutor`] and by decorators around it such as
/// [`AuthenticatedExecutor`](crate::session::AuthenticatedExecutor).
#[async_trait]
pub trait Execute: Send + Sync {
    /// Carry out the request once (decorators may add their own retries)
    async fn execute(&self, request: Request) -> Result<ApiResponse>;
}

#[async_trait]
impl<E: Execute + ?Sized> Execute for Arc<E> {
    async fn execute(&self, request: Request) -> Result<ApiResponse> {
        (**self).execute(request).await
    }
}

/// Sends requests and classifies the replies
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    last_response: Mutex<Option<HttpResponse>>,
}

impl RequestExecutor {
    /// Executor over the given transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            last_response: Mutex::new(None),
        }
    }

    /// The raw response of the most recent call, for diagnostics
    pub async fn last_response(&self) -> Option<HttpResponse> {
        self.last_response.lock().await.clone()
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl Execute for RequestExecutor {
    async fn execute(&self, request: Request) -> Result<ApiResponse> {
        let http = request.to_http()?;
        tracing::debug!(
            url = %request.url,
            method = ?request.method,
            has_file = request.file.is_some(),
            "sending API request"
        );

        let response = self.transport.send(http).await?;
        *self.last_response.lock().await = Some(response.clone());

        classify(&request.url, &response)
    }
}

/// Executor plus endpoint set, shared by submissions, jobs and the uploader
#[derive(Clone)]
pub struct ApiContext {
    executor: Arc<dyn Execute>,
    endpoints: Endpoints,
}

impl ApiContext {
    /// Bundle an (usually authenticated) executor with the endpoints it talks to
    pub fn new(executor: Arc<dyn Execute>, endpoints: Endpoints) -> Self {
        Self {
            executor,
            endpoints,
        }
    }

    /// Endpoint set
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Executor used for every call
    pub fn executor(&self) -> &Arc<dyn Execute> {
        &self.executor
    }

    /// Carry out a request
    pub async fn execute(&self, request: Request) -> Result<ApiResponse> {
        self.executor.execute(request).await
    }
}

impl std::fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiContext")
            .field("base_url", &self.endpoints.base())
            .finish_non_exhaustive()
    }
}

/// Interpret a raw response
///
/// # Errors
///
/// - [`Error::HttpStatus`] for non-2xx statuses
/// - [`Error::NoSession`], [`Error::InvalidSession`] or [`Error::RequestFailed`] when
///   the JSON reply has `"status": "error"`
/// - [`Error::UnknownContentType`] for anything that is neither JSON text nor a result file
pub fn classify(url: &str, response: &HttpResponse) -> Result<ApiResponse> {
    if !response.is_success() {
        tracing::warn!(url = %url, status = response.status, "API returned error status");
        return Err(Error::HttpStatus {
            status: response.status,
            url: url.to_string(),
        });
    }

    let content_type = response.content_type.as_deref().unwrap_or_default();
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "text/plain" {
        let value: Value = serde_json::from_slice(&response.body)?;
        tracing::trace!(url = %url, body = %value, "JSON response");
        check_status(&value)?;
        return Ok(ApiResponse::Json(value));
    }

    if RAW_CONTENT_TYPES.contains(&mime.as_str()) {
        return Ok(ApiResponse::Binary(response.body.clone()));
    }

    Err(Error::UnknownContentType {
        url: url.to_string(),
        content_type: response.content_type.clone(),
    })
}

fn check_status(value: &Value) -> Result<()> {
    if value.get("status").and_then(Value::as_str) != Some("error") {
        return Ok(());
    }

    let message = value
        .get("errormessage")
        .and_then(Value::as_str)
        .unwrap_or("unspecified error")
        .to_string();

    if message == NO_SESSION_MESSAGE {
        Err(Error::NoSession(message))
    } else if message.starts_with(INVALID_SESSION_PREFIX) {
        Err(Error::InvalidSession(message))
    } else {
        Err(Error::RequestFailed(message))
    }
}
