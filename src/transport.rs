//! HTTP transport seam
//!
//! Everything above this module speaks in [`HttpRequest`] / [`HttpResponse`]; only
//! [`ReqwestTransport`] knows about reqwest. Tests and callers with special needs can
//! provide their own [`Transport`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// HTTP verb used by the API
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

/// A file sent as a multipart part
#[derive(Clone, Debug)]
pub struct FilePart {
    /// Form field name
    pub field: String,
    /// File name reported to the server
    pub filename: String,
    /// File content
    pub content: Bytes,
}

/// A request as handed to the transport
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Verb
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Form fields; sent url-encoded, or as multipart text parts when a file is attached
    pub form: Vec<(String, String)>,
    /// Optional file upload
    pub file: Option<FilePart>,
}

/// The raw response, before any interpretation
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// The Content-Type header, if present
    pub content_type: Option<String>,
    /// Body bytes
    pub body: Bytes,
}

impl HttpResponse {
    /// True for 2xx statuses
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as (lossy) UTF-8, for logging
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one HTTP request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return whatever the server answered
    ///
    /// Non-success statuses are returned as responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`Transport`] backed by a pooled `reqwest::Client`
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("astrometry-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config {
                message: format!("Failed to create HTTP client: {}", e),
                key: Some("request_timeout".to_string()),
            })?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            form,
            file,
        } = request;

        let mut builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };

        if let Some(file) = file {
            let mut multipart = reqwest::multipart::Form::new();
            for (name, value) in form {
                multipart = multipart.text(name, value);
            }
            let part = reqwest::multipart::Part::bytes(file.content.to_vec())
                .file_name(file.filename);
            multipart = multipart.part(file.field, part);
            builder = builder.multipart(multipart);
        } else if !form.is_empty() {
            builder = builder.form(&form);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        tracing::trace!(url = %url, status, bytes = body.len(), "HTTP response received");

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
