//! Shared test helpers: an in-memory transport with per-URL scripted replies.

use crate::error::Result;
use crate::request::REQUEST_JSON_FIELD;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub(crate) const BASE: &str = "http://astrometry.test";

/// Replies are queued per URL; the last queued reply for a URL repeats forever.
/// Unrouted URLs get a 404.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    sent: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn on(&self, url: &str, response: HttpResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, url: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.sent.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let reply = match routes.get_mut(&url) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(reply.unwrap_or_else(|| HttpResponse {
            status: 404,
            content_type: Some("text/html".to_string()),
            body: Bytes::from_static(b"not found"),
        }))
    }
}

pub(crate) fn json(value: Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        content_type: Some("text/plain".to_string()),
        body: Bytes::from(value.to_string()),
    }
}

pub(crate) fn binary(content_type: &str, body: &[u8]) -> HttpResponse {
    HttpResponse {
        status: 200,
        content_type: Some(content_type.to_string()),
        body: Bytes::copy_from_slice(body),
    }
}

/// Decoded `request-json` field of a sent request
pub(crate) fn request_json(request: &HttpRequest) -> Option<Value> {
    request
        .form
        .iter()
        .find(|(name, _)| name == REQUEST_JSON_FIELD)
        .map(|(_, value)| serde_json::from_str(value).unwrap())
}
