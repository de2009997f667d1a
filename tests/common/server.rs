//! Mock astrometry.net server built on wiremock
//!
//! The real service answers API calls with JSON bodies labelled `text/plain` and result
//! files with their image or FITS content type; the helpers here do the same.

use astrometry_client::{ApiKey, Client, Config};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// API key every mock client logs in with
pub const TEST_API_KEY: &str = "test-api-key";

/// Reply with a JSON document the way the service does (`text/plain`)
pub fn api_reply(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string().into_bytes(), "text/plain")
}

/// Reply with a result file
pub fn file_reply(content_type: &str, body: Vec<u8>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, content_type)
}

/// Error reply for a request made with an unknown session token
pub fn invalid_session_reply(token: &str) -> ResponseTemplate {
    api_reply(json!({
        "status": "error",
        "errormessage": format!("no session with key \"{}\"", token)
    }))
}

/// Configuration pointing at `server`, with short poll and batch intervals
pub fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.api.base_url = server.uri();
    config.api.request_timeout = Duration::from_secs(5);
    config.poll.start_delay = Duration::from_millis(5);
    config.poll.max_delay = Some(Duration::from_millis(20));
    config.poll.timeout = Some(Duration::from_secs(10));
    config.batch.round_interval = Duration::from_millis(5);
    config
}

/// Client for `server`; not logged in yet
pub fn test_client(server: &MockServer) -> Client {
    Client::new(test_config(server), ApiKey::new(TEST_API_KEY))
        .expect("test configuration should be valid")
}

/// Login succeeds and hands out `token`
pub async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(api_reply(json!({
            "status": "success",
            "message": "authenticated user: test@example.com",
            "session": token
        })))
        .mount(server)
        .await;
}

/// File uploads are accepted as submission `subid`
pub async fn mount_upload(server: &MockServer, subid: i64) {
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(api_reply(json!({
            "status": "success",
            "subid": subid,
            "hash": "6024b45a16bfb5af7a73735cbabdf2b462c11214"
        })))
        .mount(server)
        .await;
}

/// Status reply of a finished submission
pub fn finished_submission(jobs: Value) -> Value {
    json!({
        "user": 1,
        "processing_started": "2020-08-20 21:39:18.078664",
        "processing_finished": "2020-08-20 21:39:23.751193",
        "user_images": [4],
        "images": [4],
        "jobs": jobs,
        "job_calibrations": [[7, 3]]
    })
}

/// Status reply of a submission that has not been picked up yet
pub fn queued_submission() -> Value {
    json!({
        "user": 1,
        "processing_started": "None",
        "processing_finished": "None",
        "user_images": [],
        "images": [],
        "jobs": [],
        "job_calibrations": []
    })
}

/// Submission `id` reports `body`
pub async fn mount_submission(server: &MockServer, id: i64, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/submissions/{}", id)))
        .respond_with(api_reply(body))
        .mount(server)
        .await;
}

/// Job `id` reports `status` ("solving", "success" or "failure")
pub async fn mount_job_status(server: &MockServer, id: i64, status: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/jobs/{}", id)))
        .respond_with(api_reply(json!({ "status": status })))
        .mount(server)
        .await;
}

/// Job `id` reports `first` for `times` requests, then `then`
pub async fn mount_job_sequence(server: &MockServer, id: i64, first: &str, times: u64, then: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/jobs/{}", id)))
        .respond_with(api_reply(json!({ "status": first })))
        .up_to_n_times(times)
        .mount(server)
        .await;
    mount_job_status(server, id, then).await;
}
