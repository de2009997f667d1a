//! Solving jobs and their result artifacts
//!
//! A [`Job`] is the server's unit of work for one image. Once it has finished, its
//! results can be downloaded. Every artifact is fetched at most once and then served
//! from a per-job cache, unless the caller asks for a forced refresh.

use crate::error::{Error, Result};
use crate::fits::Header;
use crate::request::{ApiContext, ApiResponse, Request};
use crate::status::{Pollable, StatusCache};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Job status as reported by the server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Still being solved
    Solving,
    /// Solved
    Success,
    /// Could not be solved
    Failure,
    /// Not queried yet, or a status string this client does not know
    #[default]
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    fn parse(status: &str) -> Self {
        match status {
            "solving" => JobStatus::Solving,
            "success" => JobStatus::Success,
            "failure" => JobStatus::Failure,
            _ => JobStatus::Unknown,
        }
    }

    /// True for success and failure
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }
}

/// Sky position and scale of a solved image
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Right ascension of the field center (degrees)
    pub ra: f64,
    /// Declination of the field center (degrees)
    pub dec: f64,
    /// Field radius (degrees)
    pub radius: f64,
    /// Pixel scale (arcseconds per pixel)
    pub pixscale: f64,
    /// Position angle of the image up direction (degrees east of north)
    pub orientation: f64,
    /// Image parity (1.0 or -1.0)
    pub parity: f64,
}

/// Summary of a finished job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Status at the time of the request
    pub status: JobStatus,
    /// Name of the uploaded file
    #[serde(default)]
    pub original_filename: String,
    /// Catalogued objects inside the field
    #[serde(default)]
    pub objects_in_field: Vec<String>,
    /// Tags added by the solver
    #[serde(default)]
    pub machine_tags: Vec<String>,
    /// All tags, user and machine
    #[serde(default)]
    pub tags: Vec<String>,
    /// Calibration, absent for failed jobs
    #[serde(default)]
    pub calibration: Option<Calibration>,
}

/// An object drawn on the annotated image
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Catalog kind ("ngc", "ic", "bright", "hd", ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Object names
    #[serde(default)]
    pub names: Vec<String>,
    /// Pixel column of the object
    pub pixelx: f64,
    /// Pixel row of the object
    pub pixely: f64,
    /// Marker radius in pixels
    #[serde(default)]
    pub radius: f64,
    /// Visual magnitude, when the catalog has one
    #[serde(default)]
    pub vmag: Option<f64>,
}

#[derive(Deserialize)]
struct AnnotationsReply {
    annotations: Vec<Annotation>,
}

/// Downloadable results of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// `/api/jobs/{id}/info`
    Info,
    /// `/api/jobs/{id}/calibration`
    Calibration,
    /// `/api/jobs/{id}/annotations`
    Annotations,
    /// WCS solution as a header-only FITS file
    WcsFile,
    /// Original image with the WCS solution in its header
    NewFitsFile,
    /// Reference stars near the field (FITS table)
    RdlsFile,
    /// Extracted sources (FITS table)
    AxyFile,
    /// Matched field/index star correspondences (FITS table)
    CorrFile,
    /// Image with catalog objects drawn on it
    AnnotatedDisplay,
    /// Red/green overlay of matched stars
    RedGreenImageDisplay,
    /// Image with extracted sources marked
    ExtractionImageDisplay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Gate {
    Terminal,
    Success,
}

impl Artifact {
    /// Path component used in the artifact's URL
    pub fn name(self) -> &'static str {
        match self {
            Artifact::Info => "info",
            Artifact::Calibration => "calibration",
            Artifact::Annotations => "annotations",
            Artifact::WcsFile => "wcs_file",
            Artifact::NewFitsFile => "new_fits_file",
            Artifact::RdlsFile => "rdls_file",
            Artifact::AxyFile => "axy_file",
            Artifact::CorrFile => "corr_file",
            Artifact::AnnotatedDisplay => "annotated_display",
            Artifact::RedGreenImageDisplay => "red_green_image_display",
            Artifact::ExtractionImageDisplay => "extraction_image_display",
        }
    }

    fn gate(self) -> Gate {
        match self {
            Artifact::Info => Gate::Terminal,
            _ => Gate::Success,
        }
    }

    fn url(self, api: &ApiContext, id: i64) -> String {
        match self {
            Artifact::Info | Artifact::Calibration | Artifact::Annotations => {
                api.endpoints().job_resource(id, self.name())
            }
            _ => api.endpoints().job_file(id, self.name()),
        }
    }
}

/// A server-side solving job
pub struct Job {
    id: i64,
    api: ApiContext,
    status: JobStatus,
    cache: StatusCache,
    artifacts: HashMap<Artifact, ApiResponse>,
}

impl Job {
    /// Handle for job `id`; no request is made until the status is asked for
    pub fn new(id: i64, api: ApiContext) -> Self {
        Self {
            id,
            api,
            status: JobStatus::Unknown,
            cache: StatusCache::default(),
            artifacts: HashMap::new(),
        }
    }

    /// Status from the most recent status request
    pub fn job_status(&self) -> JobStatus {
        self.status
    }

    /// True when `artifact` is held in the cache
    pub fn is_cached(&self, artifact: Artifact) -> bool {
        self.artifacts.contains_key(&artifact)
    }

    /// Job summary; available once the job is terminal, even when it failed
    pub async fn info(&mut self, force: bool) -> Result<JobInfo> {
        self.fetch(Artifact::Info, force).await?.parse()
    }

    /// Calibration of the solved image
    pub async fn calibration(&mut self, force: bool) -> Result<Calibration> {
        self.fetch(Artifact::Calibration, force).await?.parse()
    }

    /// Catalog objects inside the field
    pub async fn annotations(&mut self, force: bool) -> Result<Vec<Annotation>> {
        let reply: AnnotationsReply = self.fetch(Artifact::Annotations, force).await?.parse()?;
        Ok(reply.annotations)
    }

    /// The WCS solution, parsed
    pub async fn wcs_file(&mut self, force: bool) -> Result<Header> {
        let bytes = self.wcs_file_raw(force).await?;
        Header::parse(&bytes)
    }

    /// The WCS solution as FITS bytes
    pub async fn wcs_file_raw(&mut self, force: bool) -> Result<Bytes> {
        self.fetch_bytes(Artifact::WcsFile, force).await
    }

    /// The uploaded image with the solution written into its header
    pub async fn new_fits_file_raw(&mut self, force: bool) -> Result<Bytes> {
        self.fetch_bytes(Artifact::NewFitsFile, force).await
    }

    /// Reference catalog stars near the field
    pub async fn rdls_file_raw(&mut self, force: bool) -> Result<Bytes> {
        self.fetch_bytes(Artifact::RdlsFile, force).await
    }

    /// Sources extracted from the image
    pub async fn axy_file_raw(&mut self, force: bool) -> Result<Bytes> {
        self.fetch_bytes(Artifact::AxyFile, force).await
    }

    /// Correspondences between image and catalog stars
    pub async fn corr_file_raw(&mut self, force: bool) -> Result<Bytes> {
        self.fetch_bytes(Artifact::CorrFile, force).await
    }

    /// Annotated image (PNG or JPEG)
    pub async fn annotated_display(&mut self, force: bool) -> Result<Bytes> {
        self.fetch_bytes(Artifact::AnnotatedDisplay, force).await
    }

    /// Red/green match overlay (PNG)
    pub async fn red_green_image_display(&mut self, force: bool) -> Result<Bytes> {
        self.fetch_bytes(Artifact::RedGreenImageDisplay, force).await
    }

    /// Extracted sources overlay (PNG)
    pub async fn extraction_image_display(&mut self, force: bool) -> Result<Bytes> {
        self.fetch_bytes(Artifact::ExtractionImageDisplay, force).await
    }

    async fn fetch_bytes(&mut self, artifact: Artifact, force: bool) -> Result<Bytes> {
        self.fetch(artifact, force).await?.into_bytes()
    }

    async fn fetch(&mut self, artifact: Artifact, force: bool) -> Result<ApiResponse> {
        if !force {
            if let Some(cached) = self.artifacts.get(&artifact) {
                return Ok(cached.clone());
            }
        }

        self.status(force).await?;
        self.check_gate(artifact.gate())?;

        tracing::debug!(job_id = self.id, artifact = artifact.name(), "fetching job artifact");
        let reply = self
            .api
            .execute(Request::get(artifact.url(&self.api, self.id)))
            .await?;
        self.artifacts.insert(artifact, reply.clone());
        Ok(reply)
    }

    fn check_gate(&self, gate: Gate) -> Result<()> {
        if !self.done() {
            return Err(Error::StillProcessing {
                entity: Self::ENTITY,
                id: self.id,
            });
        }
        if gate == Gate::Success && !self.success() {
            return Err(Error::StatusFailed { id: self.id });
        }
        Ok(())
    }
}

#[async_trait]
impl Pollable for Job {
    const ENTITY: &'static str = "job";

    fn id(&self) -> i64 {
        self.id
    }

    async fn fetch_status(&mut self) -> Result<Value> {
        let url = self.api.endpoints().job(self.id);
        let response = self.api.execute(Request::get(url)).await?.into_json()?;

        let status = response
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::MalformedResponse(format!("job {} status reply has no status", self.id))
            })?;
        self.status = JobStatus::parse(status);
        tracing::trace!(job_id = self.id, status = ?self.status, "job status");

        Ok(response)
    }

    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    fn status_cache(&self) -> &StatusCache {
        &self.cache
    }

    fn status_cache_mut(&mut self) -> &mut StatusCache {
        &mut self.cache
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("cached", &self.artifacts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} ({:?})", self.id, self.status)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoints;
    use crate::request::RequestExecutor;
    use crate::status::PollState;
    use crate::test_helpers::{BASE, ScriptedTransport, binary, json};
    use serde_json::json;
    use std::sync::Arc;

    fn api(transport: &Arc<ScriptedTransport>) -> ApiContext {
        ApiContext::new(
            Arc::new(RequestExecutor::new(transport.clone())),
            Endpoints::new(BASE).unwrap(),
        )
    }

    fn url(path: &str) -> String {
        format!("{}{}", BASE, path)
    }

    fn job_info() -> Value {
        json!({
            "objects_in_field": ["NGC 3982"],
            "machine_tags": ["NGC 3982"],
            "tags": ["NGC 3982"],
            "status": "success",
            "original_filename": "100303_Li_00000014.fits",
            "calibration": {
                "ra": 179.11639240832304,
                "dec": 55.127941301867835,
                "radius": 0.2903240582718073,
                "pixscale": 0.566166136261909,
                "orientation": 179.35359923850913,
                "parity": 1.0
            }
        })
    }

    fn wcs_bytes() -> Vec<u8> {
        let mut header = Header::new();
        header.set(crate::fits::Card::new(
            "CTYPE1",
            crate::fits::HeaderValue::Text("RA---TAN".to_string()),
            None,
        )
        .unwrap());
        header.to_bytes()
    }

    #[tokio::test]
    async fn successful_job_serves_info_from_cache() {
        let transport = ScriptedTransport::new();
        transport.on(&url("/api/jobs/1"), json(json!({"status": "success"})));
        transport.on(&url("/api/jobs/1/info"), json(job_info()));
        let mut job = Job::new(1, api(&transport));

        assert!(!job.done());
        assert_eq!(job.state(), PollState::Unknown);

        let info = job.info(false).await.unwrap();
        assert_eq!(info.status, JobStatus::Success);
        assert_eq!(info.original_filename, "100303_Li_00000014.fits");
        assert_eq!(info.calibration.as_ref().unwrap().parity, 1.0);
        assert!(job.success());
        assert!(job.is_cached(Artifact::Info));

        let again = job.info(false).await.unwrap();
        assert_eq!(again, info);
        assert_eq!(transport.count(&url("/api/jobs/1/info")), 1);
        assert_eq!(transport.count(&url("/api/jobs/1")), 1);
    }

    #[tokio::test]
    async fn failed_job_has_info_but_no_results() {
        let transport = ScriptedTransport::new();
        transport.on(&url("/api/jobs/0"), json(json!({"status": "failure"})));
        transport.on(
            &url("/api/jobs/0/info"),
            json(json!({"status": "failure", "original_filename": "x.fits", "calibration": null})),
        );
        let mut job = Job::new(0, api(&transport));

        let info = job.info(false).await.unwrap();
        assert_eq!(info.status, JobStatus::Failure);
        assert!(info.calibration.is_none());

        assert!(matches!(
            job.calibration(false).await,
            Err(Error::StatusFailed { id: 0 })
        ));
        assert!(matches!(
            job.wcs_file(false).await,
            Err(Error::StatusFailed { id: 0 })
        ));
        assert_eq!(transport.count(&url("/wcs_file/0")), 0);
    }

    #[tokio::test]
    async fn solving_job_reports_still_processing() {
        let transport = ScriptedTransport::new();
        transport.on(&url("/api/jobs/2"), json(json!({"status": "solving"})));
        let mut job = Job::new(2, api(&transport));

        match job.info(false).await {
            Err(Error::StillProcessing { entity, id }) => {
                assert_eq!(entity, "job");
                assert_eq!(id, 2);
            }
            other => panic!("expected StillProcessing, got {:?}", other),
        }
        assert!(matches!(
            job.wcs_file(false).await,
            Err(Error::StillProcessing { .. })
        ));
        assert!(!job.is_cached(Artifact::WcsFile));
        assert_eq!(job.state(), PollState::Pending);
    }

    #[tokio::test]
    async fn wcs_file_is_fetched_once_and_parsed() {
        let transport = ScriptedTransport::new();
        transport.on(&url("/api/jobs/5"), json(json!({"status": "success"})));
        transport.on(&url("/wcs_file/5"), binary("application/fits", &wcs_bytes()));
        let mut job = Job::new(5, api(&transport));

        let header = job.wcs_file(false).await.unwrap();
        assert!(header.get("CTYPE1").is_some());

        let raw = job.wcs_file_raw(false).await.unwrap();
        assert_eq!(raw.len() % crate::fits::BLOCK_SIZE, 0);
        assert_eq!(transport.count(&url("/wcs_file/5")), 1);

        job.wcs_file(true).await.unwrap();
        assert_eq!(transport.count(&url("/wcs_file/5")), 2);
        assert_eq!(transport.count(&url("/api/jobs/5")), 2);
    }

    #[tokio::test]
    async fn display_images_and_tables_use_file_endpoints() {
        let transport = ScriptedTransport::new();
        transport.on(&url("/api/jobs/8"), json(json!({"status": "success"})));
        transport.on(&url("/annotated_display/8"), binary("image/jpeg", b"jpeg"));
        transport.on(&url("/red_green_image_display/8"), binary("image/png", b"png1"));
        transport.on(&url("/extraction_image_display/8"), binary("image/png", b"png2"));
        transport.on(&url("/new_fits_file/8"), binary("application/fits", b"new"));
        transport.on(&url("/rdls_file/8"), binary("application/fits", b"rdls"));
        transport.on(&url("/axy_file/8"), binary("application/fits", b"axy"));
        transport.on(&url("/corr_file/8"), binary("application/fits", b"corr"));
        let mut job = Job::new(8, api(&transport));

        assert_eq!(&job.annotated_display(false).await.unwrap()[..], b"jpeg");
        assert_eq!(&job.red_green_image_display(false).await.unwrap()[..], b"png1");
        assert_eq!(&job.extraction_image_display(false).await.unwrap()[..], b"png2");
        assert_eq!(&job.new_fits_file_raw(false).await.unwrap()[..], b"new");
        assert_eq!(&job.rdls_file_raw(false).await.unwrap()[..], b"rdls");
        assert_eq!(&job.axy_file_raw(false).await.unwrap()[..], b"axy");
        assert_eq!(&job.corr_file_raw(false).await.unwrap()[..], b"corr");

        // One status request; the job was terminal after it
        assert_eq!(transport.count(&url("/api/jobs/8")), 1);
    }

    #[tokio::test]
    async fn calibration_and_annotations_parse() {
        let transport = ScriptedTransport::new();
        transport.on(&url("/api/jobs/9"), json(json!({"status": "success"})));
        transport.on(
            &url("/api/jobs/9/calibration"),
            json(job_info()["calibration"].clone()),
        );
        transport.on(
            &url("/api/jobs/9/annotations"),
            json(json!({"annotations": [
                {"type": "ngc", "names": ["NGC 3982"], "pixelx": 512.5, "pixely": 400.0, "radius": 60.0},
                {"type": "bright", "names": ["Alioth"], "pixelx": 10.0, "pixely": 20.0, "radius": 0.0, "vmag": 1.77}
            ]})),
        );
        let mut job = Job::new(9, api(&transport));

        let calibration = job.calibration(false).await.unwrap();
        assert!((calibration.ra - 179.116).abs() < 1e-3);

        let annotations = job.annotations(false).await.unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].kind, "ngc");
        assert_eq!(annotations[1].vmag, Some(1.77));
    }

    #[tokio::test]
    async fn binary_where_json_expected_is_malformed() {
        let transport = ScriptedTransport::new();
        transport.on(&url("/api/jobs/4"), binary("image/png", b"png"));
        let mut job = Job::new(4, api(&transport));

        assert!(matches!(
            job.status(false).await,
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn unknown_status_strings_map_to_unknown() {
        let status: JobStatus = serde_json::from_value(json!("queued")).unwrap();
        assert_eq!(status, JobStatus::Unknown);
        assert_eq!(JobStatus::parse("success"), JobStatus::Success);
        assert!(!JobStatus::Solving.is_terminal());
    }

    #[test]
    fn jobs_compare_by_id() {
        let transport = ScriptedTransport::new();
        let a = Job::new(3, api(&transport));
        let b = Job::new(3, api(&transport));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "job 3 (Unknown)");
    }
}
