//! Submissions: the server's record of one upload
//!
//! A submission is created as soon as an upload is accepted. The server then queues the
//! image and spawns one or more [`Job`]s for it. A submission counts as finished once
//! processing has finished *and* at least one job exists; it succeeded when every one of
//! its jobs did.

use crate::error::{Error, Result};
use crate::job::Job;
use crate::request::{ApiContext, Request};
use crate::status::{Pollable, StatusCache};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Timestamp format of `processing_started` / `processing_finished`
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Deserialize)]
struct SubmissionReply {
    #[serde(default)]
    user: Option<i64>,
    #[serde(default)]
    processing_started: Option<String>,
    #[serde(default)]
    processing_finished: Option<String>,
    #[serde(default)]
    user_images: Vec<i64>,
    #[serde(default)]
    images: Vec<Option<i64>>,
    #[serde(default)]
    jobs: Vec<Option<i64>>,
    #[serde(default)]
    job_calibrations: Vec<(i64, i64)>,
}

fn parse_timestamp(raw: Option<&str>) -> Result<Option<NaiveDateTime>> {
    match raw.map(str::trim) {
        None | Some("") | Some("None") => Ok(None),
        Some(text) => NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
            .map(Some)
            .map_err(|e| Error::MalformedResponse(format!("bad timestamp {:?}: {}", text, e))),
    }
}

/// An uploaded image being processed by the service
pub struct Submission {
    id: i64,
    api: ApiContext,
    user: Option<i64>,
    processing_started: Option<NaiveDateTime>,
    processing_finished: Option<NaiveDateTime>,
    user_images: Vec<i64>,
    images: Vec<i64>,
    job_calibrations: Vec<(i64, i64)>,
    jobs: Vec<Job>,
    cache: StatusCache,
}

impl Submission {
    /// Handle for submission `id`; nothing is requested until the status is asked for
    pub fn new(id: i64, api: ApiContext) -> Self {
        Self {
            id,
            api,
            user: None,
            processing_started: None,
            processing_finished: None,
            user_images: Vec::new(),
            images: Vec::new(),
            job_calibrations: Vec::new(),
            jobs: Vec::new(),
            cache: StatusCache::default(),
        }
    }

    /// Id of the uploading user
    pub fn user(&self) -> Option<i64> {
        self.user
    }

    /// When the server started processing
    pub fn processing_started(&self) -> Option<NaiveDateTime> {
        self.processing_started
    }

    /// When the server finished processing
    pub fn processing_finished(&self) -> Option<NaiveDateTime> {
        self.processing_finished
    }

    /// User image ids
    pub fn user_images(&self) -> &[i64] {
        &self.user_images
    }

    /// Image ids
    pub fn images(&self) -> &[i64] {
        &self.images
    }

    /// `(job id, calibration id)` pairs for solved jobs
    pub fn job_calibrations(&self) -> &[(i64, i64)] {
        &self.job_calibrations
    }

    /// Ids of the jobs known so far, whether or not the submission is finished
    pub fn job_ids(&self) -> Vec<i64> {
        self.jobs.iter().map(Pollable::id).collect()
    }

    /// Jobs of a finished submission
    ///
    /// # Errors
    ///
    /// [`Error::StillProcessing`] until the submission is terminal.
    pub fn jobs(&self) -> Result<&[Job]> {
        self.ensure_done()?;
        Ok(&self.jobs)
    }

    /// Mutable access to the jobs of a finished submission
    pub fn jobs_mut(&mut self) -> Result<&mut [Job]> {
        self.ensure_done()?;
        Ok(&mut self.jobs)
    }

    /// Take ownership of the jobs of a finished submission
    pub fn into_jobs(self) -> Result<Vec<Job>> {
        self.ensure_done()?;
        Ok(self.jobs)
    }

    fn ensure_done(&self) -> Result<()> {
        if self.done() {
            Ok(())
        } else {
            Err(Error::StillProcessing {
                entity: Self::ENTITY,
                id: self.id,
            })
        }
    }
}

#[async_trait]
impl Pollable for Submission {
    const ENTITY: &'static str = "submission";

    fn id(&self) -> i64 {
        self.id
    }

    async fn fetch_status(&mut self) -> Result<Value> {
        let url = self.api.endpoints().submission(self.id);
        let response = self.api.execute(Request::get(url)).await?.into_json()?;
        let reply: SubmissionReply = serde_json::from_value(response.clone())?;

        self.user = reply.user;
        self.processing_started = parse_timestamp(reply.processing_started.as_deref())?;
        self.processing_finished = parse_timestamp(reply.processing_finished.as_deref())?;
        self.user_images = reply.user_images;
        self.images = reply.images.into_iter().flatten().collect();
        self.job_calibrations = reply.job_calibrations;
        self.jobs = reply
            .jobs
            .into_iter()
            .flatten()
            .map(|id| Job::new(id, self.api.clone()))
            .collect();

        tracing::trace!(
            submission_id = self.id,
            jobs = ?self.job_ids(),
            finished = self.processing_finished.is_some(),
            "submission status"
        );

        for job in &mut self.jobs {
            job.status(false).await?;
        }

        Ok(response)
    }

    fn is_terminal(&self) -> bool {
        self.processing_finished.is_some() && !self.jobs.is_empty()
    }

    fn is_success(&self) -> bool {
        !self.jobs.is_empty() && self.jobs.iter().all(Pollable::success)
    }

    // Settled once every job is terminal or one of them has failed
    fn is_settled(&self) -> bool {
        self.done()
            && (self.jobs.iter().all(Pollable::done)
                || self.jobs.iter().any(|job| job.done() && !job.success()))
    }

    fn status_cache(&self) -> &StatusCache {
        &self.cache
    }

    fn status_cache_mut(&mut self) -> &mut StatusCache {
        &mut self.cache
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("jobs", &self.jobs)
            .finish()
    }
}

impl fmt::Display for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submission {} ({:?}", self.id, self.state())?;
        if !self.jobs.is_empty() {
            write!(f, ", jobs {:?}", self.job_ids())?;
        }
        write!(f, ")")
    }
}
