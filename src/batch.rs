//! Bounded-concurrency batch uploads
//!
//! [`BatchPipeline`] keeps at most `max_in_flight` submissions open on the server. It
//! uploads lazily from its input, walks the working set round-robin (one status request
//! per entry per round, with a pause between rounds) and yields each job as soon as it
//! reaches a terminal state, refilling the freed slot from the input.
//!
//! Results arrive in completion order, not input order.

use crate::config::{BatchConfig, validate_max_in_flight};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::settings::Settings;
use crate::status::Pollable;
use crate::submission::Submission;
use crate::upload::{UploadSource, Uploader};
use futures::Stream;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// A job that reached a terminal state, with the input it came from
///
/// The job may have failed; check [`Pollable::success`].
#[derive(Debug)]
pub struct Completed {
    /// The uploaded file or URL
    pub input: UploadSource,
    /// The finished job
    pub job: Job,
}

/// An input that could not be carried through to a finished job
#[derive(Debug, thiserror::Error)]
#[error("{input}: {error}")]
pub struct BatchError {
    /// The uploaded file or URL
    pub input: UploadSource,
    /// What went wrong
    #[source]
    pub error: Error,
}

/// One item produced by a [`BatchPipeline`]
pub type BatchResult = std::result::Result<Completed, BatchError>;

type Filter = Box<dyn Fn(&UploadSource) -> bool + Send + Sync>;

enum Stage {
    Submitted(Submission),
    Solving(Job),
}

struct Entry {
    input: UploadSource,
    stage: Stage,
}

/// Lazy, bounded, round-robin upload-and-wait pipeline
pub struct BatchPipeline {
    uploader: Uploader,
    inputs: Box<dyn Iterator<Item = UploadSource> + Send>,
    settings: Option<Settings>,
    filter: Option<Filter>,
    max_in_flight: usize,
    round_interval: Duration,
    working: VecDeque<Entry>,
    ready: VecDeque<BatchResult>,
    primed: bool,
    // Entries still to visit in the current round
    round_remaining: usize,
}

impl BatchPipeline {
    /// Pipeline over `inputs`; nothing is uploaded until the first result is requested
    ///
    /// # Errors
    ///
    /// [`Error::Config`] unless `1 <= max_in_flight <= MAX_IN_FLIGHT`.
    pub fn new<I>(uploader: Uploader, inputs: I, max_in_flight: usize) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<UploadSource> + 'static,
        I::IntoIter: Send + 'static,
    {
        validate_max_in_flight(max_in_flight)?;

        Ok(Self {
            uploader,
            inputs: Box::new(inputs.into_iter().map(Into::into)),
            settings: None,
            filter: None,
            max_in_flight,
            round_interval: BatchConfig::default().round_interval,
            working: VecDeque::with_capacity(max_in_flight),
            ready: VecDeque::new(),
            primed: false,
            round_remaining: 0,
        })
    }

    /// Pipeline configured from a [`BatchConfig`]
    pub fn from_config<I>(uploader: Uploader, inputs: I, config: &BatchConfig) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<UploadSource> + 'static,
        I::IntoIter: Send + 'static,
    {
        Ok(Self::new(uploader, inputs, config.max_in_flight)?.with_round_interval(config.round_interval))
    }

    /// Only upload inputs for which `filter` returns true; the rest are skipped silently
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&UploadSource) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Settings laid over the uploader's defaults for every upload of this batch
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Pause between polling rounds
    pub fn with_round_interval(mut self, interval: Duration) -> Self {
        self.round_interval = interval;
        self
    }

    /// Submissions currently open
    pub fn in_flight(&self) -> usize {
        self.working.len()
    }

    /// Wait for the next finished job; None once every input has been handled
    pub async fn next_completed(&mut self) -> Option<BatchResult> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }

            if !self.primed {
                self.primed = true;
                self.fill().await;
                self.round_remaining = self.working.len();
                continue;
            }

            if self.working.is_empty() {
                return None;
            }

            if self.round_remaining == 0 {
                tokio::time::sleep(self.round_interval).await;
                self.round_remaining = self.working.len();
            }

            if let Some(entry) = self.working.pop_front() {
                self.round_remaining -= 1;
                self.advance(entry).await;
            }
        }
    }

    /// Drain the pipeline as a stream
    pub fn into_stream(self) -> impl Stream<Item = BatchResult> {
        futures::stream::unfold(self, |mut pipeline| async move {
            pipeline
                .next_completed()
                .await
                .map(|item| (item, pipeline))
        })
    }

    async fn advance(&mut self, entry: Entry) {
        let Entry { input, stage } = entry;

        match stage {
            Stage::Submitted(mut submission) => {
                if let Err(error) = submission.status(false).await {
                    return self.fail(input, error).await;
                }
                if !submission.done() {
                    self.working.push_back(Entry {
                        input,
                        stage: Stage::Submitted(submission),
                    });
                    return;
                }

                let id = submission.id();
                match submission.into_jobs().map(|jobs| jobs.into_iter().next()) {
                    Ok(Some(job)) => {
                        tracing::debug!(input = %input, submission_id = id, job_id = job.id(), "submission finished");
                        self.working.push_back(Entry {
                            input,
                            stage: Stage::Solving(job),
                        });
                    }
                    Ok(None) => {
                        let error =
                            Error::MalformedResponse(format!("submission {} finished without jobs", id));
                        self.fail(input, error).await;
                    }
                    Err(error) => self.fail(input, error).await,
                }
            }
            Stage::Solving(mut job) => {
                if let Err(error) = job.status(false).await {
                    return self.fail(input, error).await;
                }
                if !job.done() {
                    self.working.push_back(Entry {
                        input,
                        stage: Stage::Solving(job),
                    });
                    return;
                }

                tracing::info!(input = %input, job_id = job.id(), success = job.success(), "job finished");
                self.ready.push_back(Ok(Completed { input, job }));
                self.fill().await;
            }
        }
    }

    async fn fail(&mut self, input: UploadSource, error: Error) {
        tracing::warn!(input = %input, error = %error, "batch item failed");
        self.ready.push_back(Err(BatchError { input, error }));
        self.fill().await;
    }

    /// Upload from the input until the working set is full or the input runs dry
    async fn fill(&mut self) {
        while self.working.len() < self.max_in_flight {
            let Some(input) = self.next_input() else {
                return;
            };

            match self.uploader.submit(&input, self.settings.as_ref()).await {
                Ok(submission) => self.working.push_back(Entry {
                    input,
                    stage: Stage::Submitted(submission),
                }),
                Err(error) => {
                    tracing::warn!(input = %input, error = %error, "upload failed");
                    self.ready.push_back(Err(BatchError { input, error }));
                }
            }
        }
    }

    fn next_input(&mut self) -> Option<UploadSource> {
        let filter = &self.filter;
        self.inputs
            .by_ref()
            .find(|input| filter.as_ref().is_none_or(|accept| accept(input)))
    }
}

impl fmt::Debug for BatchPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchPipeline")
            .field("max_in_flight", &self.max_in_flight)
            .field("in_flight", &self.working.len())
            .field("ready", &self.ready.len())
            .finish_non_exhaustive()
    }
}
