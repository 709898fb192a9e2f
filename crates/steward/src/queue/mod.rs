/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! # Job Queue
//!
//! Decouples "a batch should run" from "a batch runs now".
//!
//! Every enqueued job gets a Job record in `queued` status and an entry in
//! the [`QueueBackend`]. A single dispatcher task claims due entries and hands
//! each one to a spawned worker holding a concurrency slot, so at most
//! `concurrency` jobs run at once. Job starts are additionally limited by a
//! rolling-window [`RateLimiter`].
//!
//! The dispatcher sleeps on a [`Notify`] and falls back to polling every
//! `poll_interval`, since delayed entries become due without any signal.
//!
//! ## Failure handling
//!
//! A job-level error with attempts remaining moves the entry to `delayed`
//! with exponential backoff. Once attempts run out the entry stays `failed`
//! until it is retried manually or garbage collected.
//!
//! ## Degraded mode
//!
//! A queue built without a backend runs every job synchronously inside
//! [`JobQueue::add_job`] and returns no id.

mod backend;
mod backoff;
mod entry;
mod memory;
mod rate_limit;

pub use backend::QueueBackend;
pub use backoff::{BackoffStrategy, RetryPolicy, RetryPolicyBuilder};
pub use entry::{
    EnqueueOptions, JobProcessResult, NewQueueEntry, QueueCounts, QueueEntry, QueueEntryState,
    QueueJobData,
};
pub use memory::InMemoryQueueBackend;
pub use rate_limit::RateLimiter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::coordinator::{BatchCoordinator, BatchOrchestrationResult, BatchRequest};
use crate::database::universal_types::UniversalUuid;
use crate::error::{OrchestrationError, QueueError};
use crate::models::job::{
    JobCompletion, JobStatus, JobType, NewOrchestrationJob, OrchestrationJob,
};

/// Entries removed by [`JobQueue::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub completed: usize,
    pub failed: usize,
}

pub struct JobQueue {
    inner: Arc<QueueInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

struct QueueInner {
    backend: Option<Arc<dyn QueueBackend>>,
    coordinator: Arc<BatchCoordinator>,
    config: QueueConfig,
    retry_policy: RetryPolicy,
    limiter: RateLimiter,
    slots: Arc<Semaphore>,
    notify: Notify,
    paused: AtomicBool,
    shutdown: AtomicBool,
}

impl JobQueue {
    /// Creates a queue. Pass `None` as the backend to run every job
    /// synchronously.
    pub fn new(
        coordinator: Arc<BatchCoordinator>,
        backend: Option<Arc<dyn QueueBackend>>,
        config: QueueConfig,
    ) -> Self {
        let inner = QueueInner {
            backend,
            coordinator,
            retry_policy: config.retry_policy(),
            limiter: RateLimiter::new(config.rate_limit_max(), config.rate_limit_window()),
            slots: Arc::new(Semaphore::new(config.concurrency())),
            notify: Notify::new(),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            config,
        };
        Self {
            inner: Arc::new(inner),
            dispatcher: Mutex::new(None),
        }
    }

    /// Whether a durable substrate is configured.
    pub fn is_available(&self) -> bool {
        self.inner.backend.is_some()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn backend(&self) -> Result<&Arc<dyn QueueBackend>, QueueError> {
        self.inner
            .backend
            .as_ref()
            .ok_or_else(|| QueueError::Unavailable("no queue backend configured".to_string()))
    }

    /// Enqueues a job and returns its queue entry id.
    ///
    /// Without a backend the job runs to completion before this returns and
    /// the result is `Ok(None)`.
    pub async fn add_job(
        &self,
        data: QueueJobData,
        options: EnqueueOptions,
    ) -> Result<Option<UniversalUuid>, QueueError> {
        let Some(backend) = &self.inner.backend else {
            warn!(
                "Queue unavailable, running {} job synchronously",
                data.job_type.as_str()
            );
            self.inner.run_job(&data, None, 1, 1).await?;
            return Ok(None);
        };

        if data.project_id.is_none() {
            return Err(OrchestrationError::ProjectNotFound("queued jobs need a project".to_string()).into());
        }

        let now = Utc::now();
        let delay = options
            .delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(chrono::Duration::zero);
        let run_at = now + delay;
        let max_attempts = self.inner.config.max_attempts() as i32;
        let job = self.inner.queue_attempt_job(&data, 1, max_attempts, run_at).await?;

        let entry = backend
            .push(NewQueueEntry {
                data,
                priority: options.priority.unwrap_or(0),
                max_attempts,
                run_at,
                orchestration_job_id: Some(job.id),
                state: if delay > chrono::Duration::zero() {
                    QueueEntryState::Delayed
                } else {
                    QueueEntryState::Waiting
                },
            })
            .await?;

        info!(
            "Enqueued {} job {} for project {:?} (job record {}, run at {})",
            entry.data.job_type.as_str(),
            entry.id,
            entry.data.project_id.map(|p| p.to_string()),
            job.id,
            run_at
        );
        self.inner.notify.notify_one();
        Ok(Some(entry.id))
    }

    /// Starts the dispatcher. Calling it twice is a no-op.
    pub fn start(&self) -> Result<(), QueueError> {
        let backend = self.backend()?.clone();
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return Ok(());
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);
        let inner = self.inner.clone();
        *dispatcher = Some(tokio::spawn(async move {
            inner.dispatch_loop(backend).await;
        }));
        info!(
            "Job queue started with concurrency {}",
            self.inner.config.concurrency()
        );
        Ok(())
    }

    /// Stops claiming new work and waits for running jobs to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Queue dispatcher ended abnormally: {}", e);
            }
        }

        let slots = self.inner.config.concurrency() as u32;
        if let Ok(permits) = self.inner.slots.acquire_many(slots).await {
            drop(permits);
        }
        info!("Job queue stopped");
    }

    /// Stops claiming new work. Running jobs continue.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        info!("Job queue paused");
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
        info!("Job queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub async fn get(&self, id: UniversalUuid) -> Result<Option<QueueEntry>, QueueError> {
        self.backend()?.get(id).await
    }

    pub async fn list(
        &self,
        state: QueueEntryState,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        self.backend()?.list(state, limit).await
    }

    pub async fn stats(&self) -> Result<QueueCounts, QueueError> {
        self.backend()?.counts().await
    }

    /// Puts a failed entry back in line with a fresh attempt budget.
    pub async fn retry(&self, id: UniversalUuid) -> Result<QueueEntry, QueueError> {
        let entry = self.inner.reset_entry(self.backend()?.as_ref(), id).await?;
        info!("Queue entry {} reset for retry", id);
        self.inner.notify.notify_one();
        Ok(entry)
    }

    /// Retries every failed entry. Returns how many were reset.
    pub async fn retry_all_failed(&self) -> Result<usize, QueueError> {
        let backend = self.backend()?;
        let failed = backend.list(QueueEntryState::Failed, usize::MAX).await?;
        let mut reset = 0;
        for entry in failed {
            match self.inner.reset_entry(backend.as_ref(), entry.id).await {
                Ok(_) => reset += 1,
                Err(e) => warn!("Could not retry queue entry {}: {}", entry.id, e),
            }
        }
        if reset > 0 {
            self.inner.notify.notify_one();
        }
        info!("Reset {} failed queue entries for retry", reset);
        Ok(reset)
    }

    /// Removes an entry that is not running.
    ///
    /// Cancelling a waiting or delayed entry also finalizes its Job record as
    /// `cancelled`. Failed entries are simply discarded. The Job record is
    /// settled before the entry is removed, so an error leaves the entry in
    /// place.
    pub async fn cancel(&self, id: UniversalUuid) -> Result<(), QueueError> {
        let backend = self.backend()?;
        let entry = backend
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        match entry.state {
            QueueEntryState::Waiting | QueueEntryState::Delayed | QueueEntryState::Failed => {}
            state => {
                return Err(QueueError::InvalidState {
                    id: id.to_string(),
                    state: state.to_string(),
                    action: "cancelled",
                })
            }
        }

        if entry.state.is_pending() {
            if let Some(job_id) = entry.orchestration_job_id {
                let store = self.inner.coordinator.store();
                let live = store
                    .get_job(job_id)
                    .await?
                    .is_some_and(|job| !job.status.is_terminal());
                if live {
                    store
                        .finalize_job(job_id, JobCompletion::bare(JobStatus::Cancelled, Utc::now()))
                        .await?;
                }
            }
        }
        backend.remove(id).await?;
        info!("Cancelled queue entry {} ({})", id, entry.state);
        Ok(())
    }

    /// Deletes completed entries past the completed retention and failed
    /// entries past the failed retention.
    pub async fn cleanup(&self) -> Result<CleanupReport, QueueError> {
        let backend = self.backend()?;
        let now = Utc::now();
        let cutoff = |retention: Duration| {
            now - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(365))
        };

        let report = CleanupReport {
            completed: backend
                .delete_finished_before(
                    QueueEntryState::Completed,
                    cutoff(self.inner.config.completed_retention()),
                )
                .await?,
            failed: backend
                .delete_finished_before(
                    QueueEntryState::Failed,
                    cutoff(self.inner.config.failed_retention()),
                )
                .await?,
        };
        info!(
            "Queue cleanup removed {} completed and {} failed entries",
            report.completed, report.failed
        );
        Ok(report)
    }
}

impl QueueInner {
    /// Creates the `queued` Job record for one attempt of `data`.
    async fn queue_attempt_job(
        &self,
        data: &QueueJobData,
        attempt: i32,
        max_attempts: i32,
        run_at: DateTime<Utc>,
    ) -> Result<OrchestrationJob, QueueError> {
        let mut job = NewOrchestrationJob::new(data.project_id, data.job_type, data.trigger_source);
        job.status = JobStatus::Queued;
        job.triggered_by = data.triggered_by.clone();
        job.scheduled_at = Some(run_at);
        job.attempt = attempt;
        job.max_attempts = max_attempts;
        job.input_params = data.params.clone();
        Ok(self.coordinator.store().create_job(job).await?)
    }

    /// Gives the next attempt of `entry` its own Job record. Must run while
    /// the entry cannot be claimed.
    async fn link_next_attempt(
        &self,
        backend: &dyn QueueBackend,
        entry: &QueueEntry,
        attempt: i32,
        run_at: DateTime<Utc>,
    ) -> Result<UniversalUuid, QueueError> {
        let job = self
            .queue_attempt_job(&entry.data, attempt, entry.max_attempts, run_at)
            .await?;
        if let Err(e) = backend.link_job(entry.id, job.id).await {
            self.discard_job(job.id).await;
            return Err(e);
        }
        Ok(job.id)
    }

    async fn discard_job(&self, job_id: UniversalUuid) {
        if let Err(e) = self
            .coordinator
            .store()
            .finalize_job(job_id, JobCompletion::bare(JobStatus::Cancelled, Utc::now()))
            .await
        {
            warn!("Failed to cancel unused job record {}: {}", job_id, e);
        }
    }

    /// Resets a failed entry with a fresh attempt budget and a fresh Job record.
    async fn reset_entry(
        &self,
        backend: &dyn QueueBackend,
        id: UniversalUuid,
    ) -> Result<QueueEntry, QueueError> {
        let entry = backend
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if entry.state != QueueEntryState::Failed {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                state: entry.state.to_string(),
                action: "retried",
            });
        }

        let now = Utc::now();
        let job_id = self.link_next_attempt(backend, &entry, 1, now).await?;
        match backend.reset_for_retry(id, now).await {
            Ok(entry) => Ok(entry),
            Err(e) => {
                self.discard_job(job_id).await;
                Err(e)
            }
        }
    }

    async fn wait_for_work(&self, timeout: Duration) {
        tokio::select! {
            _ = self.notify.notified() => {
                debug!("Queue dispatcher woken");
            }
            _ = tokio::time::sleep(timeout) => {}
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    async fn dispatch_loop(self: Arc<Self>, backend: Arc<dyn QueueBackend>) {
        let poll = self.config.poll_interval();
        while !self.is_shutting_down() {
            if self.paused.load(Ordering::SeqCst) {
                self.wait_for_work(poll).await;
                continue;
            }

            let permit = match self.slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.is_shutting_down() {
                break;
            }

            if let Some(wait) = self.limiter.wait_time() {
                debug!("Job start rate limit reached, waiting {:?}", wait);
                drop(permit);
                self.wait_for_work(wait.max(Duration::from_millis(1))).await;
                continue;
            }

            match backend.claim_next(Utc::now()).await {
                Ok(Some(entry)) => {
                    // Single dispatcher: the peek above reserved room for this start.
                    self.limiter.record();
                    let inner = self.clone();
                    let backend = backend.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        inner.process_entry(backend.as_ref(), entry).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    self.wait_for_work(poll).await;
                }
                Err(e) => {
                    error!("Failed to claim queue entry: {}", e);
                    drop(permit);
                    self.wait_for_work(poll).await;
                }
            }
        }
        debug!("Queue dispatcher exiting");
    }

    async fn process_entry(&self, backend: &dyn QueueBackend, entry: QueueEntry) {
        let started = Instant::now();
        debug!(
            "Processing queue entry {} (attempt {}/{})",
            entry.id, entry.attempts_made, entry.max_attempts
        );

        let outcome = self
            .run_job(
                &entry.data,
                entry.orchestration_job_id,
                entry.attempts_made,
                entry.max_attempts,
            )
            .await;
        metrics::histogram!("steward_queue_job_duration_ms")
            .record(started.elapsed().as_millis() as f64);

        let now = Utc::now();
        match outcome {
            Ok(result) => {
                if let Err(e) = backend
                    .complete(entry.id, JobProcessResult::from(&result), now)
                    .await
                {
                    error!("Failed to mark queue entry {} completed: {}", entry.id, e);
                }
                metrics::counter!("steward_queue_jobs_total", "state" => "completed").increment(1);
            }
            Err(e) => {
                let attempts = entry.attempts_made.max(0) as u32;
                let retry_at = (entry.attempts_made < entry.max_attempts).then(|| {
                    let delay = self.retry_policy.calculate_delay(attempts);
                    now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1))
                });

                // Linked before the entry turns delayed and becomes claimable.
                if let Some(retry_at) = retry_at {
                    if let Err(err) = self
                        .link_next_attempt(backend, &entry, entry.attempts_made + 1, retry_at)
                        .await
                    {
                        warn!(
                            "Could not prepare a job record for the retry of queue entry {}: {}",
                            entry.id, err
                        );
                    }
                }

                match backend.fail(entry.id, e.to_string(), retry_at, now).await {
                    Ok(updated) if updated.state == QueueEntryState::Delayed => {
                        warn!(
                            "Queue entry {} failed on attempt {}/{}, retrying at {}: {}",
                            entry.id, entry.attempts_made, entry.max_attempts, updated.run_at, e
                        );
                        metrics::counter!("steward_queue_jobs_total", "state" => "retried")
                            .increment(1);
                    }
                    Ok(_) => {
                        error!(
                            "Queue entry {} failed after {} attempts: {}",
                            entry.id, entry.attempts_made, e
                        );
                        metrics::counter!("steward_queue_jobs_total", "state" => "failed")
                            .increment(1);
                    }
                    Err(err) => error!("Failed to record failure of queue entry {}: {}", entry.id, err),
                }
            }
        }
    }

    /// Runs one job attempt through the coordinator.
    ///
    /// The entry's linked Job record is reused while it is still queued.
    /// Otherwise the attempt gets a fresh record carrying its attempt number.
    async fn run_job(
        &self,
        data: &QueueJobData,
        job_id: Option<UniversalUuid>,
        attempt: i32,
        max_attempts: i32,
    ) -> Result<BatchOrchestrationResult, OrchestrationError> {
        let project_id = data
            .project_id
            .ok_or_else(|| OrchestrationError::ProjectNotFound("job has no project".to_string()))?;

        let mut request = BatchRequest::new(project_id, data.trigger_source)
            .triggered_by(data.triggered_by.clone())
            .with_params(data.params.clone())
            .attempt(attempt.max(1), max_attempts.max(1));

        if let Some(job_id) = job_id {
            let job = self.coordinator.store().get_job(job_id).await?;
            if job.is_some_and(|j| !j.status.is_terminal() && j.status != JobStatus::Running) {
                request = request.for_job(job_id);
            }
        }

        match data.job_type {
            JobType::GithubAnalysis => self.coordinator.run_analysis(request).await,
            JobType::Batch | JobType::Retry => self.coordinator.run(request).await,
        }
    }
}
