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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use steward::error::MetricsError;
use steward::models::agent::{NewActionConfig, RiskLevel};
use steward::models::analysis::{AnalysisWindow, RepositoryActivity};
use steward::models::project::ProjectSnapshot;
use steward::models::job::JobType;
use steward::models::schedule::{NewAgentSchedule, ScheduleType};
use steward::queue::{NewQueueEntry, QueueEntryState};
use steward::store::JobFilter;
use steward::{
    BatchCoordinator, EnqueueOptions, InMemoryQueueBackend, JobQueue, JobStatus,
    OrchestrationStore, QueueBackend, QueueConfig, QueueError, QueueJobData, RepositoryMetricsSource,
    TriggerSource, UniversalUuid,
};
use steward_testing::FailurePoint;

use crate::fixtures::{eventually, seed_sqlite_project, sqlite_dal, Harness};

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> QueueConfig {
    QueueConfig::builder()
        .concurrency(2)
        .max_attempts(2)
        .initial_backoff(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(50))
        .poll_interval(Duration::from_millis(10))
        .build()
}

fn memory_queue(harness: &Harness, config: QueueConfig) -> JobQueue {
    JobQueue::new(
        Arc::new(harness.coordinator()),
        Some(Arc::new(InMemoryQueueBackend::new())),
        config,
    )
}

async fn entry_state(queue: &JobQueue, id: UniversalUuid) -> Option<QueueEntryState> {
    queue.get(id).await.expect("Failed to read queue entry").map(|e| e.state)
}

/// Metrics source that holds every request for a while and records how many
/// were in flight at once.
#[derive(Default)]
struct SlowMetricsSource {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl RepositoryMetricsSource for SlowMetricsSource {
    async fn fetch_activity(
        &self,
        _project: &ProjectSnapshot,
        _window: &AnalysisWindow,
    ) -> Result<Option<RepositoryActivity>, MetricsError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

#[tokio::test]
async fn test_sqlite_backed_queue_runs_job() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, None).await;
    dal.create_schedule(NewAgentSchedule::new(project, "general", ScheduleType::Hourly))
        .await
        .unwrap();
    dal.projects()
        .upsert_action_config(NewActionConfig {
            project_id: project,
            agent_slug: "general".to_string(),
            action_key: "housekeeping".to_string(),
            is_enabled: true,
            requires_approval: false,
            risk_level: RiskLevel::Low,
        })
        .await
        .unwrap();

    let coordinator = Arc::new(BatchCoordinator::builder(dal.clone()).build());
    let queue = JobQueue::new(
        coordinator,
        Some(Arc::new(dal.queue_backend())),
        fast_config(),
    );
    assert!(queue.is_available());

    let id = queue
        .add_job(
            QueueJobData::batch(project, TriggerSource::Cron).triggered_by("scheduler"),
            EnqueueOptions::default(),
        )
        .await
        .expect("Failed to enqueue")
        .expect("A backed queue returns an entry id");
    assert_eq!(entry_state(&queue, id).await, Some(QueueEntryState::Waiting));

    let jobs = dal.list_jobs(&JobFilter::for_project(project)).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Queued);
    assert!(jobs[0].scheduled_at.is_some());

    queue.start().expect("Failed to start queue");
    let q = &queue;
    assert!(
        eventually(WAIT, || async move {
            entry_state(q, id).await == Some(QueueEntryState::Completed)
        })
        .await
    );
    queue.shutdown().await;

    let entry = queue.get(id).await.unwrap().unwrap();
    assert_eq!(entry.attempts_made, 1);
    let result = entry.result.expect("Completed entries carry a result");
    assert!(result.success);
    assert_eq!(result.tasks_created, 1);

    let jobs = dal.list_jobs(&JobFilter::for_project(project)).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].triggered_by.as_deref(), Some("scheduler"));
    assert_eq!(queue.stats().await.unwrap().completed, 1);
}

#[tokio::test]
async fn test_sqlite_backend_relinks_job_record() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, None).await;
    let backend = dal.queue_backend();

    let entry = backend
        .push(NewQueueEntry {
            data: QueueJobData::batch(project, TriggerSource::Cron),
            priority: 0,
            max_attempts: 3,
            run_at: chrono::Utc::now(),
            orchestration_job_id: None,
            state: QueueEntryState::Waiting,
        })
        .await
        .expect("Failed to push entry");

    let job = UniversalUuid::new_v4();
    backend.link_job(entry.id, job).await.expect("Failed to link job");
    let stored = backend.get(entry.id).await.unwrap().unwrap();
    assert_eq!(stored.orchestration_job_id, Some(job));

    let err = backend
        .link_job(UniversalUuid::new_v4(), job)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn test_job_level_failure_retries_then_fails() {
    let harness = Harness::new(None);
    harness.schedule("general", 0).await;
    harness.store.fail_on(FailurePoint::ListSchedules);
    let queue = memory_queue(&harness, fast_config());
    queue.start().unwrap();

    let id = queue
        .add_job(
            QueueJobData::batch(harness.project, TriggerSource::Api),
            EnqueueOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();

    let q = &queue;
    assert!(
        eventually(WAIT, || async move {
            entry_state(q, id).await == Some(QueueEntryState::Failed)
        })
        .await
    );

    let entry = queue.get(id).await.unwrap().unwrap();
    assert_eq!(entry.attempts_made, 2);
    assert!(entry.last_error.is_some());

    let jobs = harness.store.jobs();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Failed));
    assert!(jobs.iter().any(|j| j.attempt == 2));

    // Manual retry once the store recovers.
    harness.store.clear_failures();
    assert_eq!(queue.retry_all_failed().await.unwrap(), 1);
    assert!(
        eventually(WAIT, || async move {
            entry_state(q, id).await == Some(QueueEntryState::Completed)
        })
        .await
    );
    queue.shutdown().await;
    assert!(harness
        .store
        .jobs()
        .iter()
        .any(|j| j.status == JobStatus::Completed));
}

#[tokio::test]
async fn test_cancel_waiting_entry_cancels_job() {
    let harness = Harness::new(None);
    let queue = memory_queue(&harness, fast_config());

    let id = queue
        .add_job(
            QueueJobData::batch(harness.project, TriggerSource::Manual),
            EnqueueOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();
    queue.cancel(id).await.expect("Failed to cancel");

    assert!(queue.get(id).await.unwrap().is_none());
    let jobs = harness.store.jobs();
    assert_eq!(jobs[0].status, JobStatus::Cancelled);

    let err = queue.cancel(id).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn test_cancel_delayed_retry_cancels_its_attempt_job() {
    let harness = Harness::new(None);
    harness.schedule("general", 0).await;
    harness.store.fail_on(FailurePoint::ListSchedules);
    let config = QueueConfig::builder()
        .max_attempts(3)
        .initial_backoff(Duration::from_secs(30))
        .poll_interval(Duration::from_millis(10))
        .build();
    let queue = memory_queue(&harness, config);
    queue.start().unwrap();

    let id = queue
        .add_job(
            QueueJobData::batch(harness.project, TriggerSource::Cron),
            EnqueueOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();
    let first_job = queue.get(id).await.unwrap().unwrap().orchestration_job_id;

    let q = &queue;
    assert!(
        eventually(WAIT, || async move {
            entry_state(q, id).await == Some(QueueEntryState::Delayed)
        })
        .await
    );
    queue.shutdown().await;

    // The retry has its own queued Job record linked to the entry.
    let entry = queue.get(id).await.unwrap().unwrap();
    let retry_job = entry.orchestration_job_id.expect("Retry attempt has a job record");
    assert_ne!(Some(retry_job), first_job);
    let jobs = harness.store.jobs();
    assert_eq!(jobs.len(), 2);
    let queued = jobs.iter().find(|j| j.id == retry_job).unwrap();
    assert_eq!(queued.status, JobStatus::Queued);
    assert_eq!(queued.attempt, 2);

    queue.cancel(id).await.expect("Failed to cancel delayed retry");
    assert!(queue.get(id).await.unwrap().is_none());

    let jobs = harness.store.jobs();
    let status_of = |job: UniversalUuid| jobs.iter().find(|j| j.id == job).unwrap().status;
    assert_eq!(status_of(retry_job), JobStatus::Cancelled);
    assert_eq!(status_of(first_job.unwrap()), JobStatus::Failed);
}

#[tokio::test]
async fn test_cancel_failed_entry_keeps_job_history() {
    let harness = Harness::new(None);
    harness.store.fail_on(FailurePoint::ListSchedules);
    let queue = memory_queue(&harness, fast_config());
    queue.start().unwrap();

    let id = queue
        .add_job(
            QueueJobData::batch(harness.project, TriggerSource::Api),
            EnqueueOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();
    let q = &queue;
    assert!(
        eventually(WAIT, || async move {
            entry_state(q, id).await == Some(QueueEntryState::Failed)
        })
        .await
    );
    queue.shutdown().await;

    queue.cancel(id).await.expect("Failed to discard failed entry");
    assert!(queue.get(id).await.unwrap().is_none());
    assert!(harness
        .store
        .jobs()
        .iter()
        .all(|j| j.status == JobStatus::Failed));
}

#[tokio::test]
async fn test_workers_never_exceed_concurrency() {
    let harness = Harness::new(None);
    let source = Arc::new(SlowMetricsSource::default());
    let coordinator = BatchCoordinator::builder(harness.store.clone())
        .metrics_source(source.clone())
        .build();
    let config = QueueConfig::builder()
        .concurrency(2)
        .rate_limit(100, Duration::from_secs(1))
        .poll_interval(Duration::from_millis(10))
        .build();
    let queue = JobQueue::new(
        Arc::new(coordinator),
        Some(Arc::new(InMemoryQueueBackend::new())),
        config,
    );

    for _ in 0..6 {
        queue
            .add_job(
                QueueJobData::analysis(harness.project, TriggerSource::Webhook),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
    }
    queue.start().unwrap();

    let q = &queue;
    assert!(
        eventually(WAIT, || async move {
            let counts = q.stats().await.unwrap();
            assert!(counts.active <= 2, "{} entries active at once", counts.active);
            counts.completed == 6
        })
        .await
    );
    queue.shutdown().await;

    assert_eq!(source.calls.load(Ordering::SeqCst), 6);
    assert_eq!(source.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_rate_limit_holds_back_job_starts() {
    let harness = Harness::new(None);
    let config = QueueConfig::builder()
        .concurrency(2)
        .rate_limit(1, Duration::from_secs(3600))
        .poll_interval(Duration::from_millis(10))
        .build();
    let queue = memory_queue(&harness, config);

    let mut ids = Vec::new();
    for _ in 0..2 {
        let id = queue
            .add_job(
                QueueJobData::batch(harness.project, TriggerSource::Manual),
                EnqueueOptions::default(),
            )
            .await
            .unwrap()
            .unwrap();
        ids.push(id);
    }
    queue.start().unwrap();

    let q = &queue;
    let first = ids[0];
    assert!(
        eventually(WAIT, || async move {
            entry_state(q, first).await == Some(QueueEntryState::Completed)
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(entry_state(&queue, ids[1]).await, Some(QueueEntryState::Waiting));

    let counts = queue.stats().await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.waiting, 1);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_delayed_entry_waits_for_run_at() {
    let harness = Harness::new(None);
    let queue = memory_queue(&harness, fast_config());
    queue.start().unwrap();

    let id = queue
        .add_job(
            QueueJobData::batch(harness.project, TriggerSource::Cron),
            EnqueueOptions::delayed(Duration::from_secs(3600)).with_priority(5),
        )
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let entry = queue.get(id).await.unwrap().unwrap();
    assert_eq!(entry.state, QueueEntryState::Delayed);
    assert_eq!(entry.priority, 5);
    assert_eq!(entry.attempts_made, 0);
    assert_eq!(queue.stats().await.unwrap().delayed, 1);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_paused_queue_holds_work() {
    let harness = Harness::new(None);
    let queue = memory_queue(&harness, fast_config());
    queue.start().unwrap();
    queue.pause();
    assert!(queue.is_paused());

    let id = queue
        .add_job(
            QueueJobData::batch(harness.project, TriggerSource::Manual),
            EnqueueOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(entry_state(&queue, id).await, Some(QueueEntryState::Waiting));

    queue.resume();
    let q = &queue;
    assert!(
        eventually(WAIT, || async move {
            entry_state(q, id).await == Some(QueueEntryState::Completed)
        })
        .await
    );
    queue.shutdown().await;
}

#[tokio::test]
async fn test_analysis_job_goes_through_analyzer() {
    let harness = Harness::new(None);
    let queue = memory_queue(&harness, fast_config());
    queue.start().unwrap();

    let id = queue
        .add_job(
            QueueJobData::analysis(harness.project, TriggerSource::Webhook),
            EnqueueOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();
    let q = &queue;
    assert!(
        eventually(WAIT, || async move {
            entry_state(q, id).await == Some(QueueEntryState::Completed)
        })
        .await
    );
    queue.shutdown().await;

    let jobs = harness.store.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, JobType::GithubAnalysis);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(harness.metrics.calls(), 1);
}

#[tokio::test]
async fn test_cleanup_removes_finished_entries() {
    let harness = Harness::new(None);
    let config = QueueConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .completed_retention(Duration::ZERO)
        .failed_retention(Duration::ZERO)
        .build();
    let queue = memory_queue(&harness, config);
    queue.start().unwrap();

    let id = queue
        .add_job(
            QueueJobData::batch(harness.project, TriggerSource::Manual),
            EnqueueOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();
    let q = &queue;
    assert!(
        eventually(WAIT, || async move {
            entry_state(q, id).await == Some(QueueEntryState::Completed)
        })
        .await
    );
    queue.shutdown().await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = queue.cleanup().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);
    assert!(queue.get(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_queue_without_backend_rejects_management_calls() {
    let harness = Harness::new(None);
    let queue = JobQueue::new(Arc::new(harness.coordinator()), None, QueueConfig::default());

    assert!(matches!(queue.start(), Err(QueueError::Unavailable(_))));
    assert!(matches!(queue.stats().await, Err(QueueError::Unavailable(_))));
}
