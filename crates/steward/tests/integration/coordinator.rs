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

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use steward::models::agent::AgentConfig;
use steward::models::execution_log::ExecutionStatus;
use steward::models::job::{JobType, NewOrchestrationJob};
use steward::{
    BatchCoordinator, BatchRequest, CoordinatorConfig, JobStatus, OrchestrationStore,
    StaticAgentRegistry, TriggerSource,
};
use steward_testing::{ActivityBuilder, FailurePoint};

use crate::fixtures::Harness;

#[tokio::test]
async fn test_schedules_run_in_priority_order() {
    let harness = Harness::new(None);
    harness.schedule("general", 1).await;
    harness.schedule("developer", 10).await;
    harness.schedule("researcher", 5).await;

    let result = harness
        .coordinator()
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run batch");

    let order: Vec<&str> = result.schedules.iter().map(|s| s.agent_slug.as_str()).collect();
    assert_eq!(order, vec!["developer", "researcher", "general"]);
}

#[tokio::test]
async fn test_quiet_agent_logs_do_nothing() {
    let harness = Harness::new(None);
    let schedule = harness.schedule("developer", 0).await;
    harness.store.enable_actions(harness.project, "developer", &["analyze_code"]);

    let result = harness
        .coordinator()
        .run_batch_orchestration(harness.project, TriggerSource::Manual, Some("ops".into()))
        .await
        .expect("Failed to run batch");

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.agents_succeeded, 1);
    assert_eq!(result.tasks_created, 0);
    assert_eq!(result.schedules[0].status, ExecutionStatus::DoNothing);

    let logs = harness.store.execution_logs();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.schedule_id, schedule.id);
    assert_eq!(log.job_id, result.job_id);
    assert_eq!(log.status, ExecutionStatus::DoNothing);
    assert!(!log.should_act);
    assert!(log.do_nothing_reason.is_some());
    assert!(log.completed_at.is_some());
    assert!(harness.store.suggestions().is_empty());

    let job = &harness.store.jobs()[0];
    assert_eq!(job.triggered_by.as_deref(), Some("ops"));
}

#[tokio::test]
async fn test_unregistered_agent_is_skipped() {
    let harness = Harness::new(None);
    harness.schedule("astrologer", 0).await;

    let result = harness
        .coordinator()
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run batch");

    assert_eq!(result.agents_skipped, 1);
    assert_eq!(result.agents_executed, 0);
    assert_eq!(result.schedules[0].status, ExecutionStatus::Skipped);
    assert_eq!(result.schedules[0].detail.as_deref(), Some("agent not registered"));
    assert!(harness.store.execution_logs().is_empty());
}

#[tokio::test]
async fn test_registered_agent_without_rules_does_nothing() {
    let harness = Harness::new(None);
    harness.schedule("translator", 0).await;
    harness.store.enable_actions(harness.project, "translator", &["translate"]);

    let registry = StaticAgentRegistry::new();
    registry.register(AgentConfig::new("translator", "Translator").with_actions(&["translate"]));
    let coordinator = BatchCoordinator::builder(harness.store.clone())
        .agent_registry(Arc::new(registry))
        .build();

    let result = coordinator
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run batch");

    assert_eq!(result.schedules[0].status, ExecutionStatus::DoNothing);
    assert!(result.schedules[0]
        .detail
        .as_deref()
        .unwrap()
        .contains("unknown agent type"));
}

#[tokio::test]
async fn test_all_agents_failing_fails_the_job() {
    let harness = Harness::new(Some(ActivityBuilder::new().prs_opened(6).build()));
    let schedule = harness.schedule("developer", 0).await;
    harness.store.enable_actions(harness.project, "developer", &["analyze_code"]);
    harness.store.fail_on(FailurePoint::CreateSuggestion);

    let result = harness
        .coordinator()
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("All-agents-failed is reported, not raised");

    assert_eq!(result.status, JobStatus::Failed);
    assert!(!result.success);
    assert_eq!(result.agents_failed, 1);
    assert!(result.error.as_deref().unwrap().starts_with("developer:"));

    let job = &harness.store.jobs()[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_code.as_deref(), Some("ALL_AGENTS_FAILED"));
    assert_eq!(job.agents_failed, 1);

    let updated = harness.store.schedule(schedule.id).unwrap();
    assert_eq!(updated.consecutive_failures, 1);
    assert!(updated.last_failure_at.is_some());
}

#[tokio::test]
async fn test_schedule_load_failure_fails_job_and_returns_error() {
    let harness = Harness::new(None);
    harness.schedule("general", 0).await;
    harness.store.fail_on(FailurePoint::ListSchedules);

    let err = harness
        .coordinator()
        .run_batch_orchestration(harness.project, TriggerSource::Cron, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "STORE_UNAVAILABLE");

    let jobs = harness.store.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].error_code.as_deref(), Some("STORE_UNAVAILABLE"));
    assert!(jobs[0].completed_at.is_some());
}

#[tokio::test]
async fn test_ineligible_schedule_is_skipped_without_log() {
    let harness = Harness::new(None);
    let mut schedule = harness.schedule("general", 0).await;
    harness.store.enable_actions(harness.project, "general", &["housekeeping"]);
    schedule.last_run_at = Some(Utc::now() - chrono::Duration::minutes(5));
    harness.store.put_schedule(schedule.clone());

    let result = harness
        .coordinator()
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run batch");

    assert_eq!(result.agents_skipped, 1);
    assert_eq!(result.schedules[0].status, ExecutionStatus::Skipped);
    assert!(harness.store.execution_logs().is_empty());
    assert_eq!(harness.store.schedule(schedule.id).unwrap().total_runs, 0);
}

#[tokio::test]
async fn test_success_resets_failure_streak() {
    let harness = Harness::new(Some(ActivityBuilder::new().prs_opened(6).build()));
    let schedule = harness.schedule("developer", 0).await;
    harness.store.enable_actions(harness.project, "developer", &["analyze_code"]);
    harness.store.fail_on(FailurePoint::CreateSuggestion);
    let coordinator = harness.coordinator();

    coordinator
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run first batch");
    let mut after_failure = harness.store.schedule(schedule.id).unwrap();
    assert_eq!(after_failure.consecutive_failures, 1);

    // Rewind the clock on the schedule so it is eligible again.
    after_failure.last_run_at = None;
    after_failure.last_failure_at = None;
    harness.store.put_schedule(after_failure);
    harness.store.clear_failures();

    coordinator
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run second batch");
    let after_success = harness.store.schedule(schedule.id).unwrap();
    assert_eq!(after_success.consecutive_failures, 0);
    assert_eq!(after_success.total_runs, 2);
    assert_eq!(after_success.total_successes, 1);
}

#[tokio::test]
async fn test_elapsed_deadline_skips_remaining_schedules() {
    let harness = Harness::new(None);
    harness.schedule("general", 0).await;
    harness.schedule("developer", 1).await;
    let coordinator = harness.coordinator_with(
        CoordinatorConfig::builder()
            .job_timeout(Some(Duration::ZERO))
            .build(),
    );

    let result = coordinator
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run batch");

    assert_eq!(result.agents_skipped, 2);
    assert_eq!(result.agents_executed, 0);
    assert!(result
        .schedules
        .iter()
        .all(|s| s.detail.as_deref() == Some("job deadline passed")));

    let job = &harness.store.jobs()[0];
    let summary = job.output_summary.as_ref().unwrap();
    assert_eq!(summary["deadline_reached"], true);
    assert_eq!(summary["schedules_total"], 2);
}

#[tokio::test]
async fn test_metrics_failure_does_not_block_batch() {
    let harness = Harness::new(None);
    harness.schedule("general", 0).await;
    harness.store.enable_actions(harness.project, "general", &["housekeeping"]);
    harness.metrics.fail_with("rate limited");

    let result = harness
        .coordinator()
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run batch");

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.tasks_created, 1);
    let summary = harness.store.jobs()[0].output_summary.clone().unwrap();
    assert_eq!(summary["analysis_available"], false);
}

#[tokio::test]
async fn test_runs_against_precreated_job() {
    let harness = Harness::new(None);
    harness.schedule("general", 0).await;
    let mut new = NewOrchestrationJob::new(Some(harness.project), JobType::Batch, TriggerSource::Api);
    new.status = JobStatus::Queued;
    let queued = harness
        .store
        .create_job(new)
        .await
        .expect("Failed to create job");

    let result = harness
        .coordinator()
        .run(BatchRequest::new(harness.project, TriggerSource::Api).for_job(queued.id))
        .await
        .expect("Failed to run batch");

    assert_eq!(result.job_id, queued.id);
    let jobs = harness.store.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert!(jobs[0].started_at.is_some());
    assert!(jobs[0].timeout_at.is_some());
}

#[tokio::test]
async fn test_run_analysis_refreshes_cache() {
    let harness = Harness::new(Some(ActivityBuilder::new().commits(12).build()));

    let result = harness
        .coordinator()
        .run_analysis(BatchRequest::new(harness.project, TriggerSource::Manual))
        .await
        .expect("Failed to run analysis");

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(harness.metrics.calls(), 1);
    let cached = harness.store.cached_analyses();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].activity.commits, 12);
    assert_eq!(harness.store.jobs()[0].job_type, JobType::GithubAnalysis);
}

#[tokio::test]
async fn test_cleanup_dry_run_counts_without_deleting() {
    let harness = Harness::new(None);
    let coordinator = harness.coordinator();
    coordinator
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run batch");

    assert_eq!(coordinator.cleanup_jobs(Duration::ZERO, true).await.unwrap(), 1);
    assert_eq!(harness.store.jobs().len(), 1);
    assert_eq!(coordinator.cleanup_jobs(Duration::ZERO, false).await.unwrap(), 1);
    assert!(harness.store.jobs().is_empty());
}
