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

//! SQLite persistence through the public store trait.

use chrono::{Duration, Utc};
use serde_json::Map;
use steward::models::agent::{NewActionConfig, RiskLevel};
use steward::models::analysis::{AnalysisWindow, NewCachedAnalysis, PeriodType};
use steward::models::execution_log::NewExecutionLog;
use steward::models::job::{JobCompletion, JobType, NewOrchestrationJob};
use steward::models::schedule::{NewAgentSchedule, ScheduleOutcome, ScheduleType};
use steward::models::suggestion::{ApprovalState, NewSuggestion};
use steward::{BatchCoordinator, JobStatus, OrchestrationStore, StoreError, TriggerSource};
use steward_testing::ActivityBuilder;

use crate::fixtures::{at, seed_sqlite_project, sqlite_dal, REPOSITORY};

#[tokio::test]
async fn test_enabled_schedules_by_priority() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, None).await;

    for (agent, priority, enabled) in [
        ("general", 1, true),
        ("developer", 9, true),
        ("marketer", 20, false),
        ("seo", 5, true),
    ] {
        let mut new = NewAgentSchedule::new(project, agent, ScheduleType::Daily);
        new.priority = priority;
        new.enabled = enabled;
        dal.create_schedule(new)
            .await
            .expect("Failed to create schedule");
    }

    let schedules = dal
        .list_enabled_schedules(project)
        .await
        .expect("Failed to list schedules");
    let slugs: Vec<&str> = schedules.iter().map(|s| s.agent_slug.as_str()).collect();
    assert_eq!(slugs, vec!["developer", "seo", "general"]);
    assert_eq!(schedules[0].min_interval_minutes, 24 * 60);
    assert_eq!(
        dal.list_projects_with_enabled_schedules().await.unwrap(),
        vec![project]
    );
}

#[tokio::test]
async fn test_schedule_outcomes_update_counters() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, None).await;
    let schedule = dal
        .create_schedule(NewAgentSchedule::new(project, "developer", ScheduleType::Hourly))
        .await
        .unwrap();

    let t1 = at(2025, 6, 2, 9, 0);
    let t2 = at(2025, 6, 2, 10, 0);
    let t3 = at(2025, 6, 2, 11, 0);
    dal.record_schedule_outcome(schedule.id, ScheduleOutcome::Failure, t1).await.unwrap();
    let failed = dal
        .record_schedule_outcome(schedule.id, ScheduleOutcome::Failure, t2)
        .await
        .unwrap();
    assert_eq!(failed.consecutive_failures, 2);
    assert_eq!(failed.last_failure_at, Some(t2));

    let recovered = dal
        .record_schedule_outcome(schedule.id, ScheduleOutcome::Success, t3)
        .await
        .unwrap();
    assert_eq!(recovered.consecutive_failures, 0);
    assert_eq!(recovered.total_runs, 3);
    assert_eq!(recovered.total_successes, 1);
    assert_eq!(recovered.last_run_at, Some(t3));
    assert_eq!(recovered.last_success_at, Some(t3));
}

#[tokio::test]
async fn test_job_status_moves_forward_only() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, None).await;

    let mut new = NewOrchestrationJob::new(Some(project), JobType::Batch, TriggerSource::Cron);
    new.status = JobStatus::Queued;
    new.max_attempts = 3;
    let job = dal.create_job(new).await.expect("Failed to create job");
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.max_attempts, 3);

    let started = Utc::now();
    let running = dal
        .start_job(job.id, started, Some(started + Duration::minutes(30)))
        .await
        .expect("Failed to start job");
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.timeout_at.is_some());

    let done = dal
        .finalize_job(job.id, JobCompletion::bare(JobStatus::Completed, Utc::now()))
        .await
        .expect("Failed to finalize job");
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.completed_at.is_some());

    let err = dal
        .finalize_job(job.id, JobCompletion::bare(JobStatus::Failed, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidStatusTransition { .. }));

    let err = dal.start_job(job.id, Utc::now(), None).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidStatusTransition { .. }));
}

#[tokio::test]
async fn test_overdue_jobs_expire() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, None).await;
    let now = Utc::now();

    let mut overdue = NewOrchestrationJob::new(Some(project), JobType::Batch, TriggerSource::Cron);
    overdue.status = JobStatus::Running;
    overdue.started_at = Some(now - Duration::hours(2));
    overdue.timeout_at = Some(now - Duration::hours(1));
    let overdue = dal.create_job(overdue).await.unwrap();

    let mut healthy = NewOrchestrationJob::new(Some(project), JobType::Batch, TriggerSource::Cron);
    healthy.status = JobStatus::Running;
    healthy.timeout_at = Some(now + Duration::hours(1));
    let healthy = dal.create_job(healthy).await.unwrap();

    let expired = dal.expire_overdue_jobs(now).await.unwrap();
    assert_eq!(expired, vec![overdue.id]);

    let job = dal.get_job(overdue.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Timeout);
    assert_eq!(job.error_code.as_deref(), Some("JOB_TIMEOUT"));
    let job = dal.get_job(healthy.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
}

#[tokio::test]
async fn test_analysis_upsert_replaces_same_window() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, Some(REPOSITORY)).await;
    let now = at(2025, 6, 10, 9, 0);
    let window = AnalysisWindow::ending_at(PeriodType::Weekly, now);

    for commits in [4, 11] {
        dal.upsert_cached_analysis(NewCachedAnalysis {
            project_id: project,
            window,
            activity: ActivityBuilder::new().commits(commits).label("docs", 2).build(),
            fetched_at: now,
            expires_at: now + Duration::hours(1),
        })
        .await
        .expect("Failed to upsert analysis");
    }

    let cached = dal
        .find_cached_analysis(project, &window, now + Duration::minutes(10))
        .await
        .unwrap()
        .expect("Analysis should be cached");
    assert_eq!(cached.activity.commits, 11);
    assert_eq!(cached.activity.label_counts.get("docs"), Some(&2));

    assert!(dal
        .find_cached_analysis(project, &window, now + Duration::hours(2))
        .await
        .unwrap()
        .is_none());

    assert_eq!(dal.mark_analyses_stale(project).await.unwrap(), 1);
    assert!(dal
        .find_cached_analysis(project, &window, now)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_context_sources() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, Some(REPOSITORY)).await;
    let now = Utc::now();

    dal.projects()
        .upsert_action_config(NewActionConfig {
            project_id: project,
            agent_slug: "researcher".to_string(),
            action_key: "triage_issues".to_string(),
            is_enabled: true,
            requires_approval: true,
            risk_level: RiskLevel::Medium,
        })
        .await
        .expect("Failed to upsert action config");
    dal.projects()
        .create_task(project, "Follow up on flaky test", Some("developer"), now - Duration::hours(2))
        .await
        .unwrap();
    dal.projects()
        .create_task(project, "Old task", None, now - Duration::days(5))
        .await
        .unwrap();
    dal.create_suggestion(NewSuggestion {
        project_id: project,
        agent_slug: "researcher".to_string(),
        action_key: "triage_issues".to_string(),
        context: Map::new(),
        approval_state: ApprovalState::Pending,
    })
    .await
    .unwrap();

    let configs = dal.list_action_configs(project, "researcher").await.unwrap();
    assert_eq!(configs.len(), 1);
    assert!(configs[0].requires_approval);
    assert_eq!(configs[0].risk_level, RiskLevel::Medium);
    assert!(dal.list_action_configs(project, "seo").await.unwrap().is_empty());

    let counts = dal
        .count_recent_activity(project, now - Duration::days(1))
        .await
        .unwrap();
    assert_eq!(counts.suggestions, 1);
    assert_eq!(counts.tasks, 1);

    dal.create_suggestion(NewSuggestion {
        project_id: project,
        agent_slug: "researcher".to_string(),
        action_key: "research_topic".to_string(),
        context: Map::new(),
        approval_state: ApprovalState::Pending,
    })
    .await
    .unwrap();

    let latest = dal
        .latest_suggestion_by_action(project, "researcher")
        .await
        .unwrap();
    assert_eq!(
        latest.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["research_topic", "triage_issues"]
    );
    assert!(latest["research_topic"] >= latest["triage_issues"]);
    assert!(dal
        .latest_suggestion_by_action(project, "seo")
        .await
        .unwrap()
        .is_empty());

    let snapshot = dal.get_project(project).await.unwrap().unwrap();
    assert!(snapshot.has_repository());
}

#[tokio::test]
async fn test_cleanup_removes_jobs_and_their_logs() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, None).await;
    let schedule = dal
        .create_schedule(NewAgentSchedule::new(project, "general", ScheduleType::Hourly))
        .await
        .unwrap();

    let mut new = NewOrchestrationJob::new(Some(project), JobType::Batch, TriggerSource::Manual);
    new.status = JobStatus::Running;
    let job = dal.create_job(new).await.unwrap();
    let mut log = NewExecutionLog::start(job.id, schedule.id, project, "general", Utc::now());
    log.do_nothing("quiet", Utc::now());
    dal.insert_execution_log(log).await.expect("Failed to insert log");
    dal.finalize_job(job.id, JobCompletion::bare(JobStatus::Completed, Utc::now()))
        .await
        .unwrap();

    let mut running = NewOrchestrationJob::new(Some(project), JobType::Batch, TriggerSource::Manual);
    running.status = JobStatus::Running;
    let running = dal.create_job(running).await.unwrap();

    let cutoff = Utc::now() + Duration::seconds(1);
    assert_eq!(dal.count_jobs_older_than(cutoff).await.unwrap(), 1);
    assert_eq!(dal.delete_jobs_older_than(cutoff).await.unwrap(), 1);

    assert!(dal.get_job(job.id).await.unwrap().is_none());
    assert!(dal.list_execution_logs(job.id).await.unwrap().is_empty());
    assert!(dal.get_job(running.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_batch_on_sqlite() {
    let dal = sqlite_dal().await;
    let project = seed_sqlite_project(&dal, None).await;
    dal.create_schedule(NewAgentSchedule::new(project, "general", ScheduleType::Every4h))
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

    let coordinator = BatchCoordinator::builder(dal.clone()).build();
    let result = coordinator
        .run_batch_orchestration(project, TriggerSource::Manual, None)
        .await
        .expect("Failed to run batch on SQLite");

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.tasks_created, 1);

    let job = dal.get_job(result.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.agents_succeeded, 1);
    assert_eq!(job.output_summary.unwrap()["schedules_total"], 1);

    let logs = dal.list_execution_logs(result.job_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].created_suggestion_ids.len(), 1);

    let suggestions = dal.list_suggestions(project).await.unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].approval_state, ApprovalState::AutoApproved);
    assert_eq!(suggestions[0].id, logs[0].created_suggestion_ids[0]);
}
