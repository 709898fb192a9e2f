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

//! End-to-end acceptance scenarios for the orchestration core.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use steward::models::agent::{ActionConfig, AgentConfig, RiskLevel};
use steward::models::execution_log::ExecutionStatus;
use steward::{
    is_eligible, AgentExecutionContext, DecisionEngine, EnqueueOptions, JobQueue, JobStatus,
    QueueConfig, QueueJobData, TriggerSource, UniversalUuid,
};
use steward_testing::{ActivityBuilder, FailurePoint};

use crate::fixtures::{at, Harness};

#[tokio::test]
async fn scenario_a_weekday_schedule_not_eligible_on_saturday() {
    let harness = Harness::new(None);
    let mut schedule = harness.schedule("developer", 0).await;
    schedule.run_on_days = BTreeSet::from([1, 2, 3, 4, 5]);

    let saturday = at(2025, 6, 7, 10, 0);
    let monday = at(2025, 6, 9, 10, 0);
    assert!(!is_eligible(&schedule, saturday));
    assert!(is_eligible(&schedule, monday));
}

#[tokio::test]
async fn scenario_b_minimum_interval() {
    let harness = Harness::new(None);
    let mut schedule = harness.schedule("developer", 0).await;
    schedule.min_interval_minutes = 60;
    let now = at(2025, 6, 3, 12, 0);

    schedule.last_run_at = Some(now - Duration::minutes(30));
    assert!(!is_eligible(&schedule, now));

    schedule.last_run_at = Some(now - Duration::minutes(61));
    assert!(is_eligible(&schedule, now));
}

#[test]
fn scenario_c_developer_acts_on_open_prs() {
    let project = UniversalUuid::new_v4();
    let ctx = AgentExecutionContext::new(
        project,
        AgentConfig::new("developer", "Developer"),
        at(2025, 6, 3, 12, 0),
    )
    .with_repository(ActivityBuilder::new().prs_opened(5).build())
    .with_action_configs(vec![ActionConfig {
        id: UniversalUuid::new_v4(),
        project_id: project,
        agent_slug: "developer".into(),
        action_key: "analyze_code".into(),
        is_enabled: true,
        requires_approval: false,
        risk_level: RiskLevel::Low,
        updated_at: Utc::now(),
    }]);

    let decision = DecisionEngine::default().decide("developer", &ctx);
    assert!(decision.should_act);
    assert!(decision.suggested_actions.iter().any(|a| a == "analyze_code"));
    assert!(decision.confidence > DecisionEngine::default().thresholds().base_confidence);
}

#[tokio::test]
async fn scenario_d_no_enabled_schedules_completes_immediately() {
    let harness = Harness::new(None);

    let result = harness
        .coordinator()
        .run_batch_orchestration(harness.project, TriggerSource::Manual, None)
        .await
        .unwrap();

    assert_eq!(result.agents_executed, 0);
    assert_eq!(result.status, JobStatus::Completed);
    assert!(result.success);

    let jobs = harness.store.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].agents_executed, 0);
    assert!(harness.store.execution_logs().is_empty());
}

#[tokio::test]
async fn scenario_e_partial_failure_still_completes() {
    let harness = Harness::new(Some(ActivityBuilder::new().prs_opened(5).build()));
    let developer = harness.schedule("developer", 10).await;
    let general = harness.schedule("general", 1).await;
    harness.store.enable_actions(harness.project, "developer", &["analyze_code"]);
    harness.store.enable_actions(harness.project, "general", &["housekeeping"]);
    harness
        .store
        .fail_on(FailurePoint::CreateSuggestionFor("analyze_code".into()));

    let result = harness
        .coordinator()
        .run_batch_orchestration(harness.project, TriggerSource::Cron, None)
        .await
        .unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.agents_succeeded, 1);
    assert_eq!(result.agents_failed, 1);
    assert_eq!(result.agents_executed, 2);
    assert_eq!(result.tasks_created, 1);

    let logs = harness.store.execution_logs();
    let developer_log = logs.iter().find(|l| l.schedule_id == developer.id).unwrap();
    assert_eq!(developer_log.status, ExecutionStatus::Failed);
    assert!(developer_log.error_message.is_some());
    let general_log = logs.iter().find(|l| l.schedule_id == general.id).unwrap();
    assert_eq!(general_log.status, ExecutionStatus::Completed);

    assert_eq!(harness.store.schedule(developer.id).unwrap().consecutive_failures, 1);
    assert_eq!(harness.store.schedule(general.id).unwrap().total_successes, 1);
}

#[tokio::test]
async fn scenario_f_absent_queue_runs_synchronously() {
    let harness = Harness::new(None);
    harness.schedule("general", 0).await;
    harness.store.enable_actions(harness.project, "general", &["housekeeping"]);

    let queue = JobQueue::new(Arc::new(harness.coordinator()), None, QueueConfig::default());
    assert!(!queue.is_available());

    let id = queue
        .add_job(
            QueueJobData::batch(harness.project, TriggerSource::Api),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();
    assert!(id.is_none());

    let jobs = harness.store.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].agents_succeeded, 1);
    assert_eq!(harness.store.execution_logs().len(), 1);
    assert_eq!(harness.store.suggestions().len(), 1);
}
