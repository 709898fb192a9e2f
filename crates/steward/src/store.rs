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

//! The relational store the orchestration core persists through.
//!
//! Every mutation is a single-row update or insert keyed by id, except the
//! analysis cache upsert which resolves conflicts on
//! `(project, period type, period start)`. Methods return `Ok(None)` where
//! absence is a legitimate answer and `Err` only for real failures.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::universal_types::UniversalUuid;
use crate::error::StoreError;
use crate::models::agent::ActionConfig;
use crate::models::analysis::{AnalysisWindow, CachedAnalysis, NewCachedAnalysis};
use crate::models::execution_log::{AgentExecutionLog, NewExecutionLog};
use crate::models::job::{JobCompletion, JobStatus, NewOrchestrationJob, OrchestrationJob};
use crate::models::project::{ActivityCounts, ProjectSnapshot};
use crate::models::schedule::{AgentSchedule, NewAgentSchedule, ScheduleOutcome};
use crate::models::suggestion::{NewSuggestion, Suggestion};

/// Filter for listing jobs, newest first.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub project_id: Option<UniversalUuid>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn for_project(project_id: UniversalUuid) -> Self {
        Self {
            project_id: Some(project_id),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait OrchestrationStore: Send + Sync {
    // Schedules

    async fn create_schedule(&self, new: NewAgentSchedule) -> Result<AgentSchedule, StoreError>;

    async fn get_schedule(&self, id: UniversalUuid) -> Result<Option<AgentSchedule>, StoreError>;

    /// Enabled schedules for a project, highest priority first.
    async fn list_enabled_schedules(
        &self,
        project_id: UniversalUuid,
    ) -> Result<Vec<AgentSchedule>, StoreError>;

    /// Applies one attempt's outcome to a schedule's running counters.
    async fn record_schedule_outcome(
        &self,
        schedule_id: UniversalUuid,
        outcome: ScheduleOutcome,
        at: DateTime<Utc>,
    ) -> Result<AgentSchedule, StoreError>;

    async fn list_projects_with_enabled_schedules(&self) -> Result<Vec<UniversalUuid>, StoreError>;

    // Jobs

    async fn create_job(&self, new: NewOrchestrationJob) -> Result<OrchestrationJob, StoreError>;

    async fn get_job(&self, id: UniversalUuid) -> Result<Option<OrchestrationJob>, StoreError>;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<OrchestrationJob>, StoreError>;

    /// Moves a pending or queued job to `running`.
    ///
    /// Fails with [`StoreError::InvalidStatusTransition`] if the job is not in
    /// a state that may start.
    async fn start_job(
        &self,
        id: UniversalUuid,
        started_at: DateTime<Utc>,
        timeout_at: Option<DateTime<Utc>>,
    ) -> Result<OrchestrationJob, StoreError>;

    /// Writes a job's terminal status and counters.
    ///
    /// Fails with [`StoreError::InvalidStatusTransition`] and leaves the
    /// record untouched if the job is already terminal.
    async fn finalize_job(
        &self,
        id: UniversalUuid,
        completion: JobCompletion,
    ) -> Result<OrchestrationJob, StoreError>;

    /// Moves running jobs whose deadline has passed to `timeout`. Returns the
    /// ids that were expired.
    async fn expire_overdue_jobs(&self, now: DateTime<Utc>) -> Result<Vec<UniversalUuid>, StoreError>;

    /// Counts terminal jobs created before `cutoff`.
    async fn count_jobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Deletes terminal jobs created before `cutoff` along with their logs.
    async fn delete_jobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    // Execution logs

    async fn insert_execution_log(
        &self,
        log: NewExecutionLog,
    ) -> Result<AgentExecutionLog, StoreError>;

    async fn list_execution_logs(
        &self,
        job_id: UniversalUuid,
    ) -> Result<Vec<AgentExecutionLog>, StoreError>;

    // Analysis cache

    /// Newest non-stale, unexpired analysis whose period start lies in
    /// `window`.
    async fn find_cached_analysis(
        &self,
        project_id: UniversalUuid,
        window: &AnalysisWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedAnalysis>, StoreError>;

    /// Inserts an analysis, replacing any row with the same key.
    async fn upsert_cached_analysis(
        &self,
        new: NewCachedAnalysis,
    ) -> Result<CachedAnalysis, StoreError>;

    /// Flags every cached analysis for a project as stale.
    async fn mark_analyses_stale(&self, project_id: UniversalUuid) -> Result<usize, StoreError>;

    // Context sources

    async fn get_project(&self, id: UniversalUuid) -> Result<Option<ProjectSnapshot>, StoreError>;

    async fn list_action_configs(
        &self,
        project_id: UniversalUuid,
        agent_slug: &str,
    ) -> Result<Vec<ActionConfig>, StoreError>;

    /// Suggestions and tasks created for a project since `since`.
    async fn count_recent_activity(
        &self,
        project_id: UniversalUuid,
        since: DateTime<Utc>,
    ) -> Result<ActivityCounts, StoreError>;

    /// Most recent suggestion time per action key for one agent.
    async fn latest_suggestion_by_action(
        &self,
        project_id: UniversalUuid,
        agent_slug: &str,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError>;

    // Suggestions

    async fn create_suggestion(&self, new: NewSuggestion) -> Result<Suggestion, StoreError>;

    async fn list_suggestions(&self, project_id: UniversalUuid) -> Result<Vec<Suggestion>, StoreError>;
}
