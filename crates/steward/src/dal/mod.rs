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

//! SQLite Data Access Layer
//!
//! `DAL` owns the connection pool and hands out one accessor per entity
//! (`dal.schedules()`, `dal.jobs()`, ...). It also implements
//! [`OrchestrationStore`] by delegating to those accessors, so the rest of
//! the crate never touches Diesel directly.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::universal_types::UniversalUuid;
use crate::database::Database;
use crate::error::StoreError;
use crate::models::agent::ActionConfig;
use crate::models::analysis::{AnalysisWindow, CachedAnalysis, NewCachedAnalysis};
use crate::models::execution_log::{AgentExecutionLog, NewExecutionLog};
use crate::models::job::{JobCompletion, NewOrchestrationJob, OrchestrationJob};
use crate::models::project::{ActivityCounts, ProjectSnapshot};
use crate::models::schedule::{AgentSchedule, NewAgentSchedule, ScheduleOutcome};
use crate::models::suggestion::{NewSuggestion, Suggestion};
use crate::store::{JobFilter, OrchestrationStore};

pub mod analysis;
pub mod execution_log;
pub mod job;
pub mod models;
pub mod project;
pub mod queue;
pub mod schedule;
pub mod suggestion;

use analysis::AnalysisDAL;
use execution_log::ExecutionLogDAL;
use job::JobDAL;
use project::ProjectDAL;
pub use queue::SqliteQueueBackend;
use schedule::ScheduleDAL;
use suggestion::SuggestionDAL;

/// The main Data Access Layer.
#[derive(Clone, Debug)]
pub struct DAL {
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    pub fn projects(&self) -> ProjectDAL {
        ProjectDAL { dal: self }
    }

    pub fn schedules(&self) -> ScheduleDAL {
        ScheduleDAL { dal: self }
    }

    pub fn jobs(&self) -> JobDAL {
        JobDAL { dal: self }
    }

    pub fn execution_logs(&self) -> ExecutionLogDAL {
        ExecutionLogDAL { dal: self }
    }

    pub fn analyses(&self) -> AnalysisDAL {
        AnalysisDAL { dal: self }
    }

    pub fn suggestions(&self) -> SuggestionDAL {
        SuggestionDAL { dal: self }
    }

    /// A durable queue backend sharing this DAL's pool.
    pub fn queue_backend(&self) -> SqliteQueueBackend {
        SqliteQueueBackend::new(self.clone())
    }
}

#[async_trait]
impl OrchestrationStore for DAL {
    async fn create_schedule(&self, new: NewAgentSchedule) -> Result<AgentSchedule, StoreError> {
        self.schedules().create(new).await
    }

    async fn get_schedule(&self, id: UniversalUuid) -> Result<Option<AgentSchedule>, StoreError> {
        self.schedules().get(id).await
    }

    async fn list_enabled_schedules(
        &self,
        project_id: UniversalUuid,
    ) -> Result<Vec<AgentSchedule>, StoreError> {
        self.schedules().list_enabled(project_id).await
    }

    async fn record_schedule_outcome(
        &self,
        schedule_id: UniversalUuid,
        outcome: ScheduleOutcome,
        at: DateTime<Utc>,
    ) -> Result<AgentSchedule, StoreError> {
        self.schedules().record_outcome(schedule_id, outcome, at).await
    }

    async fn list_projects_with_enabled_schedules(&self) -> Result<Vec<UniversalUuid>, StoreError> {
        self.schedules().projects_with_enabled().await
    }

    async fn create_job(&self, new: NewOrchestrationJob) -> Result<OrchestrationJob, StoreError> {
        self.jobs().create(new).await
    }

    async fn get_job(&self, id: UniversalUuid) -> Result<Option<OrchestrationJob>, StoreError> {
        self.jobs().get(id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<OrchestrationJob>, StoreError> {
        self.jobs().list(filter).await
    }

    async fn start_job(
        &self,
        id: UniversalUuid,
        started_at: DateTime<Utc>,
        timeout_at: Option<DateTime<Utc>>,
    ) -> Result<OrchestrationJob, StoreError> {
        self.jobs().start(id, started_at, timeout_at).await
    }

    async fn finalize_job(
        &self,
        id: UniversalUuid,
        completion: JobCompletion,
    ) -> Result<OrchestrationJob, StoreError> {
        self.jobs().finalize(id, completion).await
    }

    async fn expire_overdue_jobs(&self, now: DateTime<Utc>) -> Result<Vec<UniversalUuid>, StoreError> {
        self.jobs().expire_overdue(now).await
    }

    async fn count_jobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.jobs().count_older_than(cutoff).await
    }

    async fn delete_jobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.jobs().delete_older_than(cutoff).await
    }

    async fn insert_execution_log(
        &self,
        log: NewExecutionLog,
    ) -> Result<AgentExecutionLog, StoreError> {
        self.execution_logs().insert(log).await
    }

    async fn list_execution_logs(
        &self,
        job_id: UniversalUuid,
    ) -> Result<Vec<AgentExecutionLog>, StoreError> {
        self.execution_logs().list_for_job(job_id).await
    }

    async fn find_cached_analysis(
        &self,
        project_id: UniversalUuid,
        window: &AnalysisWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedAnalysis>, StoreError> {
        self.analyses().find_fresh(project_id, window, now).await
    }

    async fn upsert_cached_analysis(
        &self,
        new: NewCachedAnalysis,
    ) -> Result<CachedAnalysis, StoreError> {
        self.analyses().upsert(new).await
    }

    async fn mark_analyses_stale(&self, project_id: UniversalUuid) -> Result<usize, StoreError> {
        self.analyses().mark_stale(project_id).await
    }

    async fn get_project(&self, id: UniversalUuid) -> Result<Option<ProjectSnapshot>, StoreError> {
        self.projects().get(id).await
    }

    async fn list_action_configs(
        &self,
        project_id: UniversalUuid,
        agent_slug: &str,
    ) -> Result<Vec<ActionConfig>, StoreError> {
        self.projects().list_action_configs(project_id, agent_slug).await
    }

    async fn count_recent_activity(
        &self,
        project_id: UniversalUuid,
        since: DateTime<Utc>,
    ) -> Result<ActivityCounts, StoreError> {
        self.projects().count_recent_activity(project_id, since).await
    }

    async fn latest_suggestion_by_action(
        &self,
        project_id: UniversalUuid,
        agent_slug: &str,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError> {
        self.suggestions().latest_by_action(project_id, agent_slug).await
    }

    async fn create_suggestion(&self, new: NewSuggestion) -> Result<Suggestion, StoreError> {
        self.suggestions().create(new).await
    }

    async fn list_suggestions(&self, project_id: UniversalUuid) -> Result<Vec<Suggestion>, StoreError> {
        self.suggestions().list(project_id).await
    }
}
