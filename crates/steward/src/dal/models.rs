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

//! SQLite row models
//!
//! Diesel structs using SQLite-compatible types. UUIDs are stored as BLOB
//! (`Vec<u8>`), timestamps as fixed-width RFC3339 TEXT, booleans as INTEGER
//! (0/1) and opaque maps as JSON TEXT.
//!
//! Rows are converted to domain models at the DAL boundary. A row that cannot
//! be converted surfaces as [`StoreError::CorruptRecord`].

use chrono::{DateTime, NaiveTime, Utc};
use diesel::prelude::*;
use serde_json::{Map, Value};

use crate::database::schema::*;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::StoreError;
use crate::models::agent::{ActionConfig, RiskLevel};
use crate::models::analysis::{AnalysisWindow, CachedAnalysis, PeriodType};
use crate::models::execution_log::{AgentExecutionLog, ExecutionPhase, ExecutionStatus};
use crate::models::job::{JobStatus, JobType, OrchestrationJob, TriggerSource};
use crate::models::project::ProjectSnapshot;
use crate::models::schedule::{decode_days, AgentSchedule, ScheduleType};
use crate::models::suggestion::{ApprovalState, Suggestion};
use crate::queue::{QueueEntry, QueueEntryState};

const TIME_FORMAT: &str = "%H:%M:%S";

// ============================================================================
// Conversion helpers
// ============================================================================

pub fn uuid_to_blob(id: &UniversalUuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

pub fn blob_to_uuid(table: &'static str, blob: &[u8]) -> Result<UniversalUuid, StoreError> {
    UniversalUuid::from_bytes(blob).map_err(|e| StoreError::corrupt(table, e))
}

pub fn ts(at: &DateTime<Utc>) -> String {
    UniversalTimestamp(*at).to_storage_string()
}

pub fn current_timestamp_string() -> String {
    UniversalTimestamp::now().to_storage_string()
}

pub fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    UniversalTimestamp::from_rfc3339(raw)
        .map(UniversalTimestamp::into_inner)
        .map_err(|e| StoreError::corrupt(table, format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_opt_ts(table: &'static str, raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(|r| parse_ts(table, r)).transpose()
}

pub fn time_to_string(t: &NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn parse_time(table: &'static str, raw: Option<String>) -> Result<Option<NaiveTime>, StoreError> {
    raw.as_deref()
        .map(|r| {
            NaiveTime::parse_from_str(r, TIME_FORMAT)
                .map_err(|e| StoreError::corrupt(table, format!("bad time '{}': {}", r, e)))
        })
        .transpose()
}

fn parse_map(table: &'static str, raw: &str) -> Result<Map<String, Value>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::corrupt(table, e))
}

fn parse_enum<T>(table: &'static str, raw: &str, parse: fn(&str) -> Option<T>) -> Result<T, StoreError> {
    parse(raw).ok_or_else(|| StoreError::corrupt(table, format!("unknown value '{}'", raw)))
}

// ============================================================================
// Project Models
// ============================================================================

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = projects)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteProject {
    pub id: Vec<u8>,
    pub name: String,
    pub status: String,
    pub repository: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteProject> for ProjectSnapshot {
    type Error = StoreError;

    fn try_from(row: SqliteProject) -> Result<Self, Self::Error> {
        Ok(ProjectSnapshot {
            id: blob_to_uuid("projects", &row.id)?,
            name: row.name,
            status: row.status,
            repository: row.repository,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = project_tasks)]
pub struct NewSqliteProjectTask {
    pub id: Vec<u8>,
    pub project_id: Vec<u8>,
    pub title: String,
    pub source_agent: Option<String>,
    pub created_at: String,
}

// ============================================================================
// Action Config Models
// ============================================================================

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = agent_action_configs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteActionConfig {
    pub id: Vec<u8>,
    pub project_id: Vec<u8>,
    pub agent_slug: String,
    pub action_key: String,
    pub is_enabled: i32,
    pub requires_approval: i32,
    pub risk_level: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteActionConfig> for ActionConfig {
    type Error = StoreError;

    fn try_from(row: SqliteActionConfig) -> Result<Self, Self::Error> {
        const T: &str = "agent_action_configs";
        Ok(ActionConfig {
            id: blob_to_uuid(T, &row.id)?,
            project_id: blob_to_uuid(T, &row.project_id)?,
            agent_slug: row.agent_slug,
            action_key: row.action_key,
            is_enabled: row.is_enabled != 0,
            requires_approval: row.requires_approval != 0,
            risk_level: parse_enum(T, &row.risk_level, RiskLevel::parse)?,
            updated_at: parse_ts(T, &row.updated_at)?,
        })
    }
}

// ============================================================================
// Schedule Models
// ============================================================================

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = agent_schedules)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteAgentSchedule {
    pub id: Vec<u8>,
    pub project_id: Vec<u8>,
    pub agent_slug: String,
    pub is_enabled: i32,
    pub schedule_type: String,
    pub cron_expression: Option<String>,
    pub timezone: String,
    pub run_after_time: Option<String>,
    pub run_before_time: Option<String>,
    pub run_on_days: String,
    pub min_interval_minutes: i32,
    pub max_runs_per_day: i32,
    pub cooldown_after_error_minutes: i32,
    pub priority: i32,
    pub allow_concurrent: i32,
    pub last_run_at: Option<String>,
    pub last_success_at: Option<String>,
    pub last_failure_at: Option<String>,
    pub consecutive_failures: i32,
    pub total_runs: i32,
    pub total_successes: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteAgentSchedule> for AgentSchedule {
    type Error = StoreError;

    fn try_from(row: SqliteAgentSchedule) -> Result<Self, Self::Error> {
        const T: &str = "agent_schedules";
        Ok(AgentSchedule {
            id: blob_to_uuid(T, &row.id)?,
            project_id: blob_to_uuid(T, &row.project_id)?,
            agent_slug: row.agent_slug,
            enabled: row.is_enabled != 0,
            schedule_type: parse_enum(T, &row.schedule_type, ScheduleType::parse)?,
            cron_expression: row.cron_expression,
            timezone: row.timezone,
            run_after_time: parse_time(T, row.run_after_time)?,
            run_before_time: parse_time(T, row.run_before_time)?,
            run_on_days: decode_days(&row.run_on_days).map_err(|e| StoreError::corrupt(T, e))?,
            min_interval_minutes: row.min_interval_minutes,
            max_runs_per_day: row.max_runs_per_day,
            cooldown_after_error_minutes: row.cooldown_after_error_minutes,
            priority: row.priority,
            allow_concurrent: row.allow_concurrent != 0,
            last_run_at: parse_opt_ts(T, row.last_run_at)?,
            last_success_at: parse_opt_ts(T, row.last_success_at)?,
            last_failure_at: parse_opt_ts(T, row.last_failure_at)?,
            consecutive_failures: row.consecutive_failures,
            total_runs: row.total_runs,
            total_successes: row.total_successes,
            created_at: parse_ts(T, &row.created_at)?,
            updated_at: parse_ts(T, &row.updated_at)?,
        })
    }
}

// ============================================================================
// Job Models
// ============================================================================

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = orchestration_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteOrchestrationJob {
    pub id: Vec<u8>,
    pub project_id: Option<Vec<u8>>,
    pub job_type: String,
    pub trigger_source: String,
    pub triggered_by: Option<String>,
    pub status: String,
    pub scheduled_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub timeout_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub agents_executed: i32,
    pub agents_succeeded: i32,
    pub agents_failed: i32,
    pub agents_skipped: i32,
    pub tasks_created: i32,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub input_params: String,
    pub output_summary: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteOrchestrationJob> for OrchestrationJob {
    type Error = StoreError;

    fn try_from(row: SqliteOrchestrationJob) -> Result<Self, Self::Error> {
        const T: &str = "orchestration_jobs";
        Ok(OrchestrationJob {
            id: blob_to_uuid(T, &row.id)?,
            project_id: row
                .project_id
                .as_deref()
                .map(|b| blob_to_uuid(T, b))
                .transpose()?,
            job_type: parse_enum(T, &row.job_type, JobType::parse)?,
            trigger_source: parse_enum(T, &row.trigger_source, TriggerSource::parse)?,
            triggered_by: row.triggered_by,
            status: parse_enum(T, &row.status, JobStatus::parse)?,
            scheduled_at: parse_opt_ts(T, row.scheduled_at)?,
            started_at: parse_opt_ts(T, row.started_at)?,
            completed_at: parse_opt_ts(T, row.completed_at)?,
            timeout_at: parse_opt_ts(T, row.timeout_at)?,
            duration_ms: row.duration_ms,
            agents_executed: row.agents_executed,
            agents_succeeded: row.agents_succeeded,
            agents_failed: row.agents_failed,
            agents_skipped: row.agents_skipped,
            tasks_created: row.tasks_created,
            error_message: row.error_message,
            error_code: row.error_code,
            attempt: row.attempt,
            max_attempts: row.max_attempts,
            input_params: parse_map(T, &row.input_params)?,
            output_summary: row
                .output_summary
                .as_deref()
                .map(|raw| parse_map(T, raw))
                .transpose()?,
            created_at: parse_ts(T, &row.created_at)?,
            updated_at: parse_ts(T, &row.updated_at)?,
        })
    }
}

// ============================================================================
// Execution Log Models
// ============================================================================

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = agent_execution_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteExecutionLog {
    pub id: Vec<u8>,
    pub job_id: Vec<u8>,
    pub schedule_id: Vec<u8>,
    pub project_id: Vec<u8>,
    pub agent_slug: String,
    pub phase: String,
    pub status: String,
    pub should_act: i32,
    pub do_nothing_reason: Option<String>,
    pub confidence: f64,
    pub context_summary: String,
    pub external_data: Option<String>,
    pub actions_proposed: i32,
    pub actions_executed: i32,
    pub actions_approved: i32,
    pub actions_rejected: i32,
    pub created_suggestion_ids: String,
    pub error_message: Option<String>,
    pub tokens_used: i32,
    pub estimated_cost: f64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: String,
}

impl TryFrom<SqliteExecutionLog> for AgentExecutionLog {
    type Error = StoreError;

    fn try_from(row: SqliteExecutionLog) -> Result<Self, Self::Error> {
        const T: &str = "agent_execution_logs";
        let created_suggestion_ids: Vec<UniversalUuid> =
            serde_json::from_str(&row.created_suggestion_ids)
                .map_err(|e| StoreError::corrupt(T, e))?;
        Ok(AgentExecutionLog {
            id: blob_to_uuid(T, &row.id)?,
            job_id: blob_to_uuid(T, &row.job_id)?,
            schedule_id: blob_to_uuid(T, &row.schedule_id)?,
            project_id: blob_to_uuid(T, &row.project_id)?,
            agent_slug: row.agent_slug,
            phase: parse_enum(T, &row.phase, ExecutionPhase::parse)?,
            status: parse_enum(T, &row.status, ExecutionStatus::parse)?,
            should_act: row.should_act != 0,
            do_nothing_reason: row.do_nothing_reason,
            confidence: row.confidence,
            context_summary: parse_map(T, &row.context_summary)?,
            external_data: row
                .external_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| StoreError::corrupt(T, e))?,
            actions_proposed: row.actions_proposed,
            actions_executed: row.actions_executed,
            actions_approved: row.actions_approved,
            actions_rejected: row.actions_rejected,
            created_suggestion_ids,
            error_message: row.error_message,
            tokens_used: row.tokens_used,
            estimated_cost: row.estimated_cost,
            started_at: parse_ts(T, &row.started_at)?,
            completed_at: parse_opt_ts(T, row.completed_at)?,
            duration_ms: row.duration_ms,
            created_at: parse_ts(T, &row.created_at)?,
        })
    }
}

// ============================================================================
// Analysis Cache Models
// ============================================================================

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = repository_analyses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteRepositoryAnalysis {
    pub id: Vec<u8>,
    pub project_id: Vec<u8>,
    pub period_type: String,
    pub period_start: String,
    pub period_end: String,
    pub analysis: String,
    pub fetched_at: String,
    pub expires_at: String,
    pub is_stale: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteRepositoryAnalysis> for CachedAnalysis {
    type Error = StoreError;

    fn try_from(row: SqliteRepositoryAnalysis) -> Result<Self, Self::Error> {
        const T: &str = "repository_analyses";
        Ok(CachedAnalysis {
            id: blob_to_uuid(T, &row.id)?,
            project_id: blob_to_uuid(T, &row.project_id)?,
            window: AnalysisWindow {
                period_type: parse_enum(T, &row.period_type, PeriodType::parse)?,
                start: parse_ts(T, &row.period_start)?,
                end: parse_ts(T, &row.period_end)?,
            },
            activity: serde_json::from_str(&row.analysis).map_err(|e| StoreError::corrupt(T, e))?,
            fetched_at: parse_ts(T, &row.fetched_at)?,
            expires_at: parse_ts(T, &row.expires_at)?,
            is_stale: row.is_stale != 0,
        })
    }
}

// ============================================================================
// Suggestion Models
// ============================================================================

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = agent_suggestions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteSuggestion {
    pub id: Vec<u8>,
    pub project_id: Vec<u8>,
    pub agent_slug: String,
    pub action_key: String,
    pub context: String,
    pub approval_state: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SqliteSuggestion> for Suggestion {
    type Error = StoreError;

    fn try_from(row: SqliteSuggestion) -> Result<Self, Self::Error> {
        const T: &str = "agent_suggestions";
        Ok(Suggestion {
            id: blob_to_uuid(T, &row.id)?,
            project_id: blob_to_uuid(T, &row.project_id)?,
            agent_slug: row.agent_slug,
            action_key: row.action_key,
            context: parse_map(T, &row.context)?,
            approval_state: parse_enum(T, &row.approval_state, ApprovalState::parse)?,
            created_at: parse_ts(T, &row.created_at)?,
        })
    }
}

// ============================================================================
// Queue Entry Models
// ============================================================================

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = queue_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteQueueEntry {
    pub id: Vec<u8>,
    pub job_type: String,
    pub payload: String,
    pub priority: i32,
    pub state: String,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub run_at: String,
    pub orchestration_job_id: Option<Vec<u8>>,
    pub last_error: Option<String>,
    pub result: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub updated_at: String,
}

impl TryFrom<SqliteQueueEntry> for QueueEntry {
    type Error = StoreError;

    fn try_from(row: SqliteQueueEntry) -> Result<Self, Self::Error> {
        const T: &str = "queue_entries";
        Ok(QueueEntry {
            id: blob_to_uuid(T, &row.id)?,
            data: serde_json::from_str(&row.payload).map_err(|e| StoreError::corrupt(T, e))?,
            priority: row.priority,
            state: parse_enum(T, &row.state, QueueEntryState::parse)?,
            attempts_made: row.attempts_made,
            max_attempts: row.max_attempts,
            run_at: parse_ts(T, &row.run_at)?,
            orchestration_job_id: row
                .orchestration_job_id
                .as_deref()
                .map(|b| blob_to_uuid(T, b))
                .transpose()?,
            last_error: row.last_error,
            result: row
                .result
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| StoreError::corrupt(T, e))?,
            created_at: parse_ts(T, &row.created_at)?,
            started_at: parse_opt_ts(T, row.started_at)?,
            finished_at: parse_opt_ts(T, row.finished_at)?,
        })
    }
}

/// Converts a batch of rows, failing on the first corrupt one.
pub fn convert_all<R, D>(rows: Vec<R>) -> Result<Vec<D>, StoreError>
where
    D: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(D::try_from).collect()
}
