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

//! Orchestration Job Model
//!
//! A job is one invocation of the batch coordinator. Its status only moves
//! forward: `pending -> queued -> running -> {completed | failed | cancelled | timeout}`.
//! Once terminal, the status never changes again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::universal_types::UniversalUuid;

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full pass over a project's schedules.
    Batch,
    /// Refresh of the shared repository analysis only.
    GithubAnalysis,
    /// Batch triggered by the retry scheduler.
    Retry,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Batch => "batch",
            JobType::GithubAnalysis => "github_analysis",
            JobType::Retry => "retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "batch" => Some(JobType::Batch),
            "github_analysis" => Some(JobType::GithubAnalysis),
            "retry" => Some(JobType::Retry),
            _ => None,
        }
    }
}

/// What caused a job to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Cron,
    Webhook,
    Manual,
    Api,
    System,
    RetryScheduler,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Cron => "cron",
            TriggerSource::Webhook => "webhook",
            TriggerSource::Manual => "manual",
            TriggerSource::Api => "api",
            TriggerSource::System => "system",
            TriggerSource::RetryScheduler => "retry_scheduler",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cron" => Some(TriggerSource::Cron),
            "webhook" => Some(TriggerSource::Webhook),
            "manual" => Some(TriggerSource::Manual),
            "api" => Some(TriggerSource::Api),
            "system" => Some(TriggerSource::System),
            "retry_scheduler" => Some(TriggerSource::RetryScheduler),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            "timeout" => Some(JobStatus::Timeout),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Queued | Running | Cancelled) => true,
            (Queued, Running | Cancelled) => true,
            (Running, Completed | Failed | Cancelled | Timeout) => true,
            _ => false,
        }
    }

    pub const TERMINAL: [JobStatus; 4] = [
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Timeout,
    ];
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationJob {
    pub id: UniversalUuid,
    pub project_id: Option<UniversalUuid>,
    pub job_type: JobType,
    pub trigger_source: TriggerSource,
    pub triggered_by: Option<String>,
    pub status: JobStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
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
    pub input_params: Map<String, Value>,
    pub output_summary: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrchestrationJob {
    pub project_id: Option<UniversalUuid>,
    pub job_type: JobType,
    pub trigger_source: TriggerSource,
    pub triggered_by: Option<String>,
    /// Initial status; `Running` for synchronous batches, `Queued` or
    /// `Pending` for deferred ones.
    pub status: JobStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub input_params: Map<String, Value>,
}

impl NewOrchestrationJob {
    pub fn new(project_id: Option<UniversalUuid>, job_type: JobType, trigger: TriggerSource) -> Self {
        Self {
            project_id,
            job_type,
            trigger_source: trigger,
            triggered_by: None,
            status: JobStatus::Pending,
            scheduled_at: None,
            started_at: None,
            timeout_at: None,
            attempt: 1,
            max_attempts: 1,
            input_params: Map::new(),
        }
    }
}

/// Aggregate counters written when a job reaches a terminal status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobCounters {
    pub agents_executed: i32,
    pub agents_succeeded: i32,
    pub agents_failed: i32,
    pub agents_skipped: i32,
    pub tasks_created: i32,
}

/// Terminal update applied exactly once to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub status: JobStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub counters: JobCounters,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub output_summary: Option<Map<String, Value>>,
}

impl JobCompletion {
    /// A terminal update carrying no counters, used for cancellation and
    /// timeouts.
    pub fn bare(status: JobStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            completed_at: at,
            duration_ms: None,
            counters: JobCounters::default(),
            error_message: None,
            error_code: None,
            output_summary: None,
        }
    }
}
