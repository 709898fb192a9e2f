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

//! Queue entry records shared by every queue backend.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coordinator::BatchOrchestrationResult;
use crate::database::universal_types::UniversalUuid;
use crate::models::job::{JobType, TriggerSource};

/// What a queued job should do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJobData {
    pub job_type: JobType,
    pub project_id: Option<UniversalUuid>,
    pub trigger_source: TriggerSource,
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl QueueJobData {
    /// A full batch pass for `project_id`.
    pub fn batch(project_id: UniversalUuid, trigger_source: TriggerSource) -> Self {
        Self {
            job_type: JobType::Batch,
            project_id: Some(project_id),
            trigger_source,
            triggered_by: None,
            params: Map::new(),
        }
    }

    /// An analysis refresh only.
    pub fn analysis(project_id: UniversalUuid, trigger_source: TriggerSource) -> Self {
        Self {
            job_type: JobType::GithubAnalysis,
            ..Self::batch(project_id, trigger_source)
        }
    }

    pub fn triggered_by(mut self, user: impl Into<String>) -> Self {
        self.triggered_by = Some(user.into());
        self
    }
}

/// Options accepted by [`JobQueue::add_job`](super::JobQueue::add_job).
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Earliest time the job may start, relative to now.
    pub delay: Option<Duration>,
    /// Higher runs first. Defaults to 0.
    pub priority: Option<i32>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Structured outcome of processing one queued job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProcessResult {
    pub success: bool,
    pub agents_executed: i32,
    pub agents_succeeded: i32,
    pub agents_failed: i32,
    pub tasks_created: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
}

impl From<&BatchOrchestrationResult> for JobProcessResult {
    fn from(result: &BatchOrchestrationResult) -> Self {
        Self {
            success: result.success,
            agents_executed: result.agents_executed,
            agents_succeeded: result.agents_succeeded,
            agents_failed: result.agents_failed,
            tasks_created: result.tasks_created,
            duration_ms: result.duration_ms,
            error: result.error.clone(),
        }
    }
}

/// Where a queue entry is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryState {
    /// Due now, waiting for a worker.
    Waiting,
    /// Due at a later `run_at`, including retries in backoff.
    Delayed,
    Active,
    Completed,
    /// Attempts exhausted. Kept for inspection and manual retry.
    Failed,
}

impl QueueEntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEntryState::Waiting => "waiting",
            QueueEntryState::Delayed => "delayed",
            QueueEntryState::Active => "active",
            QueueEntryState::Completed => "completed",
            QueueEntryState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(QueueEntryState::Waiting),
            "delayed" => Some(QueueEntryState::Delayed),
            "active" => Some(QueueEntryState::Active),
            "completed" => Some(QueueEntryState::Completed),
            "failed" => Some(QueueEntryState::Failed),
            _ => None,
        }
    }

    /// States a worker may claim from.
    pub fn is_pending(&self) -> bool {
        matches!(self, QueueEntryState::Waiting | QueueEntryState::Delayed)
    }
}

impl std::fmt::Display for QueueEntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: UniversalUuid,
    pub data: QueueJobData,
    pub priority: i32,
    pub state: QueueEntryState,
    /// Attempts started so far, including the one in progress.
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    /// The job record this entry drives.
    pub orchestration_job_id: Option<UniversalUuid>,
    pub last_error: Option<String>,
    pub result: Option<JobProcessResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueEntry {
    pub data: QueueJobData,
    pub priority: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub orchestration_job_id: Option<UniversalUuid>,
    /// `Waiting` when due immediately, `Delayed` otherwise.
    pub state: QueueEntryState,
}

/// Entry counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl QueueCounts {
    pub fn add(&mut self, state: QueueEntryState, n: usize) {
        match state {
            QueueEntryState::Waiting => self.waiting += n,
            QueueEntryState::Delayed => self.delayed += n,
            QueueEntryState::Active => self.active += n,
            QueueEntryState::Completed => self.completed += n,
            QueueEntryState::Failed => self.failed += n,
        }
    }
}
