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

//! Execution log records.
//!
//! One log is written per (job, schedule) pair that was actually attempted.
//! The log is assembled in memory as a [`NewExecutionLog`] while the schedule
//! moves through its phases and persisted exactly once, either at the end of
//! the attempt or at the point of failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::universal_types::UniversalUuid;

/// Phase of a schedule attempt. Phases only advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Analyze,
    Decide,
    Execute,
    Verify,
    Complete,
}

impl ExecutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::Analyze => "analyze",
            ExecutionPhase::Decide => "decide",
            ExecutionPhase::Execute => "execute",
            ExecutionPhase::Verify => "verify",
            ExecutionPhase::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analyze" => Some(ExecutionPhase::Analyze),
            "decide" => Some(ExecutionPhase::Decide),
            "execute" => Some(ExecutionPhase::Execute),
            "verify" => Some(ExecutionPhase::Verify),
            "complete" => Some(ExecutionPhase::Complete),
            _ => None,
        }
    }
}

/// Outcome status of a schedule attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    DoNothing,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::DoNothing => "do_nothing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "skipped" => Some(ExecutionStatus::Skipped),
            "do_nothing" => Some(ExecutionStatus::DoNothing),
            _ => None,
        }
    }

    /// Completed and do-nothing both count as a healthy run.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::DoNothing)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecutionLog {
    pub id: UniversalUuid,
    pub job_id: UniversalUuid,
    pub schedule_id: UniversalUuid,
    pub project_id: UniversalUuid,
    pub agent_slug: String,
    pub phase: ExecutionPhase,
    pub status: ExecutionStatus,
    pub should_act: bool,
    pub do_nothing_reason: Option<String>,
    pub confidence: f64,
    pub context_summary: Map<String, Value>,
    pub external_data: Option<Value>,
    pub actions_proposed: i32,
    pub actions_executed: i32,
    pub actions_approved: i32,
    pub actions_rejected: i32,
    pub created_suggestion_ids: Vec<UniversalUuid>,
    pub error_message: Option<String>,
    pub tokens_used: i32,
    pub estimated_cost: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// An execution log under construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExecutionLog {
    pub job_id: UniversalUuid,
    pub schedule_id: UniversalUuid,
    pub project_id: UniversalUuid,
    pub agent_slug: String,
    pub phase: ExecutionPhase,
    pub status: ExecutionStatus,
    pub should_act: bool,
    pub do_nothing_reason: Option<String>,
    pub confidence: f64,
    pub context_summary: Map<String, Value>,
    pub external_data: Option<Value>,
    pub actions_proposed: i32,
    pub actions_executed: i32,
    pub actions_approved: i32,
    pub actions_rejected: i32,
    pub created_suggestion_ids: Vec<UniversalUuid>,
    pub error_message: Option<String>,
    pub tokens_used: i32,
    pub estimated_cost: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl NewExecutionLog {
    /// Starts a log in the `analyze` phase with `running` status.
    pub fn start(
        job_id: UniversalUuid,
        schedule_id: UniversalUuid,
        project_id: UniversalUuid,
        agent_slug: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            schedule_id,
            project_id,
            agent_slug: agent_slug.into(),
            phase: ExecutionPhase::Analyze,
            status: ExecutionStatus::Running,
            should_act: false,
            do_nothing_reason: None,
            confidence: 0.0,
            context_summary: Map::new(),
            external_data: None,
            actions_proposed: 0,
            actions_executed: 0,
            actions_approved: 0,
            actions_rejected: 0,
            created_suggestion_ids: Vec::new(),
            error_message: None,
            tokens_used: 0,
            estimated_cost: 0.0,
            started_at,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Moves to `phase`. Requests to move backwards are ignored.
    pub fn advance(&mut self, phase: ExecutionPhase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }

    fn close(&mut self, status: ExecutionStatus, at: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(at);
        self.duration_ms = Some((at - self.started_at).num_milliseconds().max(0));
    }

    /// Closes the log as `completed` in the `complete` phase.
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.advance(ExecutionPhase::Complete);
        self.close(ExecutionStatus::Completed, at);
    }

    /// Closes the log as a do-nothing outcome. Nothing was executed.
    pub fn do_nothing(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.should_act = false;
        self.do_nothing_reason = Some(reason.into());
        self.actions_executed = 0;
        self.advance(ExecutionPhase::Complete);
        self.close(ExecutionStatus::DoNothing, at);
    }

    /// Closes the log as `failed`, keeping the phase at which it failed.
    pub fn fail(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.error_message = Some(message.into());
        self.close(ExecutionStatus::Failed, at);
    }
}
