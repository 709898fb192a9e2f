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

//! # Agent Execution Context
//!
//! The read-only snapshot a decision is made against. One is built per
//! (project, agent) pair inside a batch; nothing here mutates the store.
//!
//! The snapshot tolerates partial data. Repository activity is `None` when no
//! metrics source is configured or the shared fetch failed, and the project
//! snapshot is `None` when the project row is missing. Store failures while
//! reading the remaining sources propagate to the caller.
//!
//! ## Summary keys
//!
//! [`AgentExecutionContext::summary`] always carries:
//!
//! | key | value |
//! |-----|-------|
//! | `agent` | agent slug |
//! | `project_name` | string or null |
//! | `has_repository` | bool |
//! | `recent_suggestions` | suggestions in the lookback window |
//! | `recent_tasks` | tasks in the lookback window |
//! | `enabled_actions` | enabled action keys, sorted |
//! | `repository` | activity counters or null |

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::database::universal_types::UniversalUuid;
use crate::error::OrchestrationError;
use crate::models::agent::{ActionConfig, AgentConfig};
use crate::models::analysis::RepositoryActivity;
use crate::models::project::{ActivityCounts, ProjectSnapshot};
use crate::store::OrchestrationStore;

#[derive(Debug, Clone, PartialEq)]
pub struct AgentExecutionContext {
    pub project_id: UniversalUuid,
    pub agent: AgentConfig,
    pub project: Option<ProjectSnapshot>,
    pub repository: Option<RepositoryActivity>,
    pub recent_activity: ActivityCounts,
    /// Every action config row for this agent, enabled or not.
    pub action_configs: Vec<ActionConfig>,
    /// When this agent last suggested each action for the project.
    pub last_action_at: BTreeMap<String, DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

impl AgentExecutionContext {
    pub fn new(project_id: UniversalUuid, agent: AgentConfig, now: DateTime<Utc>) -> Self {
        Self {
            project_id,
            agent,
            project: None,
            repository: None,
            recent_activity: ActivityCounts::default(),
            action_configs: Vec::new(),
            last_action_at: BTreeMap::new(),
            now,
        }
    }

    pub fn with_project(mut self, project: ProjectSnapshot) -> Self {
        self.project = Some(project);
        self
    }

    pub fn with_repository(mut self, activity: RepositoryActivity) -> Self {
        self.repository = Some(activity);
        self
    }

    pub fn with_recent_activity(mut self, counts: ActivityCounts) -> Self {
        self.recent_activity = counts;
        self
    }

    pub fn with_action_configs(mut self, configs: Vec<ActionConfig>) -> Self {
        self.action_configs = configs;
        self
    }

    pub fn with_last_action_at(mut self, action_key: &str, at: DateTime<Utc>) -> Self {
        self.last_action_at.insert(action_key.to_string(), at);
        self
    }

    /// When this agent last suggested `action_key`.
    pub fn last_action_at(&self, action_key: &str) -> Option<DateTime<Utc>> {
        self.last_action_at.get(action_key).copied()
    }

    /// When this agent last produced any suggestion for the project.
    pub fn last_suggestion_at(&self) -> Option<DateTime<Utc>> {
        self.last_action_at.values().max().copied()
    }

    pub fn agent_slug(&self) -> &str {
        &self.agent.slug
    }

    pub fn is_action_enabled(&self, action_key: &str) -> bool {
        self.action_configs
            .iter()
            .any(|c| c.is_enabled && c.action_key == action_key)
    }

    /// Enabled action keys, sorted and deduplicated.
    pub fn enabled_actions(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .action_configs
            .iter()
            .filter(|c| c.is_enabled)
            .map(|c| c.action_key.as_str())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    pub fn has_repository(&self) -> bool {
        self.project.as_ref().is_some_and(|p| p.has_repository())
    }

    /// Compact map persisted on the execution log.
    pub fn summary(&self) -> Map<String, Value> {
        let mut summary = Map::new();
        summary.insert("agent".into(), json!(self.agent.slug));
        summary.insert(
            "project_name".into(),
            json!(self.project.as_ref().map(|p| p.name.clone())),
        );
        summary.insert("has_repository".into(), json!(self.has_repository()));
        summary.insert(
            "recent_suggestions".into(),
            json!(self.recent_activity.suggestions),
        );
        summary.insert("recent_tasks".into(), json!(self.recent_activity.tasks));
        summary.insert("enabled_actions".into(), json!(self.enabled_actions()));
        summary.insert(
            "repository".into(),
            match &self.repository {
                Some(activity) => json!({
                    "commits": activity.commits,
                    "prs_opened": activity.prs_opened,
                    "prs_merged": activity.prs_merged,
                    "issues_opened": activity.issues_opened,
                    "velocity_score": activity.velocity_score,
                }),
                None => Value::Null,
            },
        );
        if let Some(at) = self.last_suggestion_at() {
            summary.insert("last_suggestion_at".into(), json!(at.to_rfc3339()));
        }
        summary
    }

    /// Full repository snapshot for the execution log's external data.
    pub fn external_data(&self) -> Option<Value> {
        self.repository
            .as_ref()
            .and_then(|activity| serde_json::to_value(activity).ok())
    }
}

/// Reads the per-agent context sources from the store.
#[derive(Clone)]
pub struct ContextBuilder {
    store: Arc<dyn OrchestrationStore>,
    activity_lookback: Duration,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn OrchestrationStore>, activity_lookback: std::time::Duration) -> Self {
        Self {
            store,
            activity_lookback: Duration::from_std(activity_lookback)
                .unwrap_or_else(|_| Duration::hours(24)),
        }
    }

    /// Builds the context for one agent.
    ///
    /// `repository` is the batch's shared analysis snapshot and
    /// `action_configs` is passed through unfiltered.
    pub async fn build(
        &self,
        project_id: UniversalUuid,
        agent: &AgentConfig,
        repository: Option<&RepositoryActivity>,
        action_configs: Vec<ActionConfig>,
        now: DateTime<Utc>,
    ) -> Result<AgentExecutionContext, OrchestrationError> {
        let since = now - self.activity_lookback;
        let recent_activity = self.store.count_recent_activity(project_id, since).await?;

        let project = self.store.get_project(project_id).await?;
        if project.is_none() {
            debug!("No project metadata for {}, continuing without it", project_id);
        }

        let last_action_at = self
            .store
            .latest_suggestion_by_action(project_id, &agent.slug)
            .await?;

        Ok(AgentExecutionContext {
            project_id,
            agent: agent.clone(),
            project,
            repository: repository.cloned(),
            recent_activity,
            action_configs,
            last_action_at,
            now,
        })
    }
}
