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

//! # Task Executor
//!
//! Turns an accepted [`Decision`] into suggestion records. Actions are
//! processed independently: an action that is missing or disabled for the
//! project is skipped silently, and a failed insert is logged and counted
//! without stopping the remaining actions.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::context::AgentExecutionContext;
use crate::database::universal_types::UniversalUuid;
use crate::decision::Decision;
use crate::error::OrchestrationError;
use crate::models::agent::enabled_action;
use crate::models::suggestion::{ApprovalState, NewSuggestion, Suggestion};
use crate::store::OrchestrationStore;

/// Counters for one executed decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub actions_proposed: i32,
    pub actions_executed: i32,
    /// Suggestions created already approved.
    pub actions_approved: i32,
    pub actions_rejected: i32,
    pub created_suggestion_ids: Vec<UniversalUuid>,
    /// `(action, error)` for every insert that failed.
    pub failures: Vec<(String, String)>,
}

impl ExecutionOutcome {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<dyn OrchestrationStore>,
}

impl TaskExecutor {
    pub fn new(store: Arc<dyn OrchestrationStore>) -> Self {
        Self { store }
    }

    /// Creates one suggestion per enabled proposed action.
    pub async fn execute(&self, ctx: &AgentExecutionContext, decision: &Decision) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome {
            actions_proposed: decision.suggested_actions.len() as i32,
            ..Default::default()
        };

        for action in &decision.suggested_actions {
            match self.create_suggestion(ctx, decision, action).await {
                Ok(Some(suggestion)) => {
                    outcome.actions_executed += 1;
                    if suggestion.approval_state == ApprovalState::AutoApproved {
                        outcome.actions_approved += 1;
                    }
                    outcome.created_suggestion_ids.push(suggestion.id);
                }
                Ok(None) => {
                    debug!(
                        "Action {} is not enabled for {} on project {}, skipping",
                        action, ctx.agent.slug, ctx.project_id
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to create suggestion {} for {} on project {}: {}",
                        action, ctx.agent.slug, ctx.project_id, e
                    );
                    outcome.failures.push((action.clone(), e.to_string()));
                }
            }
        }

        if outcome.actions_executed > 0 {
            metrics::counter!("steward_suggestions_created_total", "agent" => ctx.agent.slug.clone())
                .increment(outcome.actions_executed as u64);
        }
        outcome
    }

    /// Creates the suggestion for a single action.
    ///
    /// Returns `Ok(None)` when the action has no enabled config for this
    /// project.
    pub async fn create_suggestion(
        &self,
        ctx: &AgentExecutionContext,
        decision: &Decision,
        action: &str,
    ) -> Result<Option<Suggestion>, OrchestrationError> {
        let Some(config) = enabled_action(&ctx.action_configs, action) else {
            return Ok(None);
        };

        let suggestion = self
            .store
            .create_suggestion(NewSuggestion {
                project_id: ctx.project_id,
                agent_slug: ctx.agent.slug.clone(),
                action_key: action.to_string(),
                context: suggestion_context(decision, action, config.risk_level.as_str()),
                approval_state: ApprovalState::initial(config.requires_approval),
            })
            .await?;
        Ok(Some(suggestion))
    }
}

fn suggestion_context(decision: &Decision, action: &str, risk: &str) -> Map<String, Value> {
    let mut context = decision.context.clone();
    context.insert("action_key".into(), json!(action));
    context.insert("reason".into(), json!(decision.reason));
    context.insert("confidence".into(), json!(decision.confidence));
    context.insert("risk_level".into(), json!(risk));
    context
}
