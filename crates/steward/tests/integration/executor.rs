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

use std::sync::Arc;

use chrono::Utc;
use serde_json::Map;
use steward::models::agent::AgentConfig;
use steward::models::suggestion::ApprovalState;
use steward::{AgentExecutionContext, Decision, OrchestrationStore, TaskExecutor, UniversalUuid};
use steward_testing::{FailurePoint, MemoryStore};

async fn context_for(store: &MemoryStore, project: UniversalUuid, agent: &str) -> AgentExecutionContext {
    let configs = store
        .list_action_configs(project, agent)
        .await
        .expect("Failed to list action configs");
    AgentExecutionContext::new(project, AgentConfig::new(agent, agent), Utc::now())
        .with_action_configs(configs)
}

fn acting(actions: &[&str]) -> Decision {
    Decision {
        should_act: true,
        reason: "signals fired".to_string(),
        confidence: 0.7,
        suggested_actions: actions.iter().map(|a| a.to_string()).collect(),
        context: Map::new(),
    }
}

#[tokio::test]
async fn test_one_failed_insert_does_not_stop_the_rest() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", None);
    store.enable_actions(project, "designer", &["review_ui", "design_audit"]);
    store.fail_on(FailurePoint::CreateSuggestionFor("review_ui".into()));
    let ctx = context_for(&store, project, "designer").await;

    let outcome = TaskExecutor::new(store.clone())
        .execute(&ctx, &acting(&["review_ui", "design_audit"]))
        .await;

    assert_eq!(outcome.actions_proposed, 2);
    assert_eq!(outcome.actions_executed, 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].0, "review_ui");
    assert_eq!(outcome.created_suggestion_ids.len(), 1);

    let stored = store.suggestions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].action_key, "design_audit");
    assert_eq!(stored[0].id, outcome.created_suggestion_ids[0]);
}

#[tokio::test]
async fn test_approval_requirement_sets_initial_state() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", None);
    store.set_action_config(project, "marketer", "draft_announcement", true, true);
    store.set_action_config(project, "marketer", "draft_release_notes", true, false);
    let ctx = context_for(&store, project, "marketer").await;

    let outcome = TaskExecutor::new(store.clone())
        .execute(&ctx, &acting(&["draft_release_notes", "draft_announcement"]))
        .await;

    assert_eq!(outcome.actions_executed, 2);
    assert_eq!(outcome.actions_approved, 1);

    let stored = store.suggestions();
    let announcement = stored
        .iter()
        .find(|s| s.action_key == "draft_announcement")
        .unwrap();
    assert_eq!(announcement.approval_state, ApprovalState::Pending);
    let notes = stored
        .iter()
        .find(|s| s.action_key == "draft_release_notes")
        .unwrap();
    assert_eq!(notes.approval_state, ApprovalState::AutoApproved);
    assert_eq!(notes.context["reason"], "signals fired");
    assert_eq!(notes.context["action_key"], "draft_release_notes");
}

#[tokio::test]
async fn test_disabled_action_is_skipped_silently() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", None);
    store.set_action_config(project, "seo", "update_metadata", false, false);
    store.enable_actions(project, "seo", &["audit_content"]);
    let ctx = context_for(&store, project, "seo").await;

    let executor = TaskExecutor::new(store.clone());
    let outcome = executor
        .execute(&ctx, &acting(&["update_metadata", "audit_content"]))
        .await;

    assert_eq!(outcome.actions_proposed, 2);
    assert_eq!(outcome.actions_executed, 1);
    assert!(!outcome.has_failures());

    let skipped = executor
        .create_suggestion(&ctx, &acting(&["update_metadata"]), "update_metadata")
        .await
        .unwrap();
    assert!(skipped.is_none());
}
