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
use std::time::Duration;

use serde_json::Map;
use steward::models::agent::AgentConfig;
use steward::models::suggestion::{ApprovalState, NewSuggestion};
use steward::{ContextBuilder, OrchestrationStore};
use steward_testing::{ActivityBuilder, FailurePoint, MemoryStore};

use crate::fixtures::{at, REPOSITORY};

fn suggestion(project: steward::UniversalUuid, agent: &str) -> NewSuggestion {
    suggestion_for(project, agent, "housekeeping")
}

fn suggestion_for(project: steward::UniversalUuid, agent: &str, action: &str) -> NewSuggestion {
    NewSuggestion {
        project_id: project,
        agent_slug: agent.to_string(),
        action_key: action.to_string(),
        context: Map::new(),
        approval_state: ApprovalState::AutoApproved,
    }
}

#[tokio::test]
async fn test_recent_activity_respects_lookback() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", Some(REPOSITORY));
    let now = at(2025, 6, 10, 12, 0);

    store.add_suggestion_at(suggestion(project, "general"), at(2025, 6, 10, 2, 0));
    store.add_suggestion_at(suggestion(project, "general"), at(2025, 6, 8, 12, 0));
    store.add_task(project, at(2025, 6, 10, 11, 0));
    store.add_task(project, at(2025, 6, 1, 11, 0));

    let builder = ContextBuilder::new(store.clone(), Duration::from_secs(24 * 60 * 60));
    let ctx = builder
        .build(project, &AgentConfig::new("general", "General"), None, Vec::new(), now)
        .await
        .expect("Failed to build context");

    assert_eq!(ctx.recent_activity.suggestions, 1);
    assert_eq!(ctx.recent_activity.tasks, 1);
    assert_eq!(ctx.last_suggestion_at(), Some(at(2025, 6, 10, 2, 0)));
    assert!(ctx.has_repository());
    assert_eq!(ctx.now, now);
}

#[tokio::test]
async fn test_last_suggestion_is_per_agent() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", None);
    store.add_suggestion_at(suggestion(project, "marketer"), at(2025, 6, 9, 8, 0));

    let ctx = ContextBuilder::new(store.clone(), Duration::from_secs(3600))
        .build(
            project,
            &AgentConfig::new("seo", "SEO"),
            None,
            Vec::new(),
            at(2025, 6, 10, 12, 0),
        )
        .await
        .unwrap();

    assert!(ctx.last_suggestion_at().is_none());
    assert!(!ctx.has_repository());
}

#[tokio::test]
async fn test_last_suggestion_is_tracked_per_action() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", None);
    store.add_suggestion_at(
        suggestion_for(project, "researcher", "periodic_digest"),
        at(2025, 6, 1, 9, 0),
    );
    store.add_suggestion_at(
        suggestion_for(project, "researcher", "periodic_digest"),
        at(2025, 6, 3, 9, 0),
    );
    store.add_suggestion_at(
        suggestion_for(project, "researcher", "research_topic"),
        at(2025, 6, 9, 9, 0),
    );

    let ctx = ContextBuilder::new(store.clone(), Duration::from_secs(3600))
        .build(
            project,
            &AgentConfig::new("researcher", "Researcher"),
            None,
            Vec::new(),
            at(2025, 6, 10, 12, 0),
        )
        .await
        .unwrap();

    assert_eq!(ctx.last_action_at("periodic_digest"), Some(at(2025, 6, 3, 9, 0)));
    assert_eq!(ctx.last_action_at("research_topic"), Some(at(2025, 6, 9, 9, 0)));
    assert_eq!(ctx.last_action_at("triage_issues"), None);
    assert_eq!(ctx.last_suggestion_at(), Some(at(2025, 6, 9, 9, 0)));
}

#[tokio::test]
async fn test_missing_project_is_tolerated() {
    let store = Arc::new(MemoryStore::new());
    let project = steward::UniversalUuid::new_v4();

    let ctx = ContextBuilder::new(store, Duration::from_secs(3600))
        .build(
            project,
            &AgentConfig::new("general", "General"),
            None,
            Vec::new(),
            at(2025, 6, 10, 12, 0),
        )
        .await
        .expect("A missing project is not an error");

    assert!(ctx.project.is_none());
    assert_eq!(ctx.summary()["project_name"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_shared_analysis_lands_in_summary_and_external_data() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", Some(REPOSITORY));
    store.enable_actions(project, "developer", &["review_prs", "analyze_code"]);
    let configs = store.list_action_configs(project, "developer").await.unwrap();
    let activity = ActivityBuilder::new().commits(9).prs_opened(4).hotspots(&["src/lib.rs"]).build();

    let ctx = ContextBuilder::new(store.clone(), Duration::from_secs(3600))
        .build(
            project,
            &AgentConfig::new("developer", "Developer"),
            Some(&activity),
            configs,
            at(2025, 6, 10, 12, 0),
        )
        .await
        .unwrap();

    let summary = ctx.summary();
    assert_eq!(summary["project_name"], "widgets");
    assert_eq!(summary["repository"]["prs_opened"], 4);
    assert_eq!(
        summary["enabled_actions"],
        serde_json::json!(["analyze_code", "review_prs"])
    );
    let external = ctx.external_data().unwrap();
    assert_eq!(external["hotspots"][0], "src/lib.rs");
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", None);
    store.fail_on(FailurePoint::CountRecentActivity);

    let err = ContextBuilder::new(store, Duration::from_secs(3600))
        .build(
            project,
            &AgentConfig::new("general", "General"),
            None,
            Vec::new(),
            at(2025, 6, 10, 12, 0),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
}
