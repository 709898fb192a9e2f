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

//! # Agent Registry
//!
//! Supplies capability and autonomy metadata for agent slugs. A schedule whose
//! agent is not registered is skipped by the coordinator, never failed.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::models::agent::{AgentConfig, AutonomyLevel};

/// Source of agent definitions.
pub trait AgentRegistry: Send + Sync {
    fn get_agent(&self, slug: &str) -> Option<AgentConfig>;

    /// Every registered agent, ordered by slug.
    fn get_agents(&self) -> Vec<AgentConfig>;
}

/// In-process registry seeded with the built-in agents.
#[derive(Debug)]
pub struct StaticAgentRegistry {
    agents: RwLock<HashMap<String, AgentConfig>>,
}

impl StaticAgentRegistry {
    /// Registry holding the six built-in agents.
    pub fn new() -> Self {
        let registry = Self::empty();
        for agent in builtin_agents() {
            registry.register(agent);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Adds or replaces an agent definition.
    pub fn register(&self, agent: AgentConfig) {
        tracing::debug!("Registered agent: {}", agent.slug);
        self.agents.write().insert(agent.slug.clone(), agent);
    }

    pub fn unregister(&self, slug: &str) -> Option<AgentConfig> {
        self.agents.write().remove(slug)
    }
}

impl Default for StaticAgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry for StaticAgentRegistry {
    fn get_agent(&self, slug: &str) -> Option<AgentConfig> {
        self.agents.read().get(slug).cloned()
    }

    fn get_agents(&self) -> Vec<AgentConfig> {
        let mut agents: Vec<AgentConfig> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| a.slug.cmp(&b.slug));
        agents
    }
}

fn builtin_agents() -> Vec<AgentConfig> {
    vec![
        AgentConfig::new("developer", "Developer")
            .with_description("Reviews pull request flow and code hotspots")
            .with_capabilities(&["code_analysis", "pull_requests"])
            .with_actions(&["analyze_code", "review_prs", "suggest_refactor"])
            .with_autonomy(AutonomyLevel::Assisted),
        AgentConfig::new("researcher", "Researcher")
            .with_description("Follows open questions and produces periodic digests")
            .with_capabilities(&["issues", "research"])
            .with_actions(&["research_topic", "triage_issues", "periodic_digest"]),
        AgentConfig::new("marketer", "Marketer")
            .with_description("Turns shipped work into release notes and announcements")
            .with_capabilities(&["content"])
            .with_actions(&["draft_release_notes", "draft_announcement"]),
        AgentConfig::new("seo", "SEO")
            .with_description("Keeps documentation discoverable")
            .with_capabilities(&["content", "documentation"])
            .with_actions(&["update_metadata", "audit_content"]),
        AgentConfig::new("designer", "Designer")
            .with_description("Watches interface changes for consistency")
            .with_capabilities(&["design"])
            .with_actions(&["review_ui", "design_audit"]),
        AgentConfig::new("general", "General")
            .with_description("Light housekeeping for quiet projects")
            .with_actions(&["housekeeping"])
            .with_autonomy(AutonomyLevel::Autonomous),
    ]
}
