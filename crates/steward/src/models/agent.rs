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

//! Agent metadata and per-project action configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::universal_types::UniversalUuid;

/// How much an agent may do without a human in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Only ever proposes.
    Suggest,
    /// May act on low-risk actions.
    Assisted,
    Autonomous,
}

/// Static description of an agent type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub autonomy: AutonomyLevel,
    /// Action keys this agent can propose.
    pub actions: Vec<String>,
}

impl AgentConfig {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            description: String::new(),
            capabilities: Vec::new(),
            autonomy: AutonomyLevel::Suggest,
            actions: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_actions(mut self, actions: &[&str]) -> Self {
        self.actions = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_autonomy(mut self, autonomy: AutonomyLevel) -> Self {
        self.autonomy = autonomy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// Per-project enablement of one agent action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub id: UniversalUuid,
    pub project_id: UniversalUuid,
    pub agent_slug: String,
    pub action_key: String,
    pub is_enabled: bool,
    pub requires_approval: bool,
    pub risk_level: RiskLevel,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload for an action config, keyed by (project, agent, action).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActionConfig {
    pub project_id: UniversalUuid,
    pub agent_slug: String,
    pub action_key: String,
    pub is_enabled: bool,
    pub requires_approval: bool,
    pub risk_level: RiskLevel,
}

/// Finds the enabled config for `action_key`, if any.
pub fn enabled_action<'a>(configs: &'a [ActionConfig], action_key: &str) -> Option<&'a ActionConfig> {
    configs
        .iter()
        .find(|c| c.action_key == action_key && c.is_enabled)
}
