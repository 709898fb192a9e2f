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

//! # Decision Engine
//!
//! Maps an [`AgentExecutionContext`] to a [`Decision`]. The default answer is
//! always "do nothing"; an agent acts only when one of its rules fires *and*
//! the action that rule proposes is enabled for the project.
//!
//! Every decision passes three gates before any agent rule runs:
//!
//! 1. no enabled actions for the agent: do nothing, confidence 1.0
//! 2. no rule set registered for the agent slug: do nothing, confidence 1.0
//! 3. the project already received `max_recent_suggestions` suggestions in
//!    the lookback window: do nothing
//!
//! Rule sets implement [`AgentDecider`] and are registered by slug, so adding
//! an agent type never touches the engine itself. Everything here is pure:
//! the same context and thresholds always yield the same decision.

mod designer;
mod developer;
mod general;
mod marketer;
mod researcher;
mod seo;
mod thresholds;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::context::AgentExecutionContext;

pub use designer::DesignerRules;
pub use developer::DeveloperRules;
pub use general::GeneralRules;
pub use marketer::MarketerRules;
pub use researcher::ResearcherRules;
pub use seo::SeoRules;
pub use thresholds::DecisionThresholds;

/// Reason recorded when an agent has no enabled actions.
pub const NO_ACTIONS_ENABLED: &str = "no actions enabled";

/// Outcome of one decision. Not persisted directly; it is summarized into
/// the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub should_act: bool,
    pub reason: String,
    /// Within `[0, 1]`.
    pub confidence: f64,
    pub suggested_actions: Vec<String>,
    pub context: Map<String, Value>,
}

impl Decision {
    pub fn do_nothing(reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            should_act: false,
            reason: reason.into(),
            confidence: confidence.clamp(0.0, 1.0),
            suggested_actions: Vec::new(),
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// One agent type's rule set.
pub trait AgentDecider: Send + Sync {
    /// Slug of the agent these rules belong to.
    fn agent_slug(&self) -> &str;

    fn decide(&self, ctx: &AgentExecutionContext, thresholds: &DecisionThresholds) -> Decision;
}

/// Accumulates fired rules into a decision.
///
/// A fired rule whose action is not enabled is remembered as a signal but
/// neither proposes the action nor raises confidence.
pub struct RuleSet<'a> {
    ctx: &'a AgentExecutionContext,
    thresholds: &'a DecisionThresholds,
    confidence: f64,
    actions: Vec<String>,
    reasons: Vec<String>,
    disabled: Vec<String>,
}

impl<'a> RuleSet<'a> {
    pub fn new(ctx: &'a AgentExecutionContext, thresholds: &'a DecisionThresholds) -> Self {
        Self {
            ctx,
            thresholds,
            confidence: thresholds.base_confidence,
            actions: Vec::new(),
            reasons: Vec::new(),
            disabled: Vec::new(),
        }
    }

    /// Applies one rule. `reason` is only evaluated when the rule fires.
    pub fn rule(
        &mut self,
        fired: bool,
        action: &str,
        increment: f64,
        reason: impl FnOnce() -> String,
    ) -> &mut Self {
        if !fired {
            return self;
        }
        if !self.ctx.is_action_enabled(action) {
            self.disabled.push(action.to_string());
            return self;
        }
        if !self.actions.iter().any(|a| a == action) {
            self.actions.push(action.to_string());
        }
        self.confidence = (self.confidence + increment).clamp(0.0, 1.0);
        self.reasons.push(reason());
        self
    }

    pub fn strong(&mut self, fired: bool, action: &str, reason: impl FnOnce() -> String) -> &mut Self {
        let increment = self.thresholds.strong_signal_increment;
        self.rule(fired, action, increment, reason)
    }

    pub fn weak(&mut self, fired: bool, action: &str, reason: impl FnOnce() -> String) -> &mut Self {
        let increment = self.thresholds.weak_signal_increment;
        self.rule(fired, action, increment, reason)
    }

    pub fn finish(&mut self) -> Decision {
        let agent = self.ctx.agent_slug().to_string();
        if self.actions.is_empty() {
            let reason = if self.disabled.is_empty() {
                "no signals crossed thresholds".to_string()
            } else {
                format!("signals fired for disabled actions: {}", self.disabled.join(", "))
            };
            return Decision::do_nothing(reason, self.thresholds.idle_confidence)
                .with_context("agent", json!(agent))
                .with_context("disabled_actions", json!(self.disabled));
        }

        Decision {
            should_act: true,
            reason: self.reasons.join("; "),
            confidence: self.confidence,
            suggested_actions: self.actions.clone(),
            context: Map::new(),
        }
        .with_context("agent", json!(agent))
        .with_context("signals", json!(self.reasons))
        .with_context("disabled_actions", json!(self.disabled))
    }
}

/// Registry of agent rule sets plus the gates every decision passes.
#[derive(Clone)]
pub struct DecisionEngine {
    deciders: HashMap<String, Arc<dyn AgentDecider>>,
    thresholds: DecisionThresholds,
}

impl DecisionEngine {
    /// Engine with the built-in agents registered.
    pub fn new(thresholds: DecisionThresholds) -> Self {
        let mut engine = Self::empty(thresholds);
        engine.register(Arc::new(DeveloperRules));
        engine.register(Arc::new(ResearcherRules));
        engine.register(Arc::new(MarketerRules));
        engine.register(Arc::new(SeoRules));
        engine.register(Arc::new(DesignerRules));
        engine.register(Arc::new(GeneralRules));
        engine
    }

    /// Engine with no agents registered.
    pub fn empty(thresholds: DecisionThresholds) -> Self {
        Self {
            deciders: HashMap::new(),
            thresholds,
        }
    }

    /// Registers a rule set, replacing any previous one for the same slug.
    pub fn register(&mut self, decider: Arc<dyn AgentDecider>) -> Option<Arc<dyn AgentDecider>> {
        self.deciders
            .insert(decider.agent_slug().to_string(), decider)
    }

    pub fn has_rules_for(&self, agent_slug: &str) -> bool {
        self.deciders.contains_key(agent_slug)
    }

    pub fn registered_agents(&self) -> Vec<&str> {
        let mut slugs: Vec<&str> = self.deciders.keys().map(String::as_str).collect();
        slugs.sort_unstable();
        slugs
    }

    pub fn thresholds(&self) -> &DecisionThresholds {
        &self.thresholds
    }

    pub fn decide(&self, agent_slug: &str, ctx: &AgentExecutionContext) -> Decision {
        if ctx.enabled_actions().is_empty() {
            return Decision::do_nothing(NO_ACTIONS_ENABLED, 1.0)
                .with_context("agent", json!(agent_slug));
        }

        let Some(decider) = self.deciders.get(agent_slug) else {
            return Decision::do_nothing(format!("unknown agent type '{}'", agent_slug), 1.0)
                .with_context("agent", json!(agent_slug));
        };

        let recent = ctx.recent_activity.suggestions;
        if recent >= self.thresholds.max_recent_suggestions {
            return Decision::do_nothing(
                format!(
                    "recent suggestion volume ({} >= {})",
                    recent, self.thresholds.max_recent_suggestions
                ),
                self.thresholds.idle_confidence,
            )
            .with_context("agent", json!(agent_slug));
        }

        decider.decide(ctx, &self.thresholds)
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(DecisionThresholds::default())
    }
}
