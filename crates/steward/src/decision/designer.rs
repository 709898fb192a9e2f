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

//! Designer agent: watches UI/UX-labeled changes.

use super::{AgentDecider, Decision, DecisionThresholds, RuleSet};
use crate::context::AgentExecutionContext;

pub const REVIEW_UI: &str = "review_ui";
pub const DESIGN_AUDIT: &str = "design_audit";

pub struct DesignerRules;

impl AgentDecider for DesignerRules {
    fn agent_slug(&self) -> &str {
        "designer"
    }

    fn decide(&self, ctx: &AgentExecutionContext, t: &DecisionThresholds) -> Decision {
        let mut rules = RuleSet::new(ctx, t);
        let Some(repo) = ctx.repository.as_ref() else {
            return rules.finish();
        };

        let ui_changes = repo.label_total(&t.design_labels);
        rules
            .weak(ui_changes > t.designer_ui_changes, REVIEW_UI, || {
                format!("{} UI/UX changes", ui_changes)
            })
            .strong(ui_changes > t.designer_ui_overhaul, DESIGN_AUDIT, || {
                format!("interface churn ({} changes)", ui_changes)
            })
            .finish()
    }
}
