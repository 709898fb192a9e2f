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

//! Marketer agent: watches merge volume.

use super::{AgentDecider, Decision, DecisionThresholds, RuleSet};
use crate::context::AgentExecutionContext;

pub const DRAFT_RELEASE_NOTES: &str = "draft_release_notes";
pub const DRAFT_ANNOUNCEMENT: &str = "draft_announcement";

pub struct MarketerRules;

impl AgentDecider for MarketerRules {
    fn agent_slug(&self) -> &str {
        "marketer"
    }

    fn decide(&self, ctx: &AgentExecutionContext, t: &DecisionThresholds) -> Decision {
        let mut rules = RuleSet::new(ctx, t);
        let Some(repo) = ctx.repository.as_ref() else {
            return rules.finish();
        };

        rules
            .strong(repo.prs_merged > t.marketer_merged_prs, DRAFT_RELEASE_NOTES, || {
                format!("{} pull requests merged", repo.prs_merged)
            })
            .weak(repo.prs_merged > t.marketer_launch_merges, DRAFT_ANNOUNCEMENT, || {
                format!("{} merges is launch-sized", repo.prs_merged)
            })
            .finish()
    }
}
