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

//! Developer agent: watches pull request and hotspot signals.

use super::{AgentDecider, Decision, DecisionThresholds, RuleSet};
use crate::context::AgentExecutionContext;

pub const ANALYZE_CODE: &str = "analyze_code";
pub const REVIEW_PRS: &str = "review_prs";
pub const SUGGEST_REFACTOR: &str = "suggest_refactor";

pub struct DeveloperRules;

impl AgentDecider for DeveloperRules {
    fn agent_slug(&self) -> &str {
        "developer"
    }

    fn decide(&self, ctx: &AgentExecutionContext, t: &DecisionThresholds) -> Decision {
        let mut rules = RuleSet::new(ctx, t);
        let Some(repo) = ctx.repository.as_ref() else {
            return rules.finish();
        };

        rules
            .strong(repo.prs_opened > t.developer_prs_opened, ANALYZE_CODE, || {
                format!("{} pull requests opened", repo.prs_opened)
            })
            .weak(
                repo.avg_pr_merge_hours
                    .is_some_and(|h| h > t.developer_slow_merge_hours),
                REVIEW_PRS,
                || {
                    format!(
                        "pull requests take {:.0}h to merge",
                        repo.avg_pr_merge_hours.unwrap_or_default()
                    )
                },
            )
            .weak(repo.hotspots.len() > t.developer_hotspots, SUGGEST_REFACTOR, || {
                format!("{} change hotspots", repo.hotspots.len())
            })
            .finish()
    }
}
