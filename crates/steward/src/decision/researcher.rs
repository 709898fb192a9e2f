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

//! Researcher agent: watches issue labels, new issue volume and how long it
//! has been since its last periodic digest.

use chrono::Duration;

use super::{AgentDecider, Decision, DecisionThresholds, RuleSet};
use crate::context::AgentExecutionContext;

pub const RESEARCH_TOPIC: &str = "research_topic";
pub const TRIAGE_ISSUES: &str = "triage_issues";
pub const PERIODIC_DIGEST: &str = "periodic_digest";

pub struct ResearcherRules;

impl AgentDecider for ResearcherRules {
    fn agent_slug(&self) -> &str {
        "researcher"
    }

    fn decide(&self, ctx: &AgentExecutionContext, t: &DecisionThresholds) -> Decision {
        let mut rules = RuleSet::new(ctx, t);

        if let Some(repo) = ctx.repository.as_ref() {
            let labeled = repo.label_total(&t.research_labels);
            rules
                .strong(labeled > t.researcher_labeled_issues, RESEARCH_TOPIC, || {
                    format!("{} issues labeled for research", labeled)
                })
                .weak(repo.issues_opened > t.researcher_new_issues, TRIAGE_ISSUES, || {
                    format!("{} new issues", repo.issues_opened)
                });
        }

        let period = Duration::days(t.researcher_periodic_days);
        let last_digest = ctx.last_action_at(PERIODIC_DIGEST);
        let digest_due = match last_digest {
            Some(last) => ctx.now - last >= period,
            None => true,
        };
        rules
            .weak(digest_due, PERIODIC_DIGEST, || match last_digest {
                Some(last) => format!("{} days since last digest", (ctx.now - last).num_days()),
                None => "no digest produced yet".to_string(),
            })
            .finish()
    }
}
