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

//! SEO agent: watches documentation-labeled changes.

use super::{AgentDecider, Decision, DecisionThresholds, RuleSet};
use crate::context::AgentExecutionContext;

pub const UPDATE_METADATA: &str = "update_metadata";
pub const AUDIT_CONTENT: &str = "audit_content";

pub struct SeoRules;

impl AgentDecider for SeoRules {
    fn agent_slug(&self) -> &str {
        "seo"
    }

    fn decide(&self, ctx: &AgentExecutionContext, t: &DecisionThresholds) -> Decision {
        let mut rules = RuleSet::new(ctx, t);
        let Some(repo) = ctx.repository.as_ref() else {
            return rules.finish();
        };

        let doc_changes = repo.label_total(&t.docs_labels);
        rules
            .weak(doc_changes > t.seo_doc_changes, UPDATE_METADATA, || {
                format!("{} documentation changes", doc_changes)
            })
            .strong(doc_changes > t.seo_doc_overhaul, AUDIT_CONTENT, || {
                format!("documentation overhaul ({} changes)", doc_changes)
            })
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::test_support::context;
    use crate::models::analysis::RepositoryActivity;

    #[test]
    fn test_doc_label_changes() {
        let mut activity = RepositoryActivity::default();
        activity.label_counts.insert("documentation".into(), 1);
        let ctx = context("seo", &[UPDATE_METADATA, AUDIT_CONTENT], Some(activity.clone()));
        let decision = SeoRules.decide(&ctx, &DecisionThresholds::default());
        assert_eq!(decision.suggested_actions, vec![UPDATE_METADATA]);

        activity.label_counts.insert("docs".into(), 4);
        let ctx = context("seo", &[UPDATE_METADATA, AUDIT_CONTENT], Some(activity));
        let decision = SeoRules.decide(&ctx, &DecisionThresholds::default());
        assert_eq!(decision.suggested_actions, vec![UPDATE_METADATA, AUDIT_CONTENT]);
    }

    #[test]
    fn test_unrelated_labels_ignored() {
        let mut activity = RepositoryActivity::default();
        activity.label_counts.insert("bug".into(), 30);
        let ctx = context("seo", &[UPDATE_METADATA], Some(activity));
        assert!(!SeoRules.decide(&ctx, &DecisionThresholds::default()).should_act);
    }
}
