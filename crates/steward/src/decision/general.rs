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

//! General agent: a single housekeeping action, available whenever the
//! project has been quiet.

use super::{AgentDecider, Decision, DecisionThresholds, RuleSet};
use crate::context::AgentExecutionContext;

pub const HOUSEKEEPING: &str = "housekeeping";

pub struct GeneralRules;

impl AgentDecider for GeneralRules {
    fn agent_slug(&self) -> &str {
        "general"
    }

    fn decide(&self, ctx: &AgentExecutionContext, t: &DecisionThresholds) -> Decision {
        let recent = ctx.recent_activity.suggestions;
        RuleSet::new(ctx, t)
            .weak(recent <= t.general_quiet_suggestions, HOUSEKEEPING, || {
                "project quiet, housekeeping due".to_string()
            })
            .finish()
    }
}
