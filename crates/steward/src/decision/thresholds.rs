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

use serde::{Deserialize, Serialize};

/// Every tunable number the agent rule sets compare against.
///
/// Count thresholds are exclusive: a rule with threshold 3 fires at 4.
/// Loaded from the `[decision]` section of the configuration file; missing
/// keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionThresholds {
    /// Starting confidence once any rule fires.
    pub base_confidence: f64,
    /// Confidence reported when no rule produced an action.
    pub idle_confidence: f64,
    pub strong_signal_increment: f64,
    pub weak_signal_increment: f64,

    /// Suggestions in the lookback window at which every agent stands down.
    pub max_recent_suggestions: u32,

    pub developer_prs_opened: u32,
    pub developer_hotspots: usize,
    pub developer_slow_merge_hours: f64,

    pub researcher_labeled_issues: u32,
    pub researcher_new_issues: u32,
    pub researcher_periodic_days: i64,
    pub research_labels: Vec<String>,

    pub marketer_merged_prs: u32,
    pub marketer_launch_merges: u32,

    pub seo_doc_changes: u32,
    pub seo_doc_overhaul: u32,
    pub docs_labels: Vec<String>,

    pub designer_ui_changes: u32,
    pub designer_ui_overhaul: u32,
    pub design_labels: Vec<String>,

    /// The general agent tidies up only while suggestions stay at or below
    /// this count.
    pub general_quiet_suggestions: u32,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            base_confidence: 0.4,
            idle_confidence: 0.8,
            strong_signal_increment: 0.3,
            weak_signal_increment: 0.15,
            max_recent_suggestions: 10,
            developer_prs_opened: 3,
            developer_hotspots: 2,
            developer_slow_merge_hours: 48.0,
            researcher_labeled_issues: 2,
            researcher_new_issues: 5,
            researcher_periodic_days: 7,
            research_labels: labels(&["question", "research", "investigation"]),
            marketer_merged_prs: 5,
            marketer_launch_merges: 15,
            seo_doc_changes: 0,
            seo_doc_overhaul: 4,
            docs_labels: labels(&["documentation", "docs"]),
            designer_ui_changes: 0,
            designer_ui_overhaul: 4,
            design_labels: labels(&["ui", "ux", "design"]),
            general_quiet_suggestions: 0,
        }
    }
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl DecisionThresholds {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("base_confidence", self.base_confidence),
            ("idle_confidence", self.idle_confidence),
            ("strong_signal_increment", self.strong_signal_increment),
            ("weak_signal_increment", self.weak_signal_increment),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("decision {} must be within [0, 1], got {}", name, value));
            }
        }
        for (name, set) in [
            ("research_labels", &self.research_labels),
            ("docs_labels", &self.docs_labels),
            ("design_labels", &self.design_labels),
        ] {
            if set.is_empty() {
                return Err(format!("decision {} must not be empty", name));
            }
        }
        if self.researcher_periodic_days < 0 {
            return Err("decision researcher_periodic_days must not be negative".to_string());
        }
        Ok(())
    }
}
