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

use steward::models::analysis::RepositoryActivity;

/// Builder for [`RepositoryActivity`] with every metric at zero.
#[derive(Debug, Clone, Default)]
pub struct ActivityBuilder {
    activity: RepositoryActivity,
}

impl ActivityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(mut self, n: u32) -> Self {
        self.activity.commits = n;
        self
    }

    pub fn prs_opened(mut self, n: u32) -> Self {
        self.activity.prs_opened = n;
        self
    }

    pub fn prs_merged(mut self, n: u32) -> Self {
        self.activity.prs_merged = n;
        self
    }

    pub fn issues_opened(mut self, n: u32) -> Self {
        self.activity.issues_opened = n;
        self
    }

    pub fn label(mut self, name: &str, count: u32) -> Self {
        self.activity.label_counts.insert(name.to_string(), count);
        self
    }

    pub fn hotspots(mut self, paths: &[&str]) -> Self {
        self.activity.hotspots = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn avg_pr_merge_hours(mut self, hours: f64) -> Self {
        self.activity.avg_pr_merge_hours = Some(hours);
        self
    }

    pub fn build(self) -> RepositoryActivity {
        self.activity
    }
}
