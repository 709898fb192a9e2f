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

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use steward::error::MetricsError;
use steward::models::analysis::{AnalysisWindow, RepositoryActivity};
use steward::models::project::ProjectSnapshot;
use steward::RepositoryMetricsSource;

/// Metrics source answering every request with the same activity.
#[derive(Debug, Default)]
pub struct FixedMetricsSource {
    activity: Mutex<Option<RepositoryActivity>>,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FixedMetricsSource {
    pub fn new(activity: RepositoryActivity) -> Self {
        Self {
            activity: Mutex::new(Some(activity)),
            ..Default::default()
        }
    }

    /// A source with nothing to report.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set_activity(&self, activity: Option<RepositoryActivity>) {
        *self.activity.lock() = activity;
    }

    /// Makes every subsequent request fail with `RequestFailed`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryMetricsSource for FixedMetricsSource {
    async fn fetch_activity(
        &self,
        _project: &ProjectSnapshot,
        _window: &AnalysisWindow,
    ) -> Result<Option<RepositoryActivity>, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.lock().clone() {
            return Err(MetricsError::RequestFailed(message));
        }
        Ok(self.activity.lock().clone())
    }
}
