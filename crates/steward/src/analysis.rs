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

//! # Repository Analysis
//!
//! Read-through cache in front of a [`RepositoryMetricsSource`].
//!
//! A lookup uses a cached analysis when it is not stale, has not expired and
//! its period start falls inside the requested window. Otherwise the source
//! is queried and the result is upserted with `expires_at = now + ttl`.
//! Concurrent refreshes of the same window resolve through the store's
//! upsert-on-conflict, last writer wins.
//!
//! A source with no integration configured answers `Ok(None)`. That absence
//! is expected and never surfaces as an error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::database::universal_types::UniversalUuid;
use crate::error::{MetricsError, OrchestrationError};
use crate::models::analysis::{AnalysisWindow, NewCachedAnalysis, PeriodType, RepositoryActivity};
use crate::models::project::ProjectSnapshot;
use crate::store::OrchestrationStore;

/// Supplier of repository activity metrics.
#[async_trait]
pub trait RepositoryMetricsSource: Send + Sync {
    /// Activity for `project` over `window`. `Ok(None)` means the project has
    /// no integration this source can read.
    async fn fetch_activity(
        &self,
        project: &ProjectSnapshot,
        window: &AnalysisWindow,
    ) -> Result<Option<RepositoryActivity>, MetricsError>;
}

/// Source used when no metrics integration is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableMetricsSource;

#[async_trait]
impl RepositoryMetricsSource for UnavailableMetricsSource {
    async fn fetch_activity(
        &self,
        _project: &ProjectSnapshot,
        _window: &AnalysisWindow,
    ) -> Result<Option<RepositoryActivity>, MetricsError> {
        Ok(None)
    }
}

pub struct RepositoryAnalyzer {
    store: Arc<dyn OrchestrationStore>,
    source: Arc<dyn RepositoryMetricsSource>,
    period: PeriodType,
    ttl: Duration,
}

impl RepositoryAnalyzer {
    pub fn new(
        store: Arc<dyn OrchestrationStore>,
        source: Arc<dyn RepositoryMetricsSource>,
        period: PeriodType,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            source,
            period,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1)),
        }
    }

    pub fn period(&self) -> PeriodType {
        self.period
    }

    /// Cached analysis for the window ending today, fetching on a miss.
    pub async fn get_analysis(
        &self,
        project_id: UniversalUuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RepositoryActivity>, OrchestrationError> {
        let window = AnalysisWindow::ending_at(self.period, now);
        if let Some(cached) = self
            .store
            .find_cached_analysis(project_id, &window, now)
            .await?
        {
            debug!(
                "Using cached {} analysis for project {} fetched at {}",
                self.period.as_str(),
                project_id,
                cached.fetched_at
            );
            metrics::counter!("steward_analysis_cache_total", "result" => "hit").increment(1);
            return Ok(Some(cached.activity));
        }

        metrics::counter!("steward_analysis_cache_total", "result" => "miss").increment(1);
        self.fetch_and_store(project_id, window, now).await
    }

    /// Queries the source regardless of what is cached.
    pub async fn refresh(
        &self,
        project_id: UniversalUuid,
        now: DateTime<Utc>,
    ) -> Result<Option<RepositoryActivity>, OrchestrationError> {
        let window = AnalysisWindow::ending_at(self.period, now);
        self.fetch_and_store(project_id, window, now).await
    }

    /// Flags every cached analysis for the project as stale, typically after
    /// a repository webhook.
    pub async fn mark_stale(&self, project_id: UniversalUuid) -> Result<usize, OrchestrationError> {
        let marked = self.store.mark_analyses_stale(project_id).await?;
        info!("Marked {} cached analyses stale for project {}", marked, project_id);
        Ok(marked)
    }

    async fn fetch_and_store(
        &self,
        project_id: UniversalUuid,
        window: AnalysisWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<RepositoryActivity>, OrchestrationError> {
        let Some(project) = self.store.get_project(project_id).await? else {
            debug!("Project {} not found, skipping analysis", project_id);
            return Ok(None);
        };
        if !project.has_repository() {
            debug!("Project {} has no repository integration", project_id);
            return Ok(None);
        }

        let activity = match self.source.fetch_activity(&project, &window).await {
            Ok(Some(activity)) => activity,
            Ok(None) => return Ok(None),
            Err(MetricsError::Unavailable(reason)) => {
                debug!("Repository metrics unavailable for {}: {}", project_id, reason);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        self.store
            .upsert_cached_analysis(NewCachedAnalysis {
                project_id,
                window,
                activity: activity.clone(),
                fetched_at: now,
                expires_at: now + self.ttl,
            })
            .await?;
        info!(
            "Fetched {} repository analysis for project {}",
            self.period.as_str(),
            project_id
        );
        Ok(Some(activity))
    }
}
