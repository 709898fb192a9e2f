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


//! Shared setup for integration tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use steward::models::analysis::RepositoryActivity;
use steward::models::project::NewProject;
use steward::models::schedule::{AgentSchedule, NewAgentSchedule, ScheduleType};
use steward::{BatchCoordinator, CoordinatorConfig, Database, OrchestrationStore, UniversalUuid, DAL};
use steward_testing::{FixedMetricsSource, MemoryStore};

pub const REPOSITORY: &str = "acme/widgets";

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// A migrated SQLite database private to the calling test.
///
/// Shared-cache in-memory databases live as long as one connection is open,
/// so the pool holds a single connection for the lifetime of the DAL.
pub async fn sqlite_dal() -> Arc<DAL> {
    let url = format!("file:steward_{}?mode=memory&cache=shared", UniversalUuid::new_v4());
    let database = Database::new(&url, 1).expect("Failed to create database");
    database
        .run_migrations()
        .await
        .expect("Failed to run migrations");
    Arc::new(DAL::new(database))
}

pub async fn seed_sqlite_project(dal: &DAL, repository: Option<&str>) -> UniversalUuid {
    let id = UniversalUuid::new_v4();
    dal.projects()
        .upsert(NewProject {
            id,
            name: "widgets".to_string(),
            status: "active".to_string(),
            repository: repository.map(str::to_string),
        })
        .await
        .expect("Failed to seed project");
    id
}

/// In-memory store, a project with a repository and a metrics source.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<FixedMetricsSource>,
    pub project: UniversalUuid,
}

impl Harness {
    pub fn new(activity: Option<RepositoryActivity>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let project = store.add_project("widgets", Some(REPOSITORY));
        let metrics = Arc::new(match activity {
            Some(activity) => FixedMetricsSource::new(activity),
            None => FixedMetricsSource::empty(),
        });
        Self {
            store,
            metrics,
            project,
        }
    }

    pub fn coordinator(&self) -> BatchCoordinator {
        self.coordinator_with(CoordinatorConfig::default())
    }

    pub fn coordinator_with(&self, config: CoordinatorConfig) -> BatchCoordinator {
        BatchCoordinator::builder(self.store.clone())
            .metrics_source(self.metrics.clone())
            .config(config)
            .build()
    }

    /// Adds an enabled hourly schedule for `agent`.
    pub async fn schedule(&self, agent: &str, priority: i32) -> AgentSchedule {
        let mut new = NewAgentSchedule::new(self.project, agent, ScheduleType::Hourly);
        new.priority = priority;
        self.store
            .create_schedule(new)
            .await
            .expect("Failed to create schedule")
    }
}

/// Polls `check` until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
