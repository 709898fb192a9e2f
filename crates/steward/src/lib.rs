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

//! # Steward
//!
//! Steward decides which autonomous project agents should run, when they run,
//! and what they are allowed to do. Agents are conservative: the baseline
//! outcome of every pass is "do nothing" unless concrete signals cross a
//! threshold.
//!
//! ## Components
//!
//! - [`eligibility`]: pure time/interval/cooldown gating of a schedule
//! - [`context`]: read-only snapshot assembly for one (project, agent) pair
//! - [`decision`]: per-agent rule sets mapping context to a [`decision::Decision`]
//! - [`executor`]: turns an accepted decision into durable suggestions
//! - [`coordinator`]: one full batch pass over a project's schedules
//! - [`queue`]: durable, retrying, rate-limited job queue in front of the coordinator
//!
//! Persistence goes through [`store::OrchestrationStore`]; the [`dal`] module
//! provides the SQLite implementation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use steward::{BatchCoordinator, Database, DAL, TriggerSource};
//!
//! let database = Database::new("steward.db", 4)?;
//! database.run_migrations().await?;
//! let store = Arc::new(DAL::new(database));
//!
//! let coordinator = BatchCoordinator::builder(store).build();
//! let result = coordinator
//!     .run_batch_orchestration(project_id, TriggerSource::Manual, None)
//!     .await?;
//! ```

pub mod agents;
pub mod analysis;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod dal;
pub mod database;
pub mod decision;
pub mod eligibility;
pub mod error;
pub mod executor;
pub mod logging;
pub mod models;
pub mod queue;
pub mod store;

pub use agents::{AgentRegistry, StaticAgentRegistry};
pub use analysis::{RepositoryAnalyzer, RepositoryMetricsSource, UnavailableMetricsSource};
pub use config::{ConfigLoader, CoordinatorConfig, QueueConfig, StewardConfig};
pub use context::{AgentExecutionContext, ContextBuilder};
pub use coordinator::{BatchCoordinator, BatchOrchestrationResult, BatchRequest};
pub use dal::{SqliteQueueBackend, DAL};
pub use database::universal_types::{UniversalTimestamp, UniversalUuid};
pub use database::Database;
pub use decision::{Decision, DecisionEngine, DecisionThresholds};
pub use eligibility::{evaluate_eligibility, is_eligible, Eligibility};
pub use error::{MetricsError, OrchestrationError, QueueError, StoreError};
pub use executor::TaskExecutor;
pub use logging::init_logging;
pub use models::job::{JobStatus, JobType, TriggerSource};
pub use queue::{EnqueueOptions, InMemoryQueueBackend, JobQueue, QueueBackend, QueueJobData};
pub use store::OrchestrationStore;
