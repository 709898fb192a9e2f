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

//! # steward-testing
//!
//! Test doubles for exercising steward without a database.
//!
//! - [`MemoryStore`]: an [`OrchestrationStore`](steward::OrchestrationStore)
//!   held in process memory, with seeding helpers and injectable failures.
//! - [`FixedMetricsSource`]: a metrics source that returns canned activity and
//!   counts how often it was asked.
//! - [`ActivityBuilder`]: terse construction of repository activity.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use steward::{BatchCoordinator, TriggerSource};
//! use steward_testing::{FailurePoint, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let project = store.add_project("demo", None);
//! store.fail_on(FailurePoint::ListSchedules);
//!
//! let coordinator = BatchCoordinator::builder(store.clone()).build();
//! let err = coordinator
//!     .run_batch_orchestration(project, TriggerSource::Manual, None)
//!     .await
//!     .unwrap_err();
//! ```

mod activity;
mod metrics_source;
mod store;

pub use activity::ActivityBuilder;
pub use metrics_source::FixedMetricsSource;
pub use store::{FailurePoint, MemoryStore};
