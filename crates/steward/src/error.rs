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

//! Error types for the orchestration core.
//!
//! Each layer owns one error enum. Lower layers convert into higher ones via
//! `From`, so `?` carries a store failure up through the context builder and
//! into the coordinator without losing the original message.

use thiserror::Error;

/// Errors raised by an [`OrchestrationStore`](crate::store::OrchestrationStore)
/// implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record in {table}: {message}")]
    CorruptRecord { table: &'static str, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid status transition from '{from}' to '{to}'")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str, message: impl std::fmt::Display) -> Self {
        StoreError::CorruptRecord {
            table,
            message: message.to_string(),
        }
    }
}

/// Errors raised by a repository metrics source.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// No credentials or integration configured. Callers treat this as absence.
    #[error("Repository metrics unavailable: {0}")]
    Unavailable(String),

    #[error("Repository metrics request failed: {0}")]
    RequestFailed(String),

    #[error("Repository metrics rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Errors raised while running a batch or one of its schedules.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    /// Stable code persisted on failed job records.
    pub fn error_code(&self) -> &'static str {
        match self {
            OrchestrationError::Store(StoreError::Unavailable(_))
            | OrchestrationError::Store(StoreError::ConnectionPool(_)) => "STORE_UNAVAILABLE",
            OrchestrationError::Store(_) => "STORE_ERROR",
            OrchestrationError::Metrics(_) => "METRICS_ERROR",
            OrchestrationError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            OrchestrationError::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            OrchestrationError::Verification(_) => "VERIFICATION_FAILED",
            OrchestrationError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Errors raised by the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue substrate unavailable: {0}")]
    Unavailable(String),

    #[error("Queue entry not found: {0}")]
    NotFound(String),

    #[error("Queue entry {id} is {state} and cannot be {action}")]
    InvalidState {
        id: String,
        state: String,
        action: &'static str,
    },

    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),
}
