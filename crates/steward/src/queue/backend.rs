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

//! Storage substrate behind the job queue.
//!
//! A backend only stores and orders entries. Retry decisions, rate limiting
//! and worker scheduling live in [`JobQueue`](super::JobQueue).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::entry::{JobProcessResult, NewQueueEntry, QueueCounts, QueueEntry, QueueEntryState};
use crate::database::universal_types::UniversalUuid;
use crate::error::QueueError;

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn push(&self, entry: NewQueueEntry) -> Result<QueueEntry, QueueError>;

    /// Atomically claims the next due entry.
    ///
    /// Due entries are waiting or delayed with `run_at <= now`, ordered by
    /// priority descending then `run_at` ascending. The claimed entry becomes
    /// active and its attempt counter is incremented.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueEntry>, QueueError>;

    async fn complete(
        &self,
        id: UniversalUuid,
        result: JobProcessResult,
        at: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    /// Records a failed attempt. With `retry_at` the entry becomes delayed
    /// until then; without it the entry becomes failed.
    async fn fail(
        &self,
        id: UniversalUuid,
        error: String,
        retry_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError>;

    /// Points the entry at the Job record of its next attempt.
    async fn link_job(&self, id: UniversalUuid, job_id: UniversalUuid) -> Result<(), QueueError>;

    async fn get(&self, id: UniversalUuid) -> Result<Option<QueueEntry>, QueueError>;

    /// Entries in `state`, oldest first.
    async fn list(
        &self,
        state: QueueEntryState,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    /// Removes an entry regardless of state. Returns whether it existed.
    async fn remove(&self, id: UniversalUuid) -> Result<bool, QueueError>;

    /// Puts a failed entry back in line with a fresh attempt budget.
    async fn reset_for_retry(
        &self,
        id: UniversalUuid,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError>;

    /// Deletes entries in `state` that finished before `cutoff`.
    async fn delete_finished_before(
        &self,
        state: QueueEntryState,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, QueueError>;
}
