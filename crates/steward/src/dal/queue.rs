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

//! Durable queue backend on the `queue_entries` table.
//!
//! Claiming runs in an immediate transaction: the write lock is taken before
//! the candidate row is read, so two workers (in this process or another)
//! can never claim the same entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::models::{ts, uuid_to_blob, SqliteQueueEntry};
use super::DAL;
use crate::database::schema::queue_entries;
use crate::database::universal_types::UniversalUuid;
use crate::error::{QueueError, StoreError};
use crate::queue::QueueBackend;
use crate::queue::{JobProcessResult, NewQueueEntry, QueueCounts, QueueEntry, QueueEntryState};

const PENDING_STATES: [&str; 2] = ["waiting", "delayed"];

#[derive(Clone, Debug)]
pub struct SqliteQueueBackend {
    dal: DAL,
}

impl SqliteQueueBackend {
    pub fn new(dal: DAL) -> Self {
        Self { dal }
    }

    fn pool_error(e: impl std::fmt::Display) -> QueueError {
        QueueError::Store(StoreError::ConnectionPool(e.to_string()))
    }

    fn not_found(id: UniversalUuid) -> QueueError {
        QueueError::NotFound(id.to_string())
    }
}

fn load(conn: &mut SqliteConnection, id_blob: &[u8]) -> Result<Option<SqliteQueueEntry>, diesel::result::Error> {
    queue_entries::table
        .filter(queue_entries::id.eq(id_blob))
        .first(conn)
        .optional()
}

#[async_trait]
impl QueueBackend for SqliteQueueBackend {
    async fn push(&self, entry: NewQueueEntry) -> Result<QueueEntry, QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let now = ts(&Utc::now());
        let row = SqliteQueueEntry {
            id: uuid_to_blob(&UniversalUuid::new_v4()),
            job_type: entry.data.job_type.as_str().to_string(),
            payload: serde_json::to_string(&entry.data).map_err(StoreError::from)?,
            priority: entry.priority,
            state: entry.state.as_str().to_string(),
            attempts_made: 0,
            max_attempts: entry.max_attempts,
            run_at: ts(&entry.run_at),
            orchestration_job_id: entry.orchestration_job_id.as_ref().map(uuid_to_blob),
            last_error: None,
            result: None,
            created_at: now.clone(),
            started_at: None,
            finished_at: None,
            updated_at: now,
        };

        let stored: SqliteQueueEntry = conn
            .interact(move |conn| {
                diesel::insert_into(queue_entries::table)
                    .values(&row)
                    .execute(conn)?;
                queue_entries::table
                    .filter(queue_entries::id.eq(&row.id))
                    .first(conn)
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        Ok(stored.try_into()?)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueEntry>, QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let now = ts(&now);

        let claimed: Option<SqliteQueueEntry> = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let candidate: Option<Vec<u8>> = queue_entries::table
                        .filter(queue_entries::state.eq_any(PENDING_STATES))
                        .filter(queue_entries::run_at.le(&now))
                        .order((queue_entries::priority.desc(), queue_entries::run_at.asc()))
                        .select(queue_entries::id)
                        .first(conn)
                        .optional()?;

                    let Some(id) = candidate else {
                        return Ok(None);
                    };

                    diesel::update(queue_entries::table.filter(queue_entries::id.eq(&id)))
                        .set((
                            queue_entries::state.eq(QueueEntryState::Active.as_str()),
                            queue_entries::attempts_made.eq(queue_entries::attempts_made + 1),
                            queue_entries::started_at.eq(Some(&now)),
                            queue_entries::updated_at.eq(&now),
                        ))
                        .execute(conn)?;
                    load(conn, &id)
                })
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        Ok(claimed.map(QueueEntry::try_from).transpose()?)
    }

    async fn complete(
        &self,
        id: UniversalUuid,
        result: JobProcessResult,
        at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);
        let result = serde_json::to_string(&result).map_err(StoreError::from)?;
        let at = ts(&at);

        let updated = conn
            .interact(move |conn| {
                diesel::update(queue_entries::table.filter(queue_entries::id.eq(id_blob)))
                    .set((
                        queue_entries::state.eq(QueueEntryState::Completed.as_str()),
                        queue_entries::result.eq(Some(result)),
                        queue_entries::finished_at.eq(Some(&at)),
                        queue_entries::updated_at.eq(&at),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        if updated == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn fail(
        &self,
        id: UniversalUuid,
        error: String,
        retry_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);
        let at = ts(&at);
        let retry_at = retry_at.as_ref().map(ts);

        let row: Option<SqliteQueueEntry> = conn
            .interact(move |conn| {
                let target = queue_entries::table.filter(queue_entries::id.eq(&id_blob));
                match retry_at {
                    Some(retry_at) => diesel::update(target)
                        .set((
                            queue_entries::state.eq(QueueEntryState::Delayed.as_str()),
                            queue_entries::run_at.eq(retry_at),
                            queue_entries::last_error.eq(Some(&error)),
                            queue_entries::updated_at.eq(&at),
                        ))
                        .execute(conn)?,
                    None => diesel::update(target)
                        .set((
                            queue_entries::state.eq(QueueEntryState::Failed.as_str()),
                            queue_entries::last_error.eq(Some(&error)),
                            queue_entries::finished_at.eq(Some(&at)),
                            queue_entries::updated_at.eq(&at),
                        ))
                        .execute(conn)?,
                };
                load(conn, &id_blob)
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(row.try_into()?),
            None => Err(Self::not_found(id)),
        }
    }

    async fn link_job(&self, id: UniversalUuid, job_id: UniversalUuid) -> Result<(), QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);
        let job_blob = uuid_to_blob(&job_id);
        let now = ts(&Utc::now());

        let updated = conn
            .interact(move |conn| {
                diesel::update(queue_entries::table.filter(queue_entries::id.eq(id_blob)))
                    .set((
                        queue_entries::orchestration_job_id.eq(Some(job_blob)),
                        queue_entries::updated_at.eq(now),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        if updated == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn get(&self, id: UniversalUuid) -> Result<Option<QueueEntry>, QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let row = conn
            .interact(move |conn| load(conn, &id_blob))
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        Ok(row.map(QueueEntry::try_from).transpose()?)
    }

    async fn list(
        &self,
        state: QueueEntryState,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let state = state.as_str();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<SqliteQueueEntry> = conn
            .interact(move |conn| {
                queue_entries::table
                    .filter(queue_entries::state.eq(state))
                    .order(queue_entries::created_at.asc())
                    .limit(limit)
                    .load(conn)
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        Ok(super::models::convert_all(rows)?)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let conn = self.dal.database.get_connection().await?;

        let grouped: Vec<(String, i64)> = conn
            .interact(|conn| {
                queue_entries::table
                    .group_by(queue_entries::state)
                    .select((queue_entries::state, diesel::dsl::count_star()))
                    .load(conn)
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        let mut counts = QueueCounts::default();
        for (state, n) in grouped {
            let state = QueueEntryState::parse(&state).ok_or_else(|| {
                StoreError::corrupt("queue_entries", format!("unknown state '{}'", state))
            })?;
            counts.add(state, n.max(0) as usize);
        }
        Ok(counts)
    }

    async fn remove(&self, id: UniversalUuid) -> Result<bool, QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let deleted = conn
            .interact(move |conn| {
                diesel::delete(queue_entries::table.filter(queue_entries::id.eq(id_blob))).execute(conn)
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        Ok(deleted > 0)
    }

    async fn reset_for_retry(
        &self,
        id: UniversalUuid,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);
        let now = ts(&now);

        let row: Option<SqliteQueueEntry> = conn
            .interact(move |conn| {
                diesel::update(
                    queue_entries::table
                        .filter(queue_entries::id.eq(&id_blob))
                        .filter(queue_entries::state.eq(QueueEntryState::Failed.as_str())),
                )
                .set((
                    queue_entries::state.eq(QueueEntryState::Waiting.as_str()),
                    queue_entries::attempts_made.eq(0),
                    queue_entries::run_at.eq(&now),
                    queue_entries::last_error.eq(None::<String>),
                    queue_entries::started_at.eq(None::<String>),
                    queue_entries::finished_at.eq(None::<String>),
                    queue_entries::updated_at.eq(&now),
                ))
                .execute(conn)?;
                load(conn, &id_blob)
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        let entry: QueueEntry = match row {
            Some(row) => row.try_into()?,
            None => return Err(Self::not_found(id)),
        };
        if entry.state != QueueEntryState::Waiting {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                state: entry.state.to_string(),
                action: "retried",
            });
        }
        Ok(entry)
    }

    async fn delete_finished_before(
        &self,
        state: QueueEntryState,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        let conn = self.dal.database.get_connection().await?;
        let state = state.as_str();
        let cutoff = ts(&cutoff);

        let deleted = conn
            .interact(move |conn| {
                diesel::delete(
                    queue_entries::table
                        .filter(queue_entries::state.eq(state))
                        .filter(queue_entries::finished_at.is_not_null())
                        .filter(queue_entries::finished_at.lt(cutoff)),
                )
                .execute(conn)
            })
            .await
            .map_err(Self::pool_error)?
            .map_err(StoreError::from)?;

        Ok(deleted)
    }
}
