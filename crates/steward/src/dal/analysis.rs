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

//! Repository analysis cache.
//!
//! Writes go through `INSERT ... ON CONFLICT (project_id, period_type,
//! period_start) DO UPDATE`, so concurrent jobs for the same window resolve
//! to last-writer-wins without any lock.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::models::{current_timestamp_string, ts, uuid_to_blob, SqliteRepositoryAnalysis};
use super::DAL;
use crate::database::schema::repository_analyses;
use crate::database::universal_types::UniversalUuid;
use crate::error::StoreError;
use crate::models::analysis::{AnalysisWindow, CachedAnalysis, NewCachedAnalysis};

pub struct AnalysisDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> AnalysisDAL<'a> {
    pub async fn find_fresh(
        &self,
        project_id: UniversalUuid,
        window: &AnalysisWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedAnalysis>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let project_blob = uuid_to_blob(&project_id);
        let period_type = window.period_type.as_str().to_string();
        let start = ts(&window.start);
        let end = ts(&window.end);
        let now = ts(&now);

        let row: Option<SqliteRepositoryAnalysis> = conn
            .interact(move |conn| {
                repository_analyses::table
                    .filter(repository_analyses::project_id.eq(project_blob))
                    .filter(repository_analyses::period_type.eq(period_type))
                    .filter(repository_analyses::is_stale.eq(0))
                    .filter(repository_analyses::expires_at.gt(now))
                    .filter(repository_analyses::period_start.ge(start))
                    .filter(repository_analyses::period_start.le(end))
                    .order(repository_analyses::fetched_at.desc())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(CachedAnalysis::try_from).transpose()
    }

    pub async fn upsert(&self, new: NewCachedAnalysis) -> Result<CachedAnalysis, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let now = current_timestamp_string();
        let row = SqliteRepositoryAnalysis {
            id: uuid_to_blob(&UniversalUuid::new_v4()),
            project_id: uuid_to_blob(&new.project_id),
            period_type: new.window.period_type.as_str().to_string(),
            period_start: ts(&new.window.start),
            period_end: ts(&new.window.end),
            analysis: serde_json::to_string(&new.activity)?,
            fetched_at: ts(&new.fetched_at),
            expires_at: ts(&new.expires_at),
            is_stale: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        let stored: SqliteRepositoryAnalysis = conn
            .interact(move |conn| {
                diesel::insert_into(repository_analyses::table)
                    .values(&row)
                    .on_conflict((
                        repository_analyses::project_id,
                        repository_analyses::period_type,
                        repository_analyses::period_start,
                    ))
                    .do_update()
                    .set((
                        repository_analyses::period_end.eq(excluded(repository_analyses::period_end)),
                        repository_analyses::analysis.eq(excluded(repository_analyses::analysis)),
                        repository_analyses::fetched_at.eq(excluded(repository_analyses::fetched_at)),
                        repository_analyses::expires_at.eq(excluded(repository_analyses::expires_at)),
                        repository_analyses::is_stale.eq(0),
                        repository_analyses::updated_at.eq(excluded(repository_analyses::updated_at)),
                    ))
                    .execute(conn)?;
                repository_analyses::table
                    .filter(repository_analyses::project_id.eq(&row.project_id))
                    .filter(repository_analyses::period_type.eq(&row.period_type))
                    .filter(repository_analyses::period_start.eq(&row.period_start))
                    .first(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        stored.try_into()
    }

    pub async fn mark_stale(&self, project_id: UniversalUuid) -> Result<usize, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let project_blob = uuid_to_blob(&project_id);
        let now = current_timestamp_string();

        let updated = conn
            .interact(move |conn| {
                diesel::update(
                    repository_analyses::table
                        .filter(repository_analyses::project_id.eq(project_blob))
                        .filter(repository_analyses::is_stale.eq(0)),
                )
                .set((
                    repository_analyses::is_stale.eq(1),
                    repository_analyses::updated_at.eq(now),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated)
    }
}
