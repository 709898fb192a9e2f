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

//! Orchestration Job Data Access Layer
//!
//! Status changes read the current status and write the new one inside a
//! single transaction, so the terminal-status guard holds even when a worker
//! and a timeout supervisor race on the same job.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::models::{
    blob_to_uuid, convert_all, current_timestamp_string, ts, uuid_to_blob, SqliteOrchestrationJob,
};
use super::DAL;
use crate::database::schema::{agent_execution_logs, orchestration_jobs};
use crate::database::universal_types::UniversalUuid;
use crate::error::StoreError;
use crate::models::job::{JobCompletion, JobStatus, NewOrchestrationJob, OrchestrationJob};
use crate::store::JobFilter;

fn terminal_statuses() -> Vec<&'static str> {
    JobStatus::TERMINAL.iter().map(JobStatus::as_str).collect()
}

/// Loads a job's status, failing if the move to `next` is not allowed.
fn check_transition(
    conn: &mut SqliteConnection,
    id_blob: &[u8],
    id: UniversalUuid,
    next: JobStatus,
) -> Result<(), StoreError> {
    let current: Option<String> = orchestration_jobs::table
        .filter(orchestration_jobs::id.eq(id_blob))
        .select(orchestration_jobs::status)
        .first(conn)
        .optional()?;

    let current = current.ok_or_else(|| StoreError::NotFound {
        entity: "job",
        id: id.to_string(),
    })?;
    let current = JobStatus::parse(&current)
        .ok_or_else(|| StoreError::corrupt("orchestration_jobs", format!("unknown status '{}'", current)))?;

    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::InvalidStatusTransition {
            from: current.to_string(),
            to: next.to_string(),
        })
    }
}

pub struct JobDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> JobDAL<'a> {
    pub async fn create(&self, new: NewOrchestrationJob) -> Result<OrchestrationJob, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let now = current_timestamp_string();
        let row = SqliteOrchestrationJob {
            id: uuid_to_blob(&UniversalUuid::new_v4()),
            project_id: new.project_id.as_ref().map(uuid_to_blob),
            job_type: new.job_type.as_str().to_string(),
            trigger_source: new.trigger_source.as_str().to_string(),
            triggered_by: new.triggered_by,
            status: new.status.as_str().to_string(),
            scheduled_at: new.scheduled_at.as_ref().map(ts),
            started_at: new.started_at.as_ref().map(ts),
            completed_at: None,
            timeout_at: new.timeout_at.as_ref().map(ts),
            duration_ms: None,
            agents_executed: 0,
            agents_succeeded: 0,
            agents_failed: 0,
            agents_skipped: 0,
            tasks_created: 0,
            error_message: None,
            error_code: None,
            attempt: new.attempt,
            max_attempts: new.max_attempts,
            input_params: serde_json::to_string(&new.input_params)?,
            output_summary: None,
            created_at: now.clone(),
            updated_at: now,
        };

        let stored: SqliteOrchestrationJob = conn
            .interact(move |conn| {
                diesel::insert_into(orchestration_jobs::table)
                    .values(&row)
                    .execute(conn)?;
                orchestration_jobs::table
                    .filter(orchestration_jobs::id.eq(&row.id))
                    .first(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        stored.try_into()
    }

    pub async fn get(&self, id: UniversalUuid) -> Result<Option<OrchestrationJob>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let row: Option<SqliteOrchestrationJob> = conn
            .interact(move |conn| {
                orchestration_jobs::table
                    .filter(orchestration_jobs::id.eq(id_blob))
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(OrchestrationJob::try_from).transpose()
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<OrchestrationJob>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let project_blob = filter.project_id.as_ref().map(uuid_to_blob);
        let status = filter.status.map(|s| s.as_str().to_string());
        let limit = filter.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows: Vec<SqliteOrchestrationJob> = conn
            .interact(move |conn| {
                let mut query = orchestration_jobs::table.into_boxed();
                if let Some(project) = project_blob {
                    query = query.filter(orchestration_jobs::project_id.eq(project));
                }
                if let Some(status) = status {
                    query = query.filter(orchestration_jobs::status.eq(status));
                }
                if let Some(limit) = limit {
                    query = query.limit(limit);
                }
                query
                    .order(orchestration_jobs::created_at.desc())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    pub async fn start(
        &self,
        id: UniversalUuid,
        started_at: DateTime<Utc>,
        timeout_at: Option<DateTime<Utc>>,
    ) -> Result<OrchestrationJob, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);
        let started_at = ts(&started_at);
        let timeout_at = timeout_at.as_ref().map(ts);

        let row: SqliteOrchestrationJob = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, StoreError, _>(|conn| {
                    check_transition(conn, &id_blob, id, JobStatus::Running)?;
                    diesel::update(
                        orchestration_jobs::table.filter(orchestration_jobs::id.eq(&id_blob)),
                    )
                    .set((
                        orchestration_jobs::status.eq(JobStatus::Running.as_str()),
                        orchestration_jobs::started_at.eq(Some(&started_at)),
                        orchestration_jobs::timeout_at.eq(timeout_at.as_ref()),
                        orchestration_jobs::updated_at.eq(&started_at),
                    ))
                    .execute(conn)?;
                    Ok(orchestration_jobs::table
                        .filter(orchestration_jobs::id.eq(&id_blob))
                        .first(conn)?)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.try_into()
    }

    pub async fn finalize(
        &self,
        id: UniversalUuid,
        completion: JobCompletion,
    ) -> Result<OrchestrationJob, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);
        let output_summary = completion
            .output_summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let completed_at = ts(&completion.completed_at);

        let row: SqliteOrchestrationJob = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, StoreError, _>(|conn| {
                    check_transition(conn, &id_blob, id, completion.status)?;
                    let c = &completion.counters;
                    diesel::update(
                        orchestration_jobs::table.filter(orchestration_jobs::id.eq(&id_blob)),
                    )
                    .set((
                        orchestration_jobs::status.eq(completion.status.as_str()),
                        orchestration_jobs::completed_at.eq(Some(&completed_at)),
                        orchestration_jobs::duration_ms.eq(completion.duration_ms),
                        orchestration_jobs::agents_executed.eq(c.agents_executed),
                        orchestration_jobs::agents_succeeded.eq(c.agents_succeeded),
                        orchestration_jobs::agents_failed.eq(c.agents_failed),
                        orchestration_jobs::agents_skipped.eq(c.agents_skipped),
                        orchestration_jobs::tasks_created.eq(c.tasks_created),
                        orchestration_jobs::error_message.eq(completion.error_message.as_ref()),
                        orchestration_jobs::error_code.eq(completion.error_code.as_ref()),
                        orchestration_jobs::output_summary.eq(output_summary.as_ref()),
                        orchestration_jobs::updated_at.eq(&completed_at),
                    ))
                    .execute(conn)?;
                    Ok(orchestration_jobs::table
                        .filter(orchestration_jobs::id.eq(&id_blob))
                        .first(conn)?)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.try_into()
    }

    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<UniversalUuid>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let now = ts(&now);

        let blobs: Vec<Vec<u8>> = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let overdue: Vec<Vec<u8>> = orchestration_jobs::table
                        .filter(orchestration_jobs::status.eq(JobStatus::Running.as_str()))
                        .filter(orchestration_jobs::timeout_at.is_not_null())
                        .filter(orchestration_jobs::timeout_at.le(&now))
                        .select(orchestration_jobs::id)
                        .load(conn)?;

                    if !overdue.is_empty() {
                        diesel::update(
                            orchestration_jobs::table
                                .filter(orchestration_jobs::id.eq_any(&overdue)),
                        )
                        .set((
                            orchestration_jobs::status.eq(JobStatus::Timeout.as_str()),
                            orchestration_jobs::completed_at.eq(Some(&now)),
                            orchestration_jobs::error_code.eq(Some("JOB_TIMEOUT")),
                            orchestration_jobs::error_message
                                .eq(Some("job exceeded its deadline")),
                            orchestration_jobs::updated_at.eq(&now),
                        ))
                        .execute(conn)?;
                    }
                    Ok(overdue)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        blobs
            .iter()
            .map(|b| blob_to_uuid("orchestration_jobs", b))
            .collect()
    }

    pub async fn count_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff = ts(&cutoff);

        let count: i64 = conn
            .interact(move |conn| {
                orchestration_jobs::table
                    .filter(orchestration_jobs::status.eq_any(terminal_statuses()))
                    .filter(orchestration_jobs::created_at.lt(cutoff))
                    .count()
                    .get_result(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(count.max(0) as usize)
    }

    /// Deletes old terminal jobs. Their execution logs are deleted first
    /// because the cascade depends on `foreign_keys` being enabled on the
    /// connection that runs the delete.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff = ts(&cutoff);

        let deleted: usize = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let ids: Vec<Vec<u8>> = orchestration_jobs::table
                        .filter(orchestration_jobs::status.eq_any(terminal_statuses()))
                        .filter(orchestration_jobs::created_at.lt(&cutoff))
                        .select(orchestration_jobs::id)
                        .load(conn)?;
                    if ids.is_empty() {
                        return Ok(0);
                    }
                    diesel::delete(
                        agent_execution_logs::table.filter(agent_execution_logs::job_id.eq_any(&ids)),
                    )
                    .execute(conn)?;
                    diesel::delete(orchestration_jobs::table.filter(orchestration_jobs::id.eq_any(&ids)))
                        .execute(conn)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(deleted)
    }
}
