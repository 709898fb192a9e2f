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

//! Execution log persistence. Logs are append-only; `(job, schedule)` is
//! unique so a schedule can only be logged once per job.

use diesel::prelude::*;

use super::models::{convert_all, current_timestamp_string, ts, uuid_to_blob, SqliteExecutionLog};
use super::DAL;
use crate::database::schema::agent_execution_logs;
use crate::database::universal_types::UniversalUuid;
use crate::error::StoreError;
use crate::models::execution_log::{AgentExecutionLog, NewExecutionLog};

pub struct ExecutionLogDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> ExecutionLogDAL<'a> {
    pub async fn insert(&self, log: NewExecutionLog) -> Result<AgentExecutionLog, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let row = SqliteExecutionLog {
            id: uuid_to_blob(&UniversalUuid::new_v4()),
            job_id: uuid_to_blob(&log.job_id),
            schedule_id: uuid_to_blob(&log.schedule_id),
            project_id: uuid_to_blob(&log.project_id),
            agent_slug: log.agent_slug,
            phase: log.phase.as_str().to_string(),
            status: log.status.as_str().to_string(),
            should_act: log.should_act as i32,
            do_nothing_reason: log.do_nothing_reason,
            confidence: log.confidence,
            context_summary: serde_json::to_string(&log.context_summary)?,
            external_data: log
                .external_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            actions_proposed: log.actions_proposed,
            actions_executed: log.actions_executed,
            actions_approved: log.actions_approved,
            actions_rejected: log.actions_rejected,
            created_suggestion_ids: serde_json::to_string(&log.created_suggestion_ids)?,
            error_message: log.error_message,
            tokens_used: log.tokens_used,
            estimated_cost: log.estimated_cost,
            started_at: ts(&log.started_at),
            completed_at: log.completed_at.as_ref().map(ts),
            duration_ms: log.duration_ms,
            created_at: current_timestamp_string(),
        };

        let stored: SqliteExecutionLog = conn
            .interact(move |conn| {
                diesel::insert_into(agent_execution_logs::table)
                    .values(&row)
                    .execute(conn)?;
                agent_execution_logs::table
                    .filter(agent_execution_logs::id.eq(&row.id))
                    .first(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        stored.try_into()
    }

    /// Logs for a job in the order they were written.
    pub async fn list_for_job(
        &self,
        job_id: UniversalUuid,
    ) -> Result<Vec<AgentExecutionLog>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let job_blob = uuid_to_blob(&job_id);

        let rows: Vec<SqliteExecutionLog> = conn
            .interact(move |conn| {
                agent_execution_logs::table
                    .filter(agent_execution_logs::job_id.eq(job_blob))
                    .order(agent_execution_logs::started_at.asc())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }
}
