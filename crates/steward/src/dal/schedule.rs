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

//! Agent Schedule Data Access Layer
//!
//! Counter updates after each attempt are single `UPDATE` statements using
//! column arithmetic, so two jobs finishing the same schedule at once cannot
//! lose an increment.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::models::{
    blob_to_uuid, convert_all, current_timestamp_string, time_to_string, ts, uuid_to_blob,
    SqliteAgentSchedule,
};
use super::DAL;
use crate::database::schema::agent_schedules;
use crate::database::universal_types::UniversalUuid;
use crate::error::StoreError;
use crate::models::schedule::{encode_days, AgentSchedule, NewAgentSchedule, ScheduleOutcome};

pub struct ScheduleDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> ScheduleDAL<'a> {
    pub async fn create(&self, new: NewAgentSchedule) -> Result<AgentSchedule, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let now = current_timestamp_string();
        let row = SqliteAgentSchedule {
            id: uuid_to_blob(&UniversalUuid::new_v4()),
            project_id: uuid_to_blob(&new.project_id),
            agent_slug: new.agent_slug,
            is_enabled: new.enabled as i32,
            schedule_type: new.schedule_type.as_str().to_string(),
            cron_expression: new.cron_expression,
            timezone: new.timezone,
            run_after_time: new.run_after_time.as_ref().map(time_to_string),
            run_before_time: new.run_before_time.as_ref().map(time_to_string),
            run_on_days: encode_days(&new.run_on_days),
            min_interval_minutes: new.min_interval_minutes,
            max_runs_per_day: new.max_runs_per_day,
            cooldown_after_error_minutes: new.cooldown_after_error_minutes,
            priority: new.priority,
            allow_concurrent: new.allow_concurrent as i32,
            last_run_at: None,
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            total_runs: 0,
            total_successes: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        let stored: SqliteAgentSchedule = conn
            .interact(move |conn| {
                diesel::insert_into(agent_schedules::table)
                    .values(&row)
                    .execute(conn)?;
                agent_schedules::table
                    .filter(agent_schedules::id.eq(&row.id))
                    .first(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        stored.try_into()
    }

    pub async fn get(&self, id: UniversalUuid) -> Result<Option<AgentSchedule>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let row: Option<SqliteAgentSchedule> = conn
            .interact(move |conn| {
                agent_schedules::table
                    .filter(agent_schedules::id.eq(id_blob))
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(AgentSchedule::try_from).transpose()
    }

    /// Enabled schedules for a project, highest priority first. Ties break on
    /// creation order so batch order is stable.
    pub async fn list_enabled(
        &self,
        project_id: UniversalUuid,
    ) -> Result<Vec<AgentSchedule>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let project_blob = uuid_to_blob(&project_id);

        let rows: Vec<SqliteAgentSchedule> = conn
            .interact(move |conn| {
                agent_schedules::table
                    .filter(agent_schedules::project_id.eq(project_blob))
                    .filter(agent_schedules::is_enabled.eq(1))
                    .order((
                        agent_schedules::priority.desc(),
                        agent_schedules::created_at.asc(),
                    ))
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    pub async fn record_outcome(
        &self,
        id: UniversalUuid,
        outcome: ScheduleOutcome,
        at: DateTime<Utc>,
    ) -> Result<AgentSchedule, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);
        let at = ts(&at);

        let row: Option<SqliteAgentSchedule> = conn
            .interact(move |conn| {
                let target = agent_schedules::table.filter(agent_schedules::id.eq(&id_blob));
                match outcome {
                    ScheduleOutcome::Success => {
                        diesel::update(target)
                            .set((
                                agent_schedules::last_run_at.eq(Some(&at)),
                                agent_schedules::last_success_at.eq(Some(&at)),
                                agent_schedules::total_runs.eq(agent_schedules::total_runs + 1),
                                agent_schedules::total_successes
                                    .eq(agent_schedules::total_successes + 1),
                                agent_schedules::consecutive_failures.eq(0),
                                agent_schedules::updated_at.eq(&at),
                            ))
                            .execute(conn)?;
                    }
                    ScheduleOutcome::Failure => {
                        diesel::update(target)
                            .set((
                                agent_schedules::last_run_at.eq(Some(&at)),
                                agent_schedules::last_failure_at.eq(Some(&at)),
                                agent_schedules::total_runs.eq(agent_schedules::total_runs + 1),
                                agent_schedules::consecutive_failures
                                    .eq(agent_schedules::consecutive_failures + 1),
                                agent_schedules::updated_at.eq(&at),
                            ))
                            .execute(conn)?;
                    }
                }
                agent_schedules::table
                    .filter(agent_schedules::id.eq(&id_blob))
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::NotFound {
                entity: "schedule",
                id: id.to_string(),
            }),
        }
    }

    pub async fn projects_with_enabled(&self) -> Result<Vec<UniversalUuid>, StoreError> {
        let conn = self.dal.database.get_connection().await?;

        let blobs: Vec<Vec<u8>> = conn
            .interact(|conn| {
                agent_schedules::table
                    .filter(agent_schedules::is_enabled.eq(1))
                    .select(agent_schedules::project_id)
                    .distinct()
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        let mut ids = blobs
            .iter()
            .map(|b| blob_to_uuid("agent_schedules", b))
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort();
        Ok(ids)
    }
}
