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

//! Project Data Access Layer
//!
//! Projects, their per-agent action configuration and project tasks are owned
//! by project configuration. The orchestration core reads them; the upsert
//! methods exist for provisioning and tests.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::models::{
    convert_all, current_timestamp_string, ts, uuid_to_blob, NewSqliteProjectTask,
    SqliteActionConfig, SqliteProject,
};
use super::DAL;
use crate::database::schema::{agent_action_configs, agent_suggestions, project_tasks, projects};
use crate::database::universal_types::UniversalUuid;
use crate::error::StoreError;
use crate::models::agent::{ActionConfig, NewActionConfig};
use crate::models::project::{ActivityCounts, NewProject, ProjectSnapshot};

pub struct ProjectDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> ProjectDAL<'a> {
    /// Inserts a project or updates its metadata.
    pub async fn upsert(&self, project: NewProject) -> Result<ProjectSnapshot, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let now = current_timestamp_string();
        let row = SqliteProject {
            id: uuid_to_blob(&project.id),
            name: project.name,
            status: project.status,
            repository: project.repository,
            created_at: now.clone(),
            updated_at: now,
        };

        let stored: SqliteProject = conn
            .interact(move |conn| {
                diesel::insert_into(projects::table)
                    .values(&row)
                    .on_conflict(projects::id)
                    .do_update()
                    .set((
                        projects::name.eq(excluded(projects::name)),
                        projects::status.eq(excluded(projects::status)),
                        projects::repository.eq(excluded(projects::repository)),
                        projects::updated_at.eq(excluded(projects::updated_at)),
                    ))
                    .execute(conn)?;
                projects::table.filter(projects::id.eq(&row.id)).first(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        stored.try_into()
    }

    pub async fn get(&self, id: UniversalUuid) -> Result<Option<ProjectSnapshot>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let row: Option<SqliteProject> = conn
            .interact(move |conn| {
                projects::table
                    .filter(projects::id.eq(id_blob))
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(ProjectSnapshot::try_from).transpose()
    }

    /// Inserts or replaces the config for (project, agent, action).
    pub async fn upsert_action_config(
        &self,
        config: NewActionConfig,
    ) -> Result<ActionConfig, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let now = current_timestamp_string();
        let row = SqliteActionConfig {
            id: uuid_to_blob(&UniversalUuid::new_v4()),
            project_id: uuid_to_blob(&config.project_id),
            agent_slug: config.agent_slug,
            action_key: config.action_key,
            is_enabled: config.is_enabled as i32,
            requires_approval: config.requires_approval as i32,
            risk_level: config.risk_level.as_str().to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        let stored: SqliteActionConfig = conn
            .interact(move |conn| {
                diesel::insert_into(agent_action_configs::table)
                    .values(&row)
                    .on_conflict((
                        agent_action_configs::project_id,
                        agent_action_configs::agent_slug,
                        agent_action_configs::action_key,
                    ))
                    .do_update()
                    .set((
                        agent_action_configs::is_enabled
                            .eq(excluded(agent_action_configs::is_enabled)),
                        agent_action_configs::requires_approval
                            .eq(excluded(agent_action_configs::requires_approval)),
                        agent_action_configs::risk_level
                            .eq(excluded(agent_action_configs::risk_level)),
                        agent_action_configs::updated_at
                            .eq(excluded(agent_action_configs::updated_at)),
                    ))
                    .execute(conn)?;
                agent_action_configs::table
                    .filter(agent_action_configs::project_id.eq(&row.project_id))
                    .filter(agent_action_configs::agent_slug.eq(&row.agent_slug))
                    .filter(agent_action_configs::action_key.eq(&row.action_key))
                    .first(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        stored.try_into()
    }

    /// Every action config for one agent on one project, enabled or not.
    pub async fn list_action_configs(
        &self,
        project_id: UniversalUuid,
        agent_slug: &str,
    ) -> Result<Vec<ActionConfig>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let project_blob = uuid_to_blob(&project_id);
        let agent_slug = agent_slug.to_string();

        let rows: Vec<SqliteActionConfig> = conn
            .interact(move |conn| {
                agent_action_configs::table
                    .filter(agent_action_configs::project_id.eq(project_blob))
                    .filter(agent_action_configs::agent_slug.eq(agent_slug))
                    .order(agent_action_configs::action_key.asc())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    /// Records a project task. Tasks are created outside the core; this is
    /// used when provisioning and in tests.
    pub async fn create_task(
        &self,
        project_id: UniversalUuid,
        title: &str,
        source_agent: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<UniversalUuid, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let id = UniversalUuid::new_v4();
        let row = NewSqliteProjectTask {
            id: uuid_to_blob(&id),
            project_id: uuid_to_blob(&project_id),
            title: title.to_string(),
            source_agent: source_agent.map(str::to_string),
            created_at: ts(&created_at),
        };

        conn.interact(move |conn| {
            diesel::insert_into(project_tasks::table)
                .values(&row)
                .execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(id)
    }

    pub async fn count_recent_activity(
        &self,
        project_id: UniversalUuid,
        since: DateTime<Utc>,
    ) -> Result<ActivityCounts, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let project_blob = uuid_to_blob(&project_id);
        let since = ts(&since);

        let (suggestions, tasks): (i64, i64) = conn
            .interact(move |conn| {
                let suggestions = agent_suggestions::table
                    .filter(agent_suggestions::project_id.eq(&project_blob))
                    .filter(agent_suggestions::created_at.ge(&since))
                    .count()
                    .get_result::<i64>(conn)?;
                let tasks = project_tasks::table
                    .filter(project_tasks::project_id.eq(&project_blob))
                    .filter(project_tasks::created_at.ge(&since))
                    .count()
                    .get_result::<i64>(conn)?;
                Ok::<_, diesel::result::Error>((suggestions, tasks))
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(ActivityCounts {
            suggestions: suggestions.max(0) as u32,
            tasks: tasks.max(0) as u32,
        })
    }
}
