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

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::prelude::*;

use super::models::{convert_all, current_timestamp_string, parse_ts, uuid_to_blob, SqliteSuggestion};
use super::DAL;
use crate::database::schema::agent_suggestions;
use crate::database::universal_types::UniversalUuid;
use crate::error::StoreError;
use crate::models::suggestion::{NewSuggestion, Suggestion};

pub struct SuggestionDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> SuggestionDAL<'a> {
    pub async fn create(&self, new: NewSuggestion) -> Result<Suggestion, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let now = current_timestamp_string();
        let row = SqliteSuggestion {
            id: uuid_to_blob(&UniversalUuid::new_v4()),
            project_id: uuid_to_blob(&new.project_id),
            agent_slug: new.agent_slug,
            action_key: new.action_key,
            context: serde_json::to_string(&new.context)?,
            approval_state: new.approval_state.as_str().to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        let stored: SqliteSuggestion = conn
            .interact(move |conn| {
                diesel::insert_into(agent_suggestions::table)
                    .values(&row)
                    .execute(conn)?;
                agent_suggestions::table
                    .filter(agent_suggestions::id.eq(&row.id))
                    .first(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        stored.try_into()
    }

    /// Suggestions for a project, newest first.
    pub async fn list(&self, project_id: UniversalUuid) -> Result<Vec<Suggestion>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let project_blob = uuid_to_blob(&project_id);

        let rows: Vec<SqliteSuggestion> = conn
            .interact(move |conn| {
                agent_suggestions::table
                    .filter(agent_suggestions::project_id.eq(project_blob))
                    .order(agent_suggestions::created_at.desc())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    pub async fn latest_by_action(
        &self,
        project_id: UniversalUuid,
        agent_slug: &str,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError> {
        let conn = self.dal.database.get_connection().await?;
        let project_blob = uuid_to_blob(&project_id);
        let agent_slug = agent_slug.to_string();

        let rows: Vec<(String, Option<String>)> = conn
            .interact(move |conn| {
                agent_suggestions::table
                    .filter(agent_suggestions::project_id.eq(project_blob))
                    .filter(agent_suggestions::agent_slug.eq(agent_slug))
                    .group_by(agent_suggestions::action_key)
                    .select((agent_suggestions::action_key, max(agent_suggestions::created_at)))
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        let mut latest = BTreeMap::new();
        for (action_key, raw) in rows {
            if let Some(raw) = raw {
                latest.insert(action_key, parse_ts("agent_suggestions", &raw)?);
            }
        }
        Ok(latest)
    }
}
