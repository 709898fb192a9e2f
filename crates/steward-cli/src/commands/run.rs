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


//! `steward run`: one synchronous batch.

use anyhow::{Context, Result};
use steward::{StewardConfig, TriggerSource};

pub async fn run(config: &StewardConfig, project: &str, user: Option<String>) -> Result<()> {
    let project_id = super::parse_project(project)?;
    let dal = super::open_store(config).await?;
    dal.database.run_migrations().await?;

    let result = super::coordinator(config, dal)
        .run_batch_orchestration(project_id, TriggerSource::Manual, user)
        .await
        .context("Batch failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
