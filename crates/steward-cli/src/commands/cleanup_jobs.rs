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


//! `steward admin cleanup-jobs` and `steward admin expire-jobs`.

use anyhow::{Context, Result};
use steward::StewardConfig;
use tracing::info;

pub async fn run(config: &StewardConfig, older_than: &str, dry_run: bool) -> Result<()> {
    let retention = super::parse_duration(older_than)
        .with_context(|| format!("Invalid duration: '{}'", older_than))?;
    let dal = super::open_store(config).await?;
    let coordinator = super::coordinator(config, dal);

    let count = coordinator
        .cleanup_jobs(retention, dry_run)
        .await
        .context("Failed to clean up jobs")?;

    if count == 0 {
        info!("No finished jobs older than {}", older_than);
    } else if dry_run {
        info!("[DRY RUN] Would delete {} job(s) older than {}", count, older_than);
    } else {
        info!("Deleted {} job(s) older than {}", count, older_than);
    }
    Ok(())
}

pub async fn expire(config: &StewardConfig) -> Result<()> {
    let dal = super::open_store(config).await?;
    let expired = super::coordinator(config, dal)
        .expire_overdue_jobs()
        .await
        .context("Failed to expire jobs")?;
    for id in &expired {
        println!("{}", id);
    }
    info!("Expired {} overdue job(s)", expired.len());
    Ok(())
}
