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


//! `steward serve`: queue workers plus a periodic enqueue of every project
//! with enabled schedules.

use std::sync::Arc;

use anyhow::{Context, Result};
use steward::{
    EnqueueOptions, JobQueue, OrchestrationStore, QueueBackend, QueueJobData, StewardConfig,
    TriggerSource,
};
use tracing::{error, info, warn};

pub async fn run(config: &StewardConfig, interval: &str) -> Result<()> {
    let every = super::parse_duration(interval)
        .with_context(|| format!("Invalid interval: '{}'", interval))?;

    let dal = super::open_store(config).await?;
    dal.database.run_migrations().await?;

    let backend: Arc<dyn QueueBackend> = Arc::new(dal.queue_backend());
    let coordinator = Arc::new(super::coordinator(config, dal.clone()));
    let queue = JobQueue::new(coordinator.clone(), Some(backend), config.queue_config());
    queue.start()?;
    info!("Serving; enqueueing scheduled projects every {}", interval);

    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = tick(&dal, &queue, &coordinator).await {
                    error!("Scheduling pass failed: {:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    queue.shutdown().await;
    Ok(())
}

async fn tick(
    dal: &steward::DAL,
    queue: &JobQueue,
    coordinator: &steward::BatchCoordinator,
) -> Result<()> {
    coordinator.expire_overdue_jobs().await?;
    if let Err(e) = queue.cleanup().await {
        warn!("Queue cleanup failed: {}", e);
    }

    let projects = dal.list_projects_with_enabled_schedules().await?;
    for project_id in projects {
        let data = QueueJobData::batch(project_id, TriggerSource::Cron);
        if let Err(e) = queue.add_job(data, EnqueueOptions::default()).await {
            warn!("Could not enqueue batch for project {}: {}", project_id, e);
        }
    }
    Ok(())
}
