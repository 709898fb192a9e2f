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


use anyhow::Result;
use steward::store::JobFilter;
use steward::{OrchestrationStore, QueueBackend, StewardConfig};

pub async fn run(config: &StewardConfig, project: Option<&str>, limit: usize) -> Result<()> {
    let dal = super::open_store(config).await?;
    let filter = match project {
        Some(raw) => JobFilter::for_project(super::parse_project(raw)?),
        None => JobFilter::default(),
    }
    .with_limit(limit);

    let jobs = dal.list_jobs(&filter).await?;
    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<15}  {:>4} {:>4} {:>4} {:>4}  {}",
        "JOB", "STATUS", "TRIGGER", "OK", "FAIL", "SKIP", "TASK", "CREATED"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<10}  {:<15}  {:>4} {:>4} {:>4} {:>4}  {}",
            job.id,
            job.status.as_str(),
            job.trigger_source.as_str(),
            job.agents_succeeded,
            job.agents_failed,
            job.agents_skipped,
            job.tasks_created,
            job.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(error) = job.error_message {
            println!("    error: {}", error);
        }
    }
    Ok(())
}

pub async fn queue_stats(config: &StewardConfig) -> Result<()> {
    let dal = super::open_store(config).await?;
    let counts = dal.queue_backend().counts().await?;
    println!("waiting:   {}", counts.waiting);
    println!("delayed:   {}", counts.delayed);
    println!("active:    {}", counts.active);
    println!("completed: {}", counts.completed);
    println!("failed:    {}", counts.failed);
    Ok(())
}
