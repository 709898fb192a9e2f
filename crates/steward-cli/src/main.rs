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

//! Steward CLI - run, serve and administer agent orchestration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use steward::{ConfigLoader, StewardConfig};

mod commands;

/// Steward - decides when project agents run and what they may do
#[derive(Parser)]
#[command(name = "steward")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (can also be set via DATABASE_URL environment variable)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Configuration file (defaults to the standard search paths)
    #[arg(short, long, env = "STEWARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Run one batch for a project and print the result
    Run {
        /// Project id
        #[arg(long)]
        project: String,

        /// Recorded as the triggering user
        #[arg(long)]
        user: Option<String>,
    },

    /// Start queue workers and enqueue every scheduled project periodically
    Serve {
        /// How often to enqueue batches (e.g., "15m", "1h")
        #[arg(long, default_value = "15m")]
        interval: String,
    },

    /// List recent jobs
    Jobs {
        /// Only jobs for this project
        #[arg(long)]
        project: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Inspect the durable job queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show entry counts by state
    Stats,
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Delete finished jobs and their execution logs
    CleanupJobs {
        /// Delete jobs older than this duration (e.g., "90d", "30d", "7d", "24h")
        #[arg(long, default_value = "30d")]
        older_than: String,

        /// Preview what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Move running jobs past their deadline to timeout
    ExpireJobs,
}

fn load_config(cli: &Cli) -> Result<StewardConfig> {
    let mut config = ConfigLoader::new()
        .load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let level = if cli.verbose {
        Some(tracing::Level::DEBUG)
    } else {
        config.log_level()
    };
    steward::init_logging(level);

    match cli.command {
        Commands::Migrate => commands::migrate::run(&config).await?,
        Commands::Run { project, user } => commands::run::run(&config, &project, user).await?,
        Commands::Serve { interval } => commands::serve::run(&config, &interval).await?,
        Commands::Jobs { project, limit } => {
            commands::jobs::run(&config, project.as_deref(), limit).await?
        }
        Commands::Queue { command } => match command {
            QueueCommands::Stats => commands::jobs::queue_stats(&config).await?,
        },
        Commands::Admin { command } => match command {
            AdminCommands::CleanupJobs {
                older_than,
                dry_run,
            } => commands::cleanup_jobs::run(&config, &older_than, dry_run).await?,
            AdminCommands::ExpireJobs => commands::cleanup_jobs::expire(&config).await?,
        },
    }

    Ok(())
}
