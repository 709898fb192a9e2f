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

//! # Configuration
//!
//! Two layers:
//!
//! - runtime structs ([`CoordinatorConfig`], [`QueueConfig`]) with builders
//!   and accessors, used directly by library callers
//! - the [`StewardConfig`] file format, loaded from TOML by [`ConfigLoader`]
//!   and converted into the runtime structs
//!
//! ```toml
//! [database]
//! url = "${STEWARD_DATABASE_URL:-steward.db}"
//!
//! [queue]
//! concurrency = 3
//! rate_limit_max = 5
//! rate_limit_window_secs = 60
//!
//! [decision]
//! developer_prs_opened = 3
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decision::DecisionThresholds;
use crate::logging::parse_level;
use crate::models::analysis::PeriodType;
use crate::queue::{BackoffStrategy, RetryPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found in any search location")]
    ConfigNotFound,

    #[error("Failed to read configuration file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Environment variable substitution failed: {0}")]
    EnvSubstitutionError(String),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// Settings for [`BatchCoordinator`](crate::coordinator::BatchCoordinator).
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    job_timeout: Option<Duration>,
    analysis_period: PeriodType,
    analysis_cache_ttl: Duration,
    activity_lookback: Duration,
}

impl CoordinatorConfig {
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Deadline applied to each batch job, measured from its start.
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout
    }

    /// Window length of the shared repository analysis.
    pub fn analysis_period(&self) -> PeriodType {
        self.analysis_period
    }

    pub fn analysis_cache_ttl(&self) -> Duration {
        self.analysis_cache_ttl
    }

    /// How far back recent suggestion and task counts reach.
    pub fn activity_lookback(&self) -> Duration {
        self.activity_lookback
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl Default for CoordinatorConfigBuilder {
    fn default() -> Self {
        Self {
            config: CoordinatorConfig {
                job_timeout: Some(Duration::from_secs(30 * 60)),
                analysis_period: PeriodType::Weekly,
                analysis_cache_ttl: Duration::from_secs(60 * 60),
                activity_lookback: Duration::from_secs(24 * 60 * 60),
            },
        }
    }
}

impl CoordinatorConfigBuilder {
    pub fn job_timeout(mut self, value: Option<Duration>) -> Self {
        self.config.job_timeout = value;
        self
    }

    pub fn analysis_period(mut self, value: PeriodType) -> Self {
        self.config.analysis_period = value;
        self
    }

    pub fn analysis_cache_ttl(mut self, value: Duration) -> Self {
        self.config.analysis_cache_ttl = value;
        self
    }

    pub fn activity_lookback(mut self, value: Duration) -> Self {
        self.config.activity_lookback = value;
        self
    }

    pub fn build(self) -> CoordinatorConfig {
        self.config
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfigBuilder::default().build()
    }
}

/// Settings for [`JobQueue`](crate::queue::JobQueue).
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    concurrency: usize,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    rate_limit_max: usize,
    rate_limit_window: Duration,
    completed_retention: Duration,
    failed_retention: Duration,
    poll_interval: Duration,
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// Number of workers processing jobs at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Attempts per job, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Job starts allowed per [`rate_limit_window`](Self::rate_limit_window).
    pub fn rate_limit_max(&self) -> usize {
        self.rate_limit_max
    }

    pub fn rate_limit_window(&self) -> Duration {
        self.rate_limit_window
    }

    pub fn completed_retention(&self) -> Duration {
        self.completed_retention
    }

    pub fn failed_retention(&self) -> Duration {
        self.failed_retention
    }

    /// Worker wake-up interval when no enqueue notification arrives.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Exponential retry policy derived from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .initial_delay(self.initial_backoff)
            .max_delay(self.max_backoff)
            .backoff_strategy(BackoffStrategy::Exponential {
                base: 2.0,
                multiplier: 1.0,
            })
            .build()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Validation(
                "queue concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "queue max_attempts must be at least 1".to_string(),
            ));
        }
        if self.rate_limit_max == 0 {
            return Err(ConfigError::Validation(
                "queue rate_limit_max must be at least 1".to_string(),
            ));
        }
        if self.failed_retention < self.completed_retention * 2 {
            return Err(ConfigError::Validation(format!(
                "failed retention ({:?}) must be at least twice completed retention ({:?})",
                self.failed_retention, self.completed_retention
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self {
            config: QueueConfig {
                concurrency: 3,
                max_attempts: 3,
                initial_backoff: Duration::from_secs(30),
                max_backoff: Duration::from_secs(60 * 60),
                rate_limit_max: 5,
                rate_limit_window: Duration::from_secs(60),
                completed_retention: Duration::from_secs(24 * 60 * 60),
                failed_retention: Duration::from_secs(7 * 24 * 60 * 60),
                poll_interval: Duration::from_millis(500),
            },
        }
    }
}

impl QueueConfigBuilder {
    pub fn concurrency(mut self, value: usize) -> Self {
        self.config.concurrency = value;
        self
    }

    pub fn max_attempts(mut self, value: u32) -> Self {
        self.config.max_attempts = value;
        self
    }

    pub fn initial_backoff(mut self, value: Duration) -> Self {
        self.config.initial_backoff = value;
        self
    }

    pub fn max_backoff(mut self, value: Duration) -> Self {
        self.config.max_backoff = value;
        self
    }

    pub fn rate_limit(mut self, max: usize, window: Duration) -> Self {
        self.config.rate_limit_max = max;
        self.config.rate_limit_window = window;
        self
    }

    pub fn completed_retention(mut self, value: Duration) -> Self {
        self.config.completed_retention = value;
        self
    }

    pub fn failed_retention(mut self, value: Duration) -> Self {
        self.config.failed_retention = value;
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    pub fn build(self) -> QueueConfig {
        self.config
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfigBuilder::default().build()
    }
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StewardConfig {
    pub database: DatabaseSection,
    pub coordinator: CoordinatorSection,
    pub queue: QueueSection,
    pub decision: DecisionThresholds,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub pool_size: usize,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "steward.db".to_string(),
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    /// 0 disables the deadline.
    pub job_timeout_secs: u64,
    pub analysis_period: PeriodType,
    pub analysis_cache_ttl_secs: u64,
    pub activity_lookback_hours: u64,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self::from(&CoordinatorConfig::default())
    }
}

impl From<&CoordinatorConfig> for CoordinatorSection {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            job_timeout_secs: config.job_timeout().map(|d| d.as_secs()).unwrap_or(0),
            analysis_period: config.analysis_period(),
            analysis_cache_ttl_secs: config.analysis_cache_ttl().as_secs(),
            activity_lookback_hours: config.activity_lookback().as_secs() / 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
    pub rate_limit_max: usize,
    pub rate_limit_window_secs: u64,
    pub completed_retention_hours: u64,
    pub failed_retention_hours: u64,
    pub poll_interval_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        let config = QueueConfig::default();
        Self {
            concurrency: config.concurrency(),
            max_attempts: config.max_attempts(),
            backoff_initial_secs: config.initial_backoff().as_secs(),
            backoff_max_secs: config.max_backoff().as_secs(),
            rate_limit_max: config.rate_limit_max(),
            rate_limit_window_secs: config.rate_limit_window().as_secs(),
            completed_retention_hours: config.completed_retention().as_secs() / 3600,
            failed_retention_hours: config.failed_retention().as_secs() / 3600,
            poll_interval_ms: config.poll_interval().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl StewardConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let section = &self.coordinator;
        CoordinatorConfig::builder()
            .job_timeout(match section.job_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            })
            .analysis_period(section.analysis_period)
            .analysis_cache_ttl(Duration::from_secs(section.analysis_cache_ttl_secs))
            .activity_lookback(Duration::from_secs(section.activity_lookback_hours * 3600))
            .build()
    }

    pub fn queue_config(&self) -> QueueConfig {
        let section = &self.queue;
        QueueConfig::builder()
            .concurrency(section.concurrency)
            .max_attempts(section.max_attempts)
            .initial_backoff(Duration::from_secs(section.backoff_initial_secs))
            .max_backoff(Duration::from_secs(section.backoff_max_secs))
            .rate_limit(
                section.rate_limit_max,
                Duration::from_secs(section.rate_limit_window_secs),
            )
            .completed_retention(Duration::from_secs(section.completed_retention_hours * 3600))
            .failed_retention(Duration::from_secs(section.failed_retention_hours * 3600))
            .poll_interval(Duration::from_millis(section.poll_interval_ms))
            .build()
    }

    /// Log level from the `[logging]` section, if it names one.
    pub fn log_level(&self) -> Option<tracing::Level> {
        parse_level(&self.logging.level)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database url must not be empty".to_string(),
            ));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Validation(
                "database pool_size must be at least 1".to_string(),
            ));
        }
        if self.log_level().is_none() {
            return Err(ConfigError::Validation(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        self.decision.validate().map_err(ConfigError::Validation)?;
        self.queue_config().validate()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Locates, reads and parses a [`StewardConfig`].
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Loader with the default search paths: `./steward.toml`, the user
    /// config directory, then `/etc/steward/config.toml`.
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./steward.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("steward").join("config.toml"));
        }
        search_paths.push(PathBuf::from("/etc/steward/config.toml"));
        Self { search_paths }
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Loads from `config_file`, then `STEWARD_CONFIG`, then the first
    /// search path that exists.
    pub fn load_config(&self, config_file: Option<&Path>) -> Result<StewardConfig, ConfigError> {
        let config_path = if let Some(path) = config_file {
            path.to_path_buf()
        } else if let Ok(env_config) = env::var("STEWARD_CONFIG") {
            PathBuf::from(env_config)
        } else {
            self.find_config_file().ok_or(ConfigError::ConfigNotFound)?
        };

        self.load_config_from_file(&config_path)
    }

    /// Like [`load_config`](Self::load_config) but falls back to defaults
    /// when no file is found anywhere.
    pub fn load_or_default(&self, config_file: Option<&Path>) -> Result<StewardConfig, ConfigError> {
        match self.load_config(config_file) {
            Err(ConfigError::ConfigNotFound) => Ok(StewardConfig::default()),
            other => other,
        }
    }

    pub fn load_config_from_file(&self, path: &Path) -> Result<StewardConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let substituted = self.substitute_env_vars(&content)?;
        let config = StewardConfig::from_toml_str(&substituted)?;
        config.validate()?;
        Ok(config)
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Replaces `${VAR}`, `${VAR:-default}` and `${VAR:?message}`.
    fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        let pattern = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))?;
        let mut result = content.to_string();
        for cap in pattern.captures_iter(content) {
            let replacement = self.process_var_expression(&cap[1])?;
            result = result.replace(&cap[0], &replacement);
        }
        Ok(result)
    }

    fn process_var_expression(&self, expr: &str) -> Result<String, ConfigError> {
        if let Some((name, default)) = expr.split_once(":-") {
            Ok(env::var(name).unwrap_or_else(|_| default.to_string()))
        } else if let Some((name, message)) = expr.split_once(":?") {
            env::var(name).map_err(|_| {
                ConfigError::EnvSubstitutionError(format!(
                    "Required environment variable '{}' is not set: {}",
                    name, message
                ))
            })
        } else {
            env::var(expr).map_err(|_| {
                ConfigError::EnvSubstitutionError(format!(
                    "Required environment variable '{}' is not set",
                    expr
                ))
            })
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
