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


pub mod cleanup_jobs;
pub mod jobs;
pub mod migrate;
pub mod run;
pub mod serve;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use steward::{BatchCoordinator, Database, StewardConfig, UniversalUuid, DAL};

/// Opens the configured database. Migrations are not applied.
pub async fn open_store(config: &StewardConfig) -> Result<Arc<DAL>> {
    let database = Database::new(&config.database.url, config.database.pool_size)
        .with_context(|| format!("Failed to open database '{}'", config.database.url))?;
    Ok(Arc::new(DAL::new(database)))
}

pub fn coordinator(config: &StewardConfig, dal: Arc<DAL>) -> BatchCoordinator {
    BatchCoordinator::builder(dal)
        .decision_engine(steward::DecisionEngine::new(config.decision.clone()))
        .config(config.coordinator_config())
        .build()
}

pub fn parse_project(raw: &str) -> Result<UniversalUuid> {
    UniversalUuid::from_str(raw.trim()).with_context(|| format!("Invalid project id '{}'", raw))
}

/// Parses durations like "30d", "24h", "15m", "90s" or "7d12h".
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let mut total_secs: u64 = 0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return Err(anyhow!("Expected a number before '{}'", c));
        }
        let n: u64 = digits
            .parse()
            .with_context(|| format!("Invalid number in duration: {}", digits))?;
        digits.clear();

        let unit = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return Err(anyhow!("Unknown duration unit '{}'. Use d, h, m or s", c)),
        };
        total_secs = n
            .checked_mul(unit)
            .and_then(|v| total_secs.checked_add(v))
            .ok_or_else(|| anyhow!("Duration '{}' is too large", raw))?;
    }

    if !digits.is_empty() {
        return Err(anyhow!("Duration '{}' is missing a unit", raw));
    }
    if total_secs == 0 {
        return Err(anyhow!("Duration must be greater than zero"));
    }
    Ok(Duration::from_secs(total_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30d").unwrap(), Duration::from_secs(30 * 86_400));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("15M").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("7d12h").unwrap(), Duration::from_secs(7 * 86_400 + 12 * 3_600));
    }

    #[test]
    fn test_parse_duration_rejects_bad_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("90").is_err());
        assert!(parse_duration("90x").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("0d").is_err());
    }

    #[test]
    fn test_parse_project() {
        let id = UniversalUuid::new_v4();
        assert_eq!(parse_project(&id.to_string()).unwrap(), id);
        assert!(parse_project("not-a-uuid").is_err());
    }
}
