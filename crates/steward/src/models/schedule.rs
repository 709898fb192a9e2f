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

//! Agent Schedule Model
//!
//! One schedule exists per (project, agent) pairing and describes *when* that
//! agent may run. Schedules are created and edited by project configuration;
//! the orchestration core only mutates the running counters after each attempt.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::universal_types::UniversalUuid;
use crate::error::OrchestrationError;

/// Every day of the week, Sunday = 0.
pub const ALL_DAYS: [u8; 7] = [0, 1, 2, 3, 4, 5, 6];

/// How often a schedule is meant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Hourly,
    #[serde(rename = "every_4h")]
    Every4h,
    #[serde(rename = "every_8h")]
    Every8h,
    Daily,
    Weekly,
    Custom,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Hourly => "hourly",
            ScheduleType::Every4h => "every_4h",
            ScheduleType::Every8h => "every_8h",
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hourly" => Some(ScheduleType::Hourly),
            "every_4h" => Some(ScheduleType::Every4h),
            "every_8h" => Some(ScheduleType::Every8h),
            "daily" => Some(ScheduleType::Daily),
            "weekly" => Some(ScheduleType::Weekly),
            "custom" => Some(ScheduleType::Custom),
            _ => None,
        }
    }

    /// Minimum interval implied by the schedule type. `Custom` schedules set
    /// their own.
    pub fn default_interval_minutes(&self) -> Option<i32> {
        match self {
            ScheduleType::Hourly => Some(60),
            ScheduleType::Every4h => Some(240),
            ScheduleType::Every8h => Some(480),
            ScheduleType::Daily => Some(1440),
            ScheduleType::Weekly => Some(10080),
            ScheduleType::Custom => None,
        }
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored schedule row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSchedule {
    pub id: UniversalUuid,
    pub project_id: UniversalUuid,
    pub agent_slug: String,
    pub enabled: bool,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub timezone: String,
    /// Start of the allowed time-of-day window (UTC).
    pub run_after_time: Option<NaiveTime>,
    /// End of the allowed time-of-day window (UTC), inclusive.
    pub run_before_time: Option<NaiveTime>,
    pub run_on_days: BTreeSet<u8>,
    pub min_interval_minutes: i32,
    pub max_runs_per_day: i32,
    pub cooldown_after_error_minutes: i32,
    /// Higher runs first.
    pub priority: i32,
    pub allow_concurrent: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub total_runs: i32,
    pub total_successes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one schedule attempt, applied to the running counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Completed or do-nothing. Resets the failure streak.
    Success,
    /// Failed. Extends the failure streak.
    Failure,
}

impl AgentSchedule {
    /// Applies an attempt outcome to the counters.
    ///
    /// Store implementations that cannot express the update as a single SQL
    /// statement use this to keep the counter rules in one place.
    pub fn apply_outcome(&mut self, outcome: ScheduleOutcome, at: DateTime<Utc>) {
        self.last_run_at = Some(at);
        self.total_runs += 1;
        match outcome {
            ScheduleOutcome::Success => {
                self.last_success_at = Some(at);
                self.total_successes += 1;
                self.consecutive_failures = 0;
            }
            ScheduleOutcome::Failure => {
                self.last_failure_at = Some(at);
                self.consecutive_failures += 1;
            }
        }
        self.updated_at = at;
    }
}

/// Fields for creating a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgentSchedule {
    pub project_id: UniversalUuid,
    pub agent_slug: String,
    pub enabled: bool,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub timezone: String,
    pub run_after_time: Option<NaiveTime>,
    pub run_before_time: Option<NaiveTime>,
    pub run_on_days: BTreeSet<u8>,
    pub min_interval_minutes: i32,
    pub max_runs_per_day: i32,
    pub cooldown_after_error_minutes: i32,
    pub priority: i32,
    pub allow_concurrent: bool,
}

impl NewAgentSchedule {
    /// A schedule with the defaults for `schedule_type`: every day, no time
    /// window, the type's minimum interval and a 30 minute error cooldown.
    pub fn new(
        project_id: UniversalUuid,
        agent_slug: impl Into<String>,
        schedule_type: ScheduleType,
    ) -> Self {
        Self {
            project_id,
            agent_slug: agent_slug.into(),
            enabled: true,
            schedule_type,
            cron_expression: None,
            timezone: "UTC".to_string(),
            run_after_time: None,
            run_before_time: None,
            run_on_days: ALL_DAYS.iter().copied().collect(),
            min_interval_minutes: schedule_type.default_interval_minutes().unwrap_or(60),
            max_runs_per_day: 24,
            cooldown_after_error_minutes: 30,
            priority: 0,
            allow_concurrent: false,
        }
    }

    /// Checks the fields a store cannot check for itself.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.agent_slug.trim().is_empty() {
            return Err(OrchestrationError::InvalidSchedule(
                "agent slug must not be empty".into(),
            ));
        }

        match (self.schedule_type, self.cron_expression.as_deref()) {
            (ScheduleType::Custom, None) => {
                return Err(OrchestrationError::InvalidSchedule(
                    "custom schedules require a cron expression".into(),
                ));
            }
            (_, Some(expr)) => {
                croner::Cron::new(expr).parse().map_err(|e| {
                    OrchestrationError::InvalidSchedule(format!(
                        "invalid cron expression '{}': {}",
                        expr, e
                    ))
                })?;
            }
            _ => {}
        }

        chrono_tz::Tz::from_str(&self.timezone).map_err(|_| {
            OrchestrationError::InvalidSchedule(format!("unknown timezone '{}'", self.timezone))
        })?;

        if let Some(day) = self.run_on_days.iter().find(|d| **d > 6) {
            return Err(OrchestrationError::InvalidSchedule(format!(
                "day of week {} out of range 0..=6",
                day
            )));
        }

        if let (Some(after), Some(before)) = (self.run_after_time, self.run_before_time) {
            if after > before {
                return Err(OrchestrationError::InvalidSchedule(format!(
                    "time window {} - {} is inverted",
                    after, before
                )));
            }
        }

        if self.min_interval_minutes < 0
            || self.cooldown_after_error_minutes < 0
            || self.max_runs_per_day < 0
        {
            return Err(OrchestrationError::InvalidSchedule(
                "interval, cooldown and run limits must not be negative".into(),
            ));
        }

        Ok(())
    }
}

/// Encodes a day set for storage.
pub fn encode_days(days: &BTreeSet<u8>) -> String {
    serde_json::to_string(days).unwrap_or_else(|_| "[]".to_string())
}

/// Decodes a stored day set.
pub fn decode_days(raw: &str) -> Result<BTreeSet<u8>, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule() -> AgentSchedule {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        AgentSchedule {
            id: UniversalUuid::new_v4(),
            project_id: UniversalUuid::new_v4(),
            agent_slug: "developer".into(),
            enabled: true,
            schedule_type: ScheduleType::Daily,
            cron_expression: None,
            timezone: "UTC".into(),
            run_after_time: None,
            run_before_time: None,
            run_on_days: ALL_DAYS.iter().copied().collect(),
            min_interval_minutes: 60,
            max_runs_per_day: 24,
            cooldown_after_error_minutes: 30,
            priority: 0,
            allow_concurrent: false,
            last_run_at: None,
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            total_runs: 0,
            total_successes: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_failure_streak_resets_on_success() {
        let mut s = schedule();
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 13, 0, 0).unwrap();

        s.apply_outcome(ScheduleOutcome::Failure, at);
        s.apply_outcome(ScheduleOutcome::Failure, at);
        assert_eq!(s.consecutive_failures, 2);
        assert_eq!(s.last_failure_at, Some(at));

        s.apply_outcome(ScheduleOutcome::Success, at);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.total_runs, 3);
        assert_eq!(s.total_successes, 1);
        assert_eq!(s.last_run_at, Some(at));
    }

    #[test]
    fn test_schedule_type_defaults() {
        assert_eq!(ScheduleType::Every4h.default_interval_minutes(), Some(240));
        assert_eq!(ScheduleType::Custom.default_interval_minutes(), None);
        assert_eq!(ScheduleType::parse("every_8h"), Some(ScheduleType::Every8h));
        assert_eq!(ScheduleType::parse("monthly"), None);

        let json = serde_json::to_string(&ScheduleType::Every4h).unwrap();
        assert_eq!(json, "\"every_4h\"");
    }

    #[test]
    fn test_validate_custom_requires_cron() {
        let project = UniversalUuid::new_v4();
        let mut new = NewAgentSchedule::new(project, "researcher", ScheduleType::Custom);
        assert!(new.validate().is_err());

        new.cron_expression = Some("0 */6 * * *".into());
        assert!(new.validate().is_ok());

        new.cron_expression = Some("not a cron".into());
        assert!(new.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let project = UniversalUuid::new_v4();

        let mut new = NewAgentSchedule::new(project, "seo", ScheduleType::Daily);
        new.timezone = "Mars/Olympus".into();
        assert!(new.validate().is_err());

        let mut new = NewAgentSchedule::new(project, "seo", ScheduleType::Daily);
        new.run_on_days.insert(7);
        assert!(new.validate().is_err());

        let mut new = NewAgentSchedule::new(project, "seo", ScheduleType::Daily);
        new.run_after_time = NaiveTime::from_hms_opt(18, 0, 0);
        new.run_before_time = NaiveTime::from_hms_opt(9, 0, 0);
        assert!(new.validate().is_err());
    }

    #[test]
    fn test_day_encoding() {
        let days: BTreeSet<u8> = [1, 2, 3, 4, 5].into_iter().collect();
        let raw = encode_days(&days);
        assert_eq!(raw, "[1,2,3,4,5]");
        assert_eq!(decode_days(&raw).unwrap(), days);
    }
}
