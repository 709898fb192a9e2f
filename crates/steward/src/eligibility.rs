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

//! Schedule eligibility.
//!
//! Decides whether a schedule may run at a given instant. Every check is
//! evaluated in UTC against an injected `now`; nothing here reads the clock
//! or touches storage.
//!
//! Checks run in a fixed order and the first failing one is reported:
//!
//! 1. the UTC day of week (Sunday = 0) must be in `run_on_days`
//! 2. with both window bounds set, the UTC time of day must lie in
//!    `[run_after_time, run_before_time]`, bounds inclusive
//! 3. at least `min_interval_minutes` must have passed since `last_run_at`
//! 4. after a failure streak, at least `cooldown_after_error_minutes` must
//!    have passed since `last_failure_at`

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};
use serde::Serialize;

use crate::models::schedule::AgentSchedule;

/// Result of evaluating a schedule at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    WrongDay {
        day: u8,
    },
    OutsideWindow {
        now: NaiveTime,
        after: NaiveTime,
        before: NaiveTime,
    },
    IntervalNotElapsed {
        remaining_minutes: i64,
    },
    CoolingDown {
        remaining_minutes: i64,
    },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }

    /// Short reason string for logs and execution summaries.
    pub fn reason(&self) -> String {
        match self {
            Eligibility::Eligible => "eligible".to_string(),
            Eligibility::WrongDay { day } => format!("day {} not in run days", day),
            Eligibility::OutsideWindow { now, after, before } => {
                format!("{} outside window {} - {}", now, after, before)
            }
            Eligibility::IntervalNotElapsed { remaining_minutes } => {
                format!("minimum interval not elapsed ({}m remaining)", remaining_minutes)
            }
            Eligibility::CoolingDown { remaining_minutes } => {
                format!("cooling down after failure ({}m remaining)", remaining_minutes)
            }
        }
    }
}

/// Minutes left until `since + wait` is reached, rounded up.
fn remaining(since: DateTime<Utc>, wait: Duration, now: DateTime<Utc>) -> Option<i64> {
    let left = (since + wait) - now;
    if left > Duration::zero() {
        let secs = left.num_seconds();
        Some((secs + 59) / 60)
    } else {
        None
    }
}

/// Evaluates every eligibility check for `schedule` at `now`.
pub fn evaluate_eligibility(schedule: &AgentSchedule, now: DateTime<Utc>) -> Eligibility {
    let day = now.weekday().num_days_from_sunday() as u8;
    if !schedule.run_on_days.contains(&day) {
        return Eligibility::WrongDay { day };
    }

    if let (Some(after), Some(before)) = (schedule.run_after_time, schedule.run_before_time) {
        // Sub-second precision is dropped to match HH:MM:SS bounds.
        let time = now.time().with_nanosecond(0).unwrap_or_else(|| now.time());
        if time < after || time > before {
            return Eligibility::OutsideWindow {
                now: time,
                after,
                before,
            };
        }
    }

    if let Some(last_run) = schedule.last_run_at {
        let interval = Duration::minutes(i64::from(schedule.min_interval_minutes));
        if let Some(remaining_minutes) = remaining(last_run, interval, now) {
            return Eligibility::IntervalNotElapsed { remaining_minutes };
        }
    }

    if schedule.consecutive_failures > 0 {
        if let Some(last_failure) = schedule.last_failure_at {
            let cooldown = Duration::minutes(i64::from(schedule.cooldown_after_error_minutes));
            if let Some(remaining_minutes) = remaining(last_failure, cooldown, now) {
                return Eligibility::CoolingDown { remaining_minutes };
            }
        }
    }

    Eligibility::Eligible
}

/// Boolean view of [`evaluate_eligibility`].
pub fn is_eligible(schedule: &AgentSchedule, now: DateTime<Utc>) -> bool {
    evaluate_eligibility(schedule, now).is_eligible()
}
