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

//! Repository analysis snapshots and their cache records.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::universal_types::UniversalUuid;

/// Metrics derived from repository activity over one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryActivity {
    pub commits: u32,
    pub prs_opened: u32,
    pub prs_merged: u32,
    pub prs_closed: u32,
    pub issues_opened: u32,
    pub issues_closed: u32,
    /// Issues and PRs touched in the window, per label (lowercase).
    #[serde(default)]
    pub label_counts: BTreeMap<String, u32>,
    pub velocity_score: f64,
    /// Paths changed unusually often in the window.
    #[serde(default)]
    pub hotspots: Vec<String>,
    /// Mean time from PR open to merge, if any PR merged.
    pub avg_pr_merge_hours: Option<f64>,
}

impl RepositoryActivity {
    /// Sum of counts for every label in `labels`, ignoring case.
    pub fn label_total<S: AsRef<str>>(&self, labels: &[S]) -> u32 {
        self.label_counts
            .iter()
            .filter(|(name, _)| labels.iter().any(|l| l.as_ref().eq_ignore_ascii_case(name)))
            .map(|(_, count)| *count)
            .sum()
    }
}

/// Granularity of an analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(PeriodType::Daily),
            "weekly" => Some(PeriodType::Weekly),
            "monthly" => Some(PeriodType::Monthly),
            _ => None,
        }
    }

    pub fn length(&self) -> Duration {
        match self {
            PeriodType::Daily => Duration::days(1),
            PeriodType::Weekly => Duration::days(7),
            PeriodType::Monthly => Duration::days(30),
        }
    }
}

/// The time window an analysis covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub period_type: PeriodType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisWindow {
    /// The window of `period_type` length that ends at the next UTC midnight
    /// after `now`.
    ///
    /// Windows are day-aligned so that every job for the same project on the
    /// same day resolves to the same cache key.
    pub fn ending_at(period_type: PeriodType, now: DateTime<Utc>) -> Self {
        let end = now
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc()
            + Duration::days(1);
        Self {
            period_type,
            start: end - period_type.length(),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// A cached analysis row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    pub id: UniversalUuid,
    pub project_id: UniversalUuid,
    pub window: AnalysisWindow,
    pub activity: RepositoryActivity,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_stale: bool,
}

impl CachedAnalysis {
    /// Usable when not stale and not yet expired.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.is_stale && self.expires_at > now
    }
}

/// Upsert payload for the analysis cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCachedAnalysis {
    pub project_id: UniversalUuid,
    pub window: AnalysisWindow,
    pub activity: RepositoryActivity,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_label_total_is_case_insensitive() {
        let mut activity = RepositoryActivity::default();
        activity.label_counts.insert("ui".into(), 2);
        activity.label_counts.insert("ux".into(), 1);
        activity.label_counts.insert("bug".into(), 7);

        assert_eq!(activity.label_total(&["UI", "ux", "design"]), 3);
        assert_eq!(activity.label_total::<&str>(&[]), 0);
    }

    #[test]
    fn test_freshness() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        let mut cached = CachedAnalysis {
            id: UniversalUuid::new_v4(),
            project_id: UniversalUuid::new_v4(),
            window: AnalysisWindow::ending_at(PeriodType::Weekly, now),
            activity: RepositoryActivity::default(),
            fetched_at: now,
            expires_at: now + Duration::hours(1),
            is_stale: false,
        };
        assert!(cached.is_fresh(now));
        assert!(!cached.is_fresh(now + Duration::hours(2)));

        cached.is_stale = true;
        assert!(!cached.is_fresh(now));
    }

    #[test]
    fn test_windows_are_day_aligned() {
        let morning = Utc.with_ymd_and_hms(2025, 6, 2, 9, 15, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2025, 6, 2, 22, 40, 0).unwrap();

        let a = AnalysisWindow::ending_at(PeriodType::Weekly, morning);
        let b = AnalysisWindow::ending_at(PeriodType::Weekly, evening);
        assert_eq!(a, b);
        assert_eq!(a.end, Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap());
        assert_eq!(a.start, Utc.with_ymd_and_hms(2025, 5, 27, 0, 0, 0).unwrap());
        assert!(a.contains(morning));
    }
}
