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

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use steward::error::StoreError;
use steward::models::agent::{ActionConfig, RiskLevel};
use steward::models::analysis::{AnalysisWindow, CachedAnalysis, NewCachedAnalysis};
use steward::models::execution_log::{AgentExecutionLog, NewExecutionLog};
use steward::models::job::{JobCompletion, JobStatus, NewOrchestrationJob, OrchestrationJob};
use steward::models::project::{ActivityCounts, ProjectSnapshot};
use steward::models::schedule::{AgentSchedule, NewAgentSchedule, ScheduleOutcome};
use steward::models::suggestion::{NewSuggestion, Suggestion};
use steward::store::JobFilter;
use steward::{OrchestrationStore, UniversalUuid};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    ListSchedules,
    CreateJob,
    FinalizeJob,
    RecordScheduleOutcome,
    InsertExecutionLog,
    ListActionConfigs,
    CountRecentActivity,
    GetProject,
    FindCachedAnalysis,
    /// Every suggestion insert.
    CreateSuggestion,
    /// Suggestion inserts for one action key only.
    CreateSuggestionFor(String),
}

#[derive(Default)]
struct State {
    projects: HashMap<UniversalUuid, ProjectSnapshot>,
    schedules: Vec<AgentSchedule>,
    jobs: Vec<OrchestrationJob>,
    logs: Vec<AgentExecutionLog>,
    analyses: Vec<CachedAnalysis>,
    action_configs: Vec<ActionConfig>,
    suggestions: Vec<Suggestion>,
    tasks: Vec<(UniversalUuid, DateTime<Utc>)>,
    failures: HashSet<FailurePoint>,
}

/// In-memory [`OrchestrationStore`] with the same status rules as the SQLite
/// store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn injected(point: &FailurePoint) -> StoreError {
    StoreError::Unavailable(format!("injected failure: {:?}", point))
}

fn not_found(entity: &'static str, id: UniversalUuid) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, point: FailurePoint) -> Result<(), StoreError> {
        if self.state.lock().failures.contains(&point) {
            Err(injected(&point))
        } else {
            Ok(())
        }
    }

    pub fn fail_on(&self, point: FailurePoint) {
        self.state.lock().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Adds a project and returns its id.
    pub fn add_project(&self, name: &str, repository: Option<&str>) -> UniversalUuid {
        let id = UniversalUuid::new_v4();
        self.state.lock().projects.insert(
            id,
            ProjectSnapshot {
                id,
                name: name.to_string(),
                status: "active".to_string(),
                repository: repository.map(str::to_string),
            },
        );
        id
    }

    /// Enables `actions` for an agent on a project without approval.
    pub fn enable_actions(&self, project_id: UniversalUuid, agent_slug: &str, actions: &[&str]) {
        for action in actions {
            self.set_action_config(project_id, agent_slug, action, true, false);
        }
    }

    pub fn set_action_config(
        &self,
        project_id: UniversalUuid,
        agent_slug: &str,
        action_key: &str,
        is_enabled: bool,
        requires_approval: bool,
    ) {
        let mut state = self.state.lock();
        state.action_configs.retain(|c| {
            !(c.project_id == project_id && c.agent_slug == agent_slug && c.action_key == action_key)
        });
        state.action_configs.push(ActionConfig {
            id: UniversalUuid::new_v4(),
            project_id,
            agent_slug: agent_slug.to_string(),
            action_key: action_key.to_string(),
            is_enabled,
            requires_approval,
            risk_level: RiskLevel::Low,
            updated_at: Utc::now(),
        });
    }

    /// Records an internally created task for the activity counts.
    pub fn add_task(&self, project_id: UniversalUuid, created_at: DateTime<Utc>) {
        self.state.lock().tasks.push((project_id, created_at));
    }

    /// Inserts a suggestion with an explicit creation time.
    pub fn add_suggestion_at(&self, new: NewSuggestion, created_at: DateTime<Utc>) -> Suggestion {
        let suggestion = Suggestion {
            id: UniversalUuid::new_v4(),
            project_id: new.project_id,
            agent_slug: new.agent_slug,
            action_key: new.action_key,
            context: new.context,
            approval_state: new.approval_state,
            created_at,
        };
        self.state.lock().suggestions.push(suggestion.clone());
        suggestion
    }

    /// Replaces a stored schedule, for setting up run history.
    pub fn put_schedule(&self, schedule: AgentSchedule) {
        let mut state = self.state.lock();
        state.schedules.retain(|s| s.id != schedule.id);
        state.schedules.push(schedule);
    }

    pub fn schedule(&self, id: UniversalUuid) -> Option<AgentSchedule> {
        self.state.lock().schedules.iter().find(|s| s.id == id).cloned()
    }

    pub fn jobs(&self) -> Vec<OrchestrationJob> {
        self.state.lock().jobs.clone()
    }

    pub fn execution_logs(&self) -> Vec<AgentExecutionLog> {
        self.state.lock().logs.clone()
    }

    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.state.lock().suggestions.clone()
    }

    pub fn cached_analyses(&self) -> Vec<CachedAnalysis> {
        self.state.lock().analyses.clone()
    }
}

#[async_trait]
impl OrchestrationStore for MemoryStore {
    async fn create_schedule(&self, new: NewAgentSchedule) -> Result<AgentSchedule, StoreError> {
        let now = Utc::now();
        let schedule = AgentSchedule {
            id: UniversalUuid::new_v4(),
            project_id: new.project_id,
            agent_slug: new.agent_slug,
            enabled: new.enabled,
            schedule_type: new.schedule_type,
            cron_expression: new.cron_expression,
            timezone: new.timezone,
            run_after_time: new.run_after_time,
            run_before_time: new.run_before_time,
            run_on_days: new.run_on_days,
            min_interval_minutes: new.min_interval_minutes,
            max_runs_per_day: new.max_runs_per_day,
            cooldown_after_error_minutes: new.cooldown_after_error_minutes,
            priority: new.priority,
            allow_concurrent: new.allow_concurrent,
            last_run_at: None,
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            total_runs: 0,
            total_successes: 0,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().schedules.push(schedule.clone());
        Ok(schedule)
    }

    async fn get_schedule(&self, id: UniversalUuid) -> Result<Option<AgentSchedule>, StoreError> {
        Ok(self.schedule(id))
    }

    async fn list_enabled_schedules(
        &self,
        project_id: UniversalUuid,
    ) -> Result<Vec<AgentSchedule>, StoreError> {
        self.check(FailurePoint::ListSchedules)?;
        let mut schedules: Vec<AgentSchedule> = self
            .state
            .lock()
            .schedules
            .iter()
            .filter(|s| s.project_id == project_id && s.enabled)
            .cloned()
            .collect();
        schedules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(schedules)
    }

    async fn record_schedule_outcome(
        &self,
        schedule_id: UniversalUuid,
        outcome: ScheduleOutcome,
        at: DateTime<Utc>,
    ) -> Result<AgentSchedule, StoreError> {
        self.check(FailurePoint::RecordScheduleOutcome)?;
        let mut state = self.state.lock();
        let schedule = state
            .schedules
            .iter_mut()
            .find(|s| s.id == schedule_id)
            .ok_or_else(|| not_found("schedule", schedule_id))?;
        schedule.apply_outcome(outcome, at);
        Ok(schedule.clone())
    }

    async fn list_projects_with_enabled_schedules(&self) -> Result<Vec<UniversalUuid>, StoreError> {
        let projects: BTreeSet<UniversalUuid> = self
            .state
            .lock()
            .schedules
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.project_id)
            .collect();
        Ok(projects.into_iter().collect())
    }

    async fn create_job(&self, new: NewOrchestrationJob) -> Result<OrchestrationJob, StoreError> {
        self.check(FailurePoint::CreateJob)?;
        let now = Utc::now();
        let job = OrchestrationJob {
            id: UniversalUuid::new_v4(),
            project_id: new.project_id,
            job_type: new.job_type,
            trigger_source: new.trigger_source,
            triggered_by: new.triggered_by,
            status: new.status,
            scheduled_at: new.scheduled_at,
            started_at: new.started_at,
            completed_at: None,
            timeout_at: new.timeout_at,
            duration_ms: None,
            agents_executed: 0,
            agents_succeeded: 0,
            agents_failed: 0,
            agents_skipped: 0,
            tasks_created: 0,
            error_message: None,
            error_code: None,
            attempt: new.attempt,
            max_attempts: new.max_attempts,
            input_params: new.input_params,
            output_summary: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().jobs.push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: UniversalUuid) -> Result<Option<OrchestrationJob>, StoreError> {
        Ok(self.state.lock().jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<OrchestrationJob>, StoreError> {
        let mut jobs: Vec<OrchestrationJob> = self
            .state
            .lock()
            .jobs
            .iter()
            .filter(|j| filter.project_id.map_or(true, |p| j.project_id == Some(p)))
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn start_job(
        &self,
        id: UniversalUuid,
        started_at: DateTime<Utc>,
        timeout_at: Option<DateTime<Utc>>,
    ) -> Result<OrchestrationJob, StoreError> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| not_found("job", id))?;
        if !job.status.can_transition_to(JobStatus::Running) {
            return Err(StoreError::InvalidStatusTransition {
                from: job.status.to_string(),
                to: JobStatus::Running.to_string(),
            });
        }
        job.status = JobStatus::Running;
        job.started_at = Some(started_at);
        job.timeout_at = timeout_at;
        job.updated_at = started_at;
        Ok(job.clone())
    }

    async fn finalize_job(
        &self,
        id: UniversalUuid,
        completion: JobCompletion,
    ) -> Result<OrchestrationJob, StoreError> {
        self.check(FailurePoint::FinalizeJob)?;
        let mut state = self.state.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| not_found("job", id))?;
        if !job.status.can_transition_to(completion.status) {
            return Err(StoreError::InvalidStatusTransition {
                from: job.status.to_string(),
                to: completion.status.to_string(),
            });
        }
        let c = &completion.counters;
        job.status = completion.status;
        job.completed_at = Some(completion.completed_at);
        job.duration_ms = completion.duration_ms;
        job.agents_executed = c.agents_executed;
        job.agents_succeeded = c.agents_succeeded;
        job.agents_failed = c.agents_failed;
        job.agents_skipped = c.agents_skipped;
        job.tasks_created = c.tasks_created;
        job.error_message = completion.error_message;
        job.error_code = completion.error_code;
        job.output_summary = completion.output_summary;
        job.updated_at = completion.completed_at;
        Ok(job.clone())
    }

    async fn expire_overdue_jobs(&self, now: DateTime<Utc>) -> Result<Vec<UniversalUuid>, StoreError> {
        let mut expired = Vec::new();
        for job in self.state.lock().jobs.iter_mut() {
            if job.status == JobStatus::Running && job.timeout_at.is_some_and(|t| t <= now) {
                job.status = JobStatus::Timeout;
                job.completed_at = Some(now);
                job.error_code = Some("JOB_TIMEOUT".to_string());
                job.error_message = Some("job exceeded its deadline".to_string());
                job.updated_at = now;
                expired.push(job.id);
            }
        }
        Ok(expired)
    }

    async fn count_jobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self
            .state
            .lock()
            .jobs
            .iter()
            .filter(|j| j.status.is_terminal() && j.created_at < cutoff)
            .count())
    }

    async fn delete_jobs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        let doomed: HashSet<UniversalUuid> = state
            .jobs
            .iter()
            .filter(|j| j.status.is_terminal() && j.created_at < cutoff)
            .map(|j| j.id)
            .collect();
        state.logs.retain(|l| !doomed.contains(&l.job_id));
        state.jobs.retain(|j| !doomed.contains(&j.id));
        Ok(doomed.len())
    }

    async fn insert_execution_log(
        &self,
        log: NewExecutionLog,
    ) -> Result<AgentExecutionLog, StoreError> {
        self.check(FailurePoint::InsertExecutionLog)?;
        let row = AgentExecutionLog {
            id: UniversalUuid::new_v4(),
            job_id: log.job_id,
            schedule_id: log.schedule_id,
            project_id: log.project_id,
            agent_slug: log.agent_slug,
            phase: log.phase,
            status: log.status,
            should_act: log.should_act,
            do_nothing_reason: log.do_nothing_reason,
            confidence: log.confidence,
            context_summary: log.context_summary,
            external_data: log.external_data,
            actions_proposed: log.actions_proposed,
            actions_executed: log.actions_executed,
            actions_approved: log.actions_approved,
            actions_rejected: log.actions_rejected,
            created_suggestion_ids: log.created_suggestion_ids,
            error_message: log.error_message,
            tokens_used: log.tokens_used,
            estimated_cost: log.estimated_cost,
            started_at: log.started_at,
            completed_at: log.completed_at,
            duration_ms: log.duration_ms,
            created_at: Utc::now(),
        };
        self.state.lock().logs.push(row.clone());
        Ok(row)
    }

    async fn list_execution_logs(
        &self,
        job_id: UniversalUuid,
    ) -> Result<Vec<AgentExecutionLog>, StoreError> {
        Ok(self
            .state
            .lock()
            .logs
            .iter()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn find_cached_analysis(
        &self,
        project_id: UniversalUuid,
        window: &AnalysisWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedAnalysis>, StoreError> {
        self.check(FailurePoint::FindCachedAnalysis)?;
        Ok(self
            .state
            .lock()
            .analyses
            .iter()
            .filter(|a| {
                a.project_id == project_id
                    && a.window.period_type == window.period_type
                    && a.is_fresh(now)
                    && window.contains(a.window.start)
            })
            .max_by_key(|a| a.fetched_at)
            .cloned())
    }

    async fn upsert_cached_analysis(
        &self,
        new: NewCachedAnalysis,
    ) -> Result<CachedAnalysis, StoreError> {
        let mut state = self.state.lock();
        state.analyses.retain(|a| {
            !(a.project_id == new.project_id
                && a.window.period_type == new.window.period_type
                && a.window.start == new.window.start)
        });
        let row = CachedAnalysis {
            id: UniversalUuid::new_v4(),
            project_id: new.project_id,
            window: new.window,
            activity: new.activity,
            fetched_at: new.fetched_at,
            expires_at: new.expires_at,
            is_stale: false,
        };
        state.analyses.push(row.clone());
        Ok(row)
    }

    async fn mark_analyses_stale(&self, project_id: UniversalUuid) -> Result<usize, StoreError> {
        let mut marked = 0;
        for analysis in self.state.lock().analyses.iter_mut() {
            if analysis.project_id == project_id && !analysis.is_stale {
                analysis.is_stale = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn get_project(&self, id: UniversalUuid) -> Result<Option<ProjectSnapshot>, StoreError> {
        self.check(FailurePoint::GetProject)?;
        Ok(self.state.lock().projects.get(&id).cloned())
    }

    async fn list_action_configs(
        &self,
        project_id: UniversalUuid,
        agent_slug: &str,
    ) -> Result<Vec<ActionConfig>, StoreError> {
        self.check(FailurePoint::ListActionConfigs)?;
        let mut configs: Vec<ActionConfig> = self
            .state
            .lock()
            .action_configs
            .iter()
            .filter(|c| c.project_id == project_id && c.agent_slug == agent_slug)
            .cloned()
            .collect();
        configs.sort_by(|a, b| a.action_key.cmp(&b.action_key));
        Ok(configs)
    }

    async fn count_recent_activity(
        &self,
        project_id: UniversalUuid,
        since: DateTime<Utc>,
    ) -> Result<ActivityCounts, StoreError> {
        self.check(FailurePoint::CountRecentActivity)?;
        let state = self.state.lock();
        Ok(ActivityCounts {
            suggestions: state
                .suggestions
                .iter()
                .filter(|s| s.project_id == project_id && s.created_at >= since)
                .count() as u32,
            tasks: state
                .tasks
                .iter()
                .filter(|(p, at)| *p == project_id && *at >= since)
                .count() as u32,
        })
    }

    async fn latest_suggestion_by_action(
        &self,
        project_id: UniversalUuid,
        agent_slug: &str,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, StoreError> {
        let mut latest: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for s in self
            .state
            .lock()
            .suggestions
            .iter()
            .filter(|s| s.project_id == project_id && s.agent_slug == agent_slug)
        {
            let at = latest.entry(s.action_key.clone()).or_insert(s.created_at);
            if s.created_at > *at {
                *at = s.created_at;
            }
        }
        Ok(latest)
    }

    async fn create_suggestion(&self, new: NewSuggestion) -> Result<Suggestion, StoreError> {
        self.check(FailurePoint::CreateSuggestion)?;
        self.check(FailurePoint::CreateSuggestionFor(new.action_key.clone()))?;
        Ok(self.add_suggestion_at(new, Utc::now()))
    }

    async fn list_suggestions(&self, project_id: UniversalUuid) -> Result<Vec<Suggestion>, StoreError> {
        let mut suggestions: Vec<Suggestion> = self
            .state
            .lock()
            .suggestions
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        suggestions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(suggestions)
    }
}
