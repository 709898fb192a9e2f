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

//! # Batch Coordinator
//!
//! Runs one full pass over a project's enabled schedules.
//!
//! ## Job lifecycle
//!
//! ```text
//! created/queued -> running -> completed | failed
//! ```
//!
//! A job fails only when something escapes the schedule loop (for example
//! the schedules cannot be loaded) or when every attempted schedule failed.
//! Individual schedule failures are recorded on their execution log and on
//! the schedule's failure streak, and the loop moves on.
//!
//! ## Per-schedule phases
//!
//! Each eligible schedule walks `analyze -> decide -> execute -> verify ->
//! complete`. The execution log is written once, at the end of the attempt
//! or at the point of failure, and the schedule's run counters are updated
//! immediately after, so a crash mid-batch leaves every attempted schedule
//! correctly accounted for.
//!
//! Schedules run sequentially in priority order. The job deadline is checked
//! between schedules; once it passes, the remaining schedules are skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::agents::{AgentRegistry, StaticAgentRegistry};
use crate::analysis::{RepositoryAnalyzer, RepositoryMetricsSource, UnavailableMetricsSource};
use crate::config::CoordinatorConfig;
use crate::context::ContextBuilder;
use crate::database::universal_types::UniversalUuid;
use crate::decision::DecisionEngine;
use crate::eligibility::evaluate_eligibility;
use crate::error::OrchestrationError;
use crate::executor::TaskExecutor;
use crate::models::agent::AgentConfig;
use crate::models::analysis::RepositoryActivity;
use crate::models::execution_log::{ExecutionPhase, ExecutionStatus, NewExecutionLog};
use crate::models::job::{
    JobCompletion, JobCounters, JobStatus, JobType, NewOrchestrationJob, OrchestrationJob,
    TriggerSource,
};
use crate::models::schedule::{AgentSchedule, ScheduleOutcome};
use crate::store::OrchestrationStore;

/// Parameters of one coordinator invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub project_id: UniversalUuid,
    pub trigger_source: TriggerSource,
    pub triggered_by: Option<String>,
    /// A job record created ahead of time, usually by the queue. When unset
    /// a new job is created in `running` state.
    pub job_id: Option<UniversalUuid>,
    pub input_params: Map<String, Value>,
    /// Attempt number recorded on a newly created job.
    pub attempt: i32,
    pub max_attempts: i32,
}

impl BatchRequest {
    pub fn new(project_id: UniversalUuid, trigger_source: TriggerSource) -> Self {
        Self {
            project_id,
            trigger_source,
            triggered_by: None,
            job_id: None,
            input_params: Map::new(),
            attempt: 1,
            max_attempts: 1,
        }
    }

    pub fn triggered_by(mut self, user: Option<String>) -> Self {
        self.triggered_by = user;
        self
    }

    pub fn for_job(mut self, job_id: UniversalUuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn attempt(mut self, attempt: i32, max_attempts: i32) -> Self {
        self.attempt = attempt;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.input_params = params;
        self
    }
}

/// What happened to one schedule in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub schedule_id: UniversalUuid,
    pub agent_slug: String,
    /// `skipped`, `completed`, `do_nothing` or `failed`.
    pub status: ExecutionStatus,
    /// Skip reason, do-nothing reason or error message.
    pub detail: Option<String>,
    pub tasks_created: i32,
}

impl ScheduleResult {
    fn skipped(schedule: &AgentSchedule, reason: impl Into<String>) -> Self {
        Self {
            schedule_id: schedule.id,
            agent_slug: schedule.agent_slug.clone(),
            status: ExecutionStatus::Skipped,
            detail: Some(reason.into()),
            tasks_created: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOrchestrationResult {
    pub job_id: UniversalUuid,
    pub project_id: UniversalUuid,
    pub status: JobStatus,
    pub success: bool,
    /// Always `agents_succeeded + agents_failed`.
    pub agents_executed: i32,
    pub agents_succeeded: i32,
    pub agents_failed: i32,
    pub agents_skipped: i32,
    pub tasks_created: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub schedules: Vec<ScheduleResult>,
}

#[derive(Debug, Default)]
struct BatchTally {
    counters: JobCounters,
    schedules: Vec<ScheduleResult>,
    errors: Vec<String>,
    schedules_total: usize,
    analysis_available: bool,
    deadline_reached: bool,
}

impl BatchTally {
    fn skip(&mut self, result: ScheduleResult) {
        self.counters.agents_skipped += 1;
        self.schedules.push(result);
    }

    fn record(&mut self, result: ScheduleResult) {
        self.counters.agents_executed += 1;
        self.counters.tasks_created += result.tasks_created;
        if result.status == ExecutionStatus::Failed {
            self.counters.agents_failed += 1;
            if let Some(detail) = &result.detail {
                self.errors.push(format!("{}: {}", result.agent_slug, detail));
            }
        } else {
            self.counters.agents_succeeded += 1;
        }
        self.schedules.push(result);
    }

    fn final_status(&self) -> JobStatus {
        if self.counters.agents_failed > 0 && self.counters.agents_succeeded == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }

    fn output_summary(&self, trigger: TriggerSource) -> Map<String, Value> {
        let mut summary = Map::new();
        summary.insert("schedules_total".into(), json!(self.schedules_total));
        summary.insert("agents_skipped".into(), json!(self.counters.agents_skipped));
        summary.insert("analysis_available".into(), json!(self.analysis_available));
        summary.insert("deadline_reached".into(), json!(self.deadline_reached));
        summary.insert("trigger_source".into(), json!(trigger.as_str()));
        summary
    }
}

/// Runs batch passes. Construct once and share behind an `Arc`.
pub struct BatchCoordinator {
    store: Arc<dyn OrchestrationStore>,
    agents: Arc<dyn AgentRegistry>,
    engine: Arc<DecisionEngine>,
    analyzer: RepositoryAnalyzer,
    context_builder: ContextBuilder,
    executor: TaskExecutor,
    config: CoordinatorConfig,
}

pub struct BatchCoordinatorBuilder {
    store: Arc<dyn OrchestrationStore>,
    agents: Option<Arc<dyn AgentRegistry>>,
    engine: Option<DecisionEngine>,
    metrics_source: Option<Arc<dyn RepositoryMetricsSource>>,
    config: CoordinatorConfig,
}

impl BatchCoordinatorBuilder {
    pub fn agent_registry(mut self, agents: Arc<dyn AgentRegistry>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn decision_engine(mut self, engine: DecisionEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn metrics_source(mut self, source: Arc<dyn RepositoryMetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> BatchCoordinator {
        let source = self
            .metrics_source
            .unwrap_or_else(|| Arc::new(UnavailableMetricsSource));
        BatchCoordinator {
            analyzer: RepositoryAnalyzer::new(
                self.store.clone(),
                source,
                self.config.analysis_period(),
                self.config.analysis_cache_ttl(),
            ),
            context_builder: ContextBuilder::new(self.store.clone(), self.config.activity_lookback()),
            executor: TaskExecutor::new(self.store.clone()),
            agents: self
                .agents
                .unwrap_or_else(|| Arc::new(StaticAgentRegistry::new())),
            engine: Arc::new(self.engine.unwrap_or_default()),
            store: self.store,
            config: self.config,
        }
    }
}

impl BatchCoordinator {
    /// Builder with the built-in agents, default thresholds and no metrics
    /// source.
    pub fn builder(store: Arc<dyn OrchestrationStore>) -> BatchCoordinatorBuilder {
        BatchCoordinatorBuilder {
            store,
            agents: None,
            engine: None,
            metrics_source: None,
            config: CoordinatorConfig::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn OrchestrationStore> {
        &self.store
    }

    pub fn analyzer(&self) -> &RepositoryAnalyzer {
        &self.analyzer
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Synchronous entry point: one batch for `project_id`.
    pub async fn run_batch_orchestration(
        &self,
        project_id: UniversalUuid,
        trigger_source: TriggerSource,
        triggered_by: Option<String>,
    ) -> Result<BatchOrchestrationResult, OrchestrationError> {
        self.run(BatchRequest::new(project_id, trigger_source).triggered_by(triggered_by))
            .await
    }

    /// Runs a batch. Job-level failures are persisted on the job and then
    /// returned so a retry policy can apply.
    pub async fn run(&self, request: BatchRequest) -> Result<BatchOrchestrationResult, OrchestrationError> {
        let started = Utc::now();
        let job = self.open_job(&request, JobType::Batch, started).await?;
        info!(
            "Starting batch job {} for project {} (trigger: {})",
            job.id, request.project_id, request.trigger_source
        );

        match self.process(&job, request.project_id, started).await {
            Ok(tally) => {
                self.close_job(&job, request.project_id, request.trigger_source, tally, started)
                    .await
            }
            Err(e) => {
                error!("Batch job {} failed: {}", job.id, e);
                self.fail_job(&job, &e, started).await;
                metrics::counter!("steward_batch_runs_total", "status" => "failed").increment(1);
                Err(e)
            }
        }
    }

    /// Refreshes the repository analysis for a project under its own job
    /// record, bypassing the cache.
    pub async fn run_analysis(
        &self,
        request: BatchRequest,
    ) -> Result<BatchOrchestrationResult, OrchestrationError> {
        let started = Utc::now();
        let job = self.open_job(&request, JobType::GithubAnalysis, started).await?;

        match self.analyzer.refresh(request.project_id, started).await {
            Ok(activity) => {
                let tally = BatchTally {
                    analysis_available: activity.is_some(),
                    ..Default::default()
                };
                self.close_job(&job, request.project_id, request.trigger_source, tally, started)
                    .await
            }
            Err(e) => {
                warn!("Analysis job {} failed: {}", job.id, e);
                self.fail_job(&job, &e, started).await;
                Err(e)
            }
        }
    }

    /// Moves running jobs past their deadline to `timeout`.
    pub async fn expire_overdue_jobs(&self) -> Result<Vec<UniversalUuid>, OrchestrationError> {
        let expired = self.store.expire_overdue_jobs(Utc::now()).await?;
        if !expired.is_empty() {
            warn!("Expired {} overdue jobs", expired.len());
        }
        Ok(expired)
    }

    /// Deletes terminal jobs older than `older_than`, or only counts them
    /// when `dry_run` is set.
    pub async fn cleanup_jobs(
        &self,
        older_than: Duration,
        dry_run: bool,
    ) -> Result<usize, OrchestrationError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| OrchestrationError::Internal(format!("retention out of range: {}", e)))?;
        let cutoff = Utc::now() - age;
        if dry_run {
            return Ok(self.store.count_jobs_older_than(cutoff).await?);
        }
        let deleted = self.store.delete_jobs_older_than(cutoff).await?;
        info!("Deleted {} jobs created before {}", deleted, cutoff);
        Ok(deleted)
    }

    async fn open_job(
        &self,
        request: &BatchRequest,
        job_type: JobType,
        started: DateTime<Utc>,
    ) -> Result<OrchestrationJob, OrchestrationError> {
        let timeout_at = self
            .config
            .job_timeout()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| started + d);

        let job = match request.job_id {
            Some(id) => self.store.start_job(id, started, timeout_at).await?,
            None => {
                let mut new = NewOrchestrationJob::new(Some(request.project_id), job_type, request.trigger_source);
                new.triggered_by = request.triggered_by.clone();
                new.status = JobStatus::Running;
                new.started_at = Some(started);
                new.timeout_at = timeout_at;
                new.input_params = request.input_params.clone();
                new.attempt = request.attempt;
                new.max_attempts = request.max_attempts;
                self.store.create_job(new).await?
            }
        };
        Ok(job)
    }

    async fn process(
        &self,
        job: &OrchestrationJob,
        project_id: UniversalUuid,
        started: DateTime<Utc>,
    ) -> Result<BatchTally, OrchestrationError> {
        let mut schedules = self.store.list_enabled_schedules(project_id).await?;
        schedules.retain(|s| s.enabled);
        schedules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut tally = BatchTally {
            schedules_total: schedules.len(),
            ..Default::default()
        };
        if schedules.is_empty() {
            info!("Project {} has no enabled schedules", project_id);
            return Ok(tally);
        }

        let analysis = match self.analyzer.get_analysis(project_id, started).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Repository analysis unavailable for project {}: {}", project_id, e);
                None
            }
        };
        tally.analysis_available = analysis.is_some();

        for schedule in &schedules {
            let now = Utc::now();
            if job.timeout_at.is_some_and(|deadline| now >= deadline) {
                tally.deadline_reached = true;
                tally.skip(ScheduleResult::skipped(schedule, "job deadline passed"));
                continue;
            }

            let eligibility = evaluate_eligibility(schedule, now);
            if !eligibility.is_eligible() {
                debug!(
                    "Skipping {} for project {}: {}",
                    schedule.agent_slug,
                    project_id,
                    eligibility.reason()
                );
                tally.skip(ScheduleResult::skipped(schedule, eligibility.reason()));
                continue;
            }

            let Some(agent) = self.agents.get_agent(&schedule.agent_slug) else {
                warn!(
                    "Agent '{}' is not registered, skipping schedule {}",
                    schedule.agent_slug, schedule.id
                );
                tally.skip(ScheduleResult::skipped(schedule, "agent not registered"));
                continue;
            };

            let result = self
                .execute_agent_task(job.id, schedule, &agent, analysis.as_ref())
                .await;

            let outcome = if result.status == ExecutionStatus::Failed {
                ScheduleOutcome::Failure
            } else {
                ScheduleOutcome::Success
            };
            if let Err(e) = self
                .store
                .record_schedule_outcome(schedule.id, outcome, Utc::now())
                .await
            {
                warn!("Failed to update run counters for schedule {}: {}", schedule.id, e);
            }
            tally.record(result);
        }

        if tally.deadline_reached {
            warn!("Batch job {} reached its deadline before finishing", job.id);
        }
        Ok(tally)
    }

    /// Runs one schedule through every phase and persists its execution log.
    async fn execute_agent_task(
        &self,
        job_id: UniversalUuid,
        schedule: &AgentSchedule,
        agent: &AgentConfig,
        analysis: Option<&RepositoryActivity>,
    ) -> ScheduleResult {
        let mut log = NewExecutionLog::start(
            job_id,
            schedule.id,
            schedule.project_id,
            agent.slug.clone(),
            Utc::now(),
        );

        if let Err(e) = self.run_phases(&mut log, schedule, agent, analysis).await {
            warn!(
                "Agent {} failed in {} phase for project {}: {}",
                agent.slug,
                log.phase.as_str(),
                schedule.project_id,
                e
            );
            log.fail(e.to_string(), Utc::now());
        }

        let result = ScheduleResult {
            schedule_id: schedule.id,
            agent_slug: agent.slug.clone(),
            status: log.status,
            detail: log
                .error_message
                .clone()
                .or_else(|| log.do_nothing_reason.clone()),
            tasks_created: log.actions_executed,
        };

        metrics::counter!("steward_schedule_runs_total", "status" => log.status.as_str())
            .increment(1);
        if let Err(e) = self.store.insert_execution_log(log).await {
            error!("Failed to persist execution log for schedule {}: {}", schedule.id, e);
        }
        result
    }

    async fn run_phases(
        &self,
        log: &mut NewExecutionLog,
        schedule: &AgentSchedule,
        agent: &AgentConfig,
        analysis: Option<&RepositoryActivity>,
    ) -> Result<(), OrchestrationError> {
        let project_id = schedule.project_id;

        let action_configs = self.store.list_action_configs(project_id, &agent.slug).await?;
        let ctx = self
            .context_builder
            .build(project_id, agent, analysis, action_configs, Utc::now())
            .await?;
        log.context_summary = ctx.summary();
        log.external_data = ctx.external_data();

        log.advance(ExecutionPhase::Decide);
        let decision = self.engine.decide(&agent.slug, &ctx);
        log.should_act = decision.should_act;
        log.confidence = decision.confidence;
        log.actions_proposed = decision.suggested_actions.len() as i32;
        if !decision.should_act {
            debug!("{} does nothing for project {}: {}", agent.slug, project_id, decision.reason);
            log.do_nothing(decision.reason, Utc::now());
            return Ok(());
        }

        log.advance(ExecutionPhase::Execute);
        let outcome = self.executor.execute(&ctx, &decision).await;
        log.actions_executed = outcome.actions_executed;
        log.actions_approved = outcome.actions_approved;
        log.actions_rejected = outcome.actions_rejected;
        log.created_suggestion_ids = outcome.created_suggestion_ids.clone();

        log.advance(ExecutionPhase::Verify);
        if outcome.actions_executed == 0 && outcome.has_failures() {
            let details: Vec<String> = outcome
                .failures
                .iter()
                .map(|(action, err)| format!("{}: {}", action, err))
                .collect();
            return Err(OrchestrationError::Verification(format!(
                "no suggestions created ({})",
                details.join("; ")
            )));
        }

        info!(
            "{} created {} of {} proposed suggestions for project {}",
            agent.slug, outcome.actions_executed, log.actions_proposed, project_id
        );
        log.complete(Utc::now());
        Ok(())
    }

    async fn close_job(
        &self,
        job: &OrchestrationJob,
        project_id: UniversalUuid,
        trigger: TriggerSource,
        tally: BatchTally,
        started: DateTime<Utc>,
    ) -> Result<BatchOrchestrationResult, OrchestrationError> {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started).num_milliseconds().max(0);
        let status = tally.final_status();
        let error = (status == JobStatus::Failed).then(|| tally.errors.join("; "));

        self.store
            .finalize_job(
                job.id,
                JobCompletion {
                    status,
                    completed_at,
                    duration_ms: Some(duration_ms),
                    counters: tally.counters.clone(),
                    error_message: error.clone(),
                    error_code: error.as_ref().map(|_| "ALL_AGENTS_FAILED".to_string()),
                    output_summary: Some(tally.output_summary(trigger)),
                },
            )
            .await?;

        metrics::counter!("steward_batch_runs_total", "status" => status.as_str()).increment(1);
        metrics::histogram!("steward_batch_duration_ms").record(duration_ms as f64);
        info!(
            "Batch job {} {}: {} executed, {} succeeded, {} failed, {} skipped, {} tasks in {}ms",
            job.id,
            status,
            tally.counters.agents_executed,
            tally.counters.agents_succeeded,
            tally.counters.agents_failed,
            tally.counters.agents_skipped,
            tally.counters.tasks_created,
            duration_ms
        );

        Ok(BatchOrchestrationResult {
            job_id: job.id,
            project_id,
            status,
            success: status == JobStatus::Completed,
            agents_executed: tally.counters.agents_executed,
            agents_succeeded: tally.counters.agents_succeeded,
            agents_failed: tally.counters.agents_failed,
            agents_skipped: tally.counters.agents_skipped,
            tasks_created: tally.counters.tasks_created,
            duration_ms,
            error,
            schedules: tally.schedules,
        })
    }

    async fn fail_job(&self, job: &OrchestrationJob, err: &OrchestrationError, started: DateTime<Utc>) {
        let completed_at = Utc::now();
        let completion = JobCompletion {
            duration_ms: Some((completed_at - started).num_milliseconds().max(0)),
            error_message: Some(err.to_string()),
            error_code: Some(err.error_code().to_string()),
            ..JobCompletion::bare(JobStatus::Failed, completed_at)
        };
        if let Err(e) = self.store.finalize_job(job.id, completion).await {
            error!("Failed to finalize job {} as failed: {}", job.id, e);
        }
    }
}
