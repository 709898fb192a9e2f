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

//! Diesel table definitions for the SQLite backend.
//!
//! UUIDs are BLOB, timestamps are fixed-width RFC3339 TEXT, booleans are
//! INTEGER 0/1, and opaque maps are JSON TEXT.

diesel::table! {
    projects (id) {
        id -> Binary,
        name -> Text,
        status -> Text,
        repository -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    agent_action_configs (id) {
        id -> Binary,
        project_id -> Binary,
        agent_slug -> Text,
        action_key -> Text,
        is_enabled -> Integer,
        requires_approval -> Integer,
        risk_level -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    agent_schedules (id) {
        id -> Binary,
        project_id -> Binary,
        agent_slug -> Text,
        is_enabled -> Integer,
        schedule_type -> Text,
        cron_expression -> Nullable<Text>,
        timezone -> Text,
        run_after_time -> Nullable<Text>,
        run_before_time -> Nullable<Text>,
        run_on_days -> Text,
        min_interval_minutes -> Integer,
        max_runs_per_day -> Integer,
        cooldown_after_error_minutes -> Integer,
        priority -> Integer,
        allow_concurrent -> Integer,
        last_run_at -> Nullable<Text>,
        last_success_at -> Nullable<Text>,
        last_failure_at -> Nullable<Text>,
        consecutive_failures -> Integer,
        total_runs -> Integer,
        total_successes -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    orchestration_jobs (id) {
        id -> Binary,
        project_id -> Nullable<Binary>,
        job_type -> Text,
        trigger_source -> Text,
        triggered_by -> Nullable<Text>,
        status -> Text,
        scheduled_at -> Nullable<Text>,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
        timeout_at -> Nullable<Text>,
        duration_ms -> Nullable<BigInt>,
        agents_executed -> Integer,
        agents_succeeded -> Integer,
        agents_failed -> Integer,
        agents_skipped -> Integer,
        tasks_created -> Integer,
        error_message -> Nullable<Text>,
        error_code -> Nullable<Text>,
        attempt -> Integer,
        max_attempts -> Integer,
        input_params -> Text,
        output_summary -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    agent_execution_logs (id) {
        id -> Binary,
        job_id -> Binary,
        schedule_id -> Binary,
        project_id -> Binary,
        agent_slug -> Text,
        phase -> Text,
        status -> Text,
        should_act -> Integer,
        do_nothing_reason -> Nullable<Text>,
        confidence -> Double,
        context_summary -> Text,
        external_data -> Nullable<Text>,
        actions_proposed -> Integer,
        actions_executed -> Integer,
        actions_approved -> Integer,
        actions_rejected -> Integer,
        created_suggestion_ids -> Text,
        error_message -> Nullable<Text>,
        tokens_used -> Integer,
        estimated_cost -> Double,
        started_at -> Text,
        completed_at -> Nullable<Text>,
        duration_ms -> Nullable<BigInt>,
        created_at -> Text,
    }
}

diesel::table! {
    repository_analyses (id) {
        id -> Binary,
        project_id -> Binary,
        period_type -> Text,
        period_start -> Text,
        period_end -> Text,
        analysis -> Text,
        fetched_at -> Text,
        expires_at -> Text,
        is_stale -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    agent_suggestions (id) {
        id -> Binary,
        project_id -> Binary,
        agent_slug -> Text,
        action_key -> Text,
        context -> Text,
        approval_state -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    project_tasks (id) {
        id -> Binary,
        project_id -> Binary,
        title -> Text,
        source_agent -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    queue_entries (id) {
        id -> Binary,
        job_type -> Text,
        payload -> Text,
        priority -> Integer,
        state -> Text,
        attempts_made -> Integer,
        max_attempts -> Integer,
        run_at -> Text,
        orchestration_job_id -> Nullable<Binary>,
        last_error -> Nullable<Text>,
        result -> Nullable<Text>,
        created_at -> Text,
        started_at -> Nullable<Text>,
        finished_at -> Nullable<Text>,
        updated_at -> Text,
    }
}

diesel::joinable!(agent_execution_logs -> orchestration_jobs (job_id));

diesel::allow_tables_to_appear_in_same_query!(
    projects,
    agent_action_configs,
    agent_schedules,
    orchestration_jobs,
    agent_execution_logs,
    repository_analyses,
    agent_suggestions,
    project_tasks,
    queue_entries,
);
