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

//! Process-local queue backend. Entries are lost when the process exits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::backend::QueueBackend;
use super::entry::{JobProcessResult, NewQueueEntry, QueueCounts, QueueEntry, QueueEntryState};
use crate::database::universal_types::UniversalUuid;
use crate::error::QueueError;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<UniversalUuid, QueueEntry>,
    // Insertion order, used as the final claim tie-breaker.
    sequence: HashMap<UniversalUuid, u64>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryQueueBackend {
    inner: Mutex<Inner>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn not_found(id: UniversalUuid) -> QueueError {
    QueueError::NotFound(id.to_string())
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn push(&self, new: NewQueueEntry) -> Result<QueueEntry, QueueError> {
        let entry = QueueEntry {
            id: UniversalUuid::new_v4(),
            data: new.data,
            priority: new.priority,
            state: new.state,
            attempts_made: 0,
            max_attempts: new.max_attempts,
            run_at: new.run_at,
            orchestration_job_id: new.orchestration_job_id,
            last_error: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.sequence.insert(entry.id, seq);
        inner.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueEntry>, QueueError> {
        let mut inner = self.inner.lock();
        let candidate = inner
            .entries
            .values()
            .filter(|e| e.state.is_pending() && e.run_at <= now)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.run_at.cmp(&b.run_at))
                    .then(inner.sequence.get(&a.id).cmp(&inner.sequence.get(&b.id)))
            })
            .map(|e| e.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let entry = inner.entries.get_mut(&id).ok_or_else(|| not_found(id))?;
        entry.state = QueueEntryState::Active;
        entry.attempts_made += 1;
        entry.started_at = Some(now);
        Ok(Some(entry.clone()))
    }

    async fn complete(
        &self,
        id: UniversalUuid,
        result: JobProcessResult,
        at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&id).ok_or_else(|| not_found(id))?;
        entry.state = QueueEntryState::Completed;
        entry.result = Some(result);
        entry.finished_at = Some(at);
        Ok(())
    }

    async fn fail(
        &self,
        id: UniversalUuid,
        error: String,
        retry_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&id).ok_or_else(|| not_found(id))?;
        entry.last_error = Some(error);
        match retry_at {
            Some(retry_at) => {
                entry.state = QueueEntryState::Delayed;
                entry.run_at = retry_at;
            }
            None => {
                entry.state = QueueEntryState::Failed;
                entry.finished_at = Some(at);
            }
        }
        Ok(entry.clone())
    }

    async fn link_job(&self, id: UniversalUuid, job_id: UniversalUuid) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&id).ok_or_else(|| not_found(id))?;
        entry.orchestration_job_id = Some(job_id);
        Ok(())
    }

    async fn get(&self, id: UniversalUuid) -> Result<Option<QueueEntry>, QueueError> {
        Ok(self.inner.lock().entries.get(&id).cloned())
    }

    async fn list(
        &self,
        state: QueueEntryState,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let inner = self.inner.lock();
        let mut entries: Vec<QueueEntry> = inner
            .entries
            .values()
            .filter(|e| e.state == state)
            .cloned()
            .collect();
        entries.sort_by_key(|e| inner.sequence.get(&e.id).copied());
        entries.truncate(limit);
        Ok(entries)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let inner = self.inner.lock();
        let mut counts = QueueCounts::default();
        for entry in inner.entries.values() {
            counts.add(entry.state, 1);
        }
        Ok(counts)
    }

    async fn remove(&self, id: UniversalUuid) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock();
        inner.sequence.remove(&id);
        Ok(inner.entries.remove(&id).is_some())
    }

    async fn reset_for_retry(
        &self,
        id: UniversalUuid,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&id).ok_or_else(|| not_found(id))?;
        if entry.state != QueueEntryState::Failed {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                state: entry.state.to_string(),
                action: "retried",
            });
        }
        entry.state = QueueEntryState::Waiting;
        entry.attempts_made = 0;
        entry.run_at = now;
        entry.last_error = None;
        entry.started_at = None;
        entry.finished_at = None;
        Ok(entry.clone())
    }

    async fn delete_finished_before(
        &self,
        state: QueueEntryState,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock();
        let doomed: Vec<UniversalUuid> = inner
            .entries
            .values()
            .filter(|e| e.state == state && e.finished_at.is_some_and(|at| at < cutoff))
            .map(|e| e.id)
            .collect();
        for id in &doomed {
            inner.entries.remove(id);
            inner.sequence.remove(id);
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::TriggerSource;
    use crate::queue::entry::QueueJobData;
    use chrono::Duration;

    fn new_entry(priority: i32, run_at: DateTime<Utc>) -> NewQueueEntry {
        NewQueueEntry {
            data: QueueJobData::batch(UniversalUuid::new_v4(), TriggerSource::Cron),
            priority,
            max_attempts: 3,
            run_at,
            orchestration_job_id: None,
            state: QueueEntryState::Waiting,
        }
    }

    #[tokio::test]
    async fn test_claims_by_priority_then_run_at() {
        let backend = InMemoryQueueBackend::new();
        let now = Utc::now();
        let low = backend.push(new_entry(0, now - Duration::seconds(30))).await.unwrap();
        let high_late = backend.push(new_entry(5, now - Duration::seconds(1))).await.unwrap();
        let high_early = backend.push(new_entry(5, now - Duration::seconds(10))).await.unwrap();

        let order: Vec<UniversalUuid> = vec![
            backend.claim_next(now).await.unwrap().unwrap().id,
            backend.claim_next(now).await.unwrap().unwrap().id,
            backend.claim_next(now).await.unwrap().unwrap().id,
        ];
        assert_eq!(order, vec![high_early.id, high_late.id, low.id]);
        assert!(backend.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_future_entries_are_not_claimed() {
        let backend = InMemoryQueueBackend::new();
        let now = Utc::now();
        let mut entry = new_entry(0, now + Duration::minutes(5));
        entry.state = QueueEntryState::Delayed;
        backend.push(entry).await.unwrap();

        assert!(backend.claim_next(now).await.unwrap().is_none());
        let claimed = backend
            .claim_next(now + Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.state, QueueEntryState::Active);
        assert_eq!(claimed.attempts_made, 1);
    }

    #[tokio::test]
    async fn test_link_job_replaces_job_record() {
        let backend = InMemoryQueueBackend::new();
        let entry = backend.push(new_entry(0, Utc::now())).await.unwrap();
        let job = UniversalUuid::new_v4();

        backend.link_job(entry.id, job).await.unwrap();
        let stored = backend.get(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.orchestration_job_id, Some(job));
        assert!(matches!(
            backend.link_job(UniversalUuid::new_v4(), job).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_only_failed_entries_can_be_reset() {
        let backend = InMemoryQueueBackend::new();
        let now = Utc::now();
        let entry = backend.push(new_entry(0, now)).await.unwrap();

        let err = backend.reset_for_retry(entry.id, now).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidState { .. }));

        backend.claim_next(now).await.unwrap();
        backend.fail(entry.id, "boom".into(), None, now).await.unwrap();
        let reset = backend.reset_for_retry(entry.id, now).await.unwrap();
        assert_eq!(reset.state, QueueEntryState::Waiting);
        assert_eq!(reset.attempts_made, 0);
        assert!(reset.last_error.is_none());
    }

    #[tokio::test]
    async fn test_delete_finished_before() {
        let backend = InMemoryQueueBackend::new();
        let now = Utc::now();
        let old = backend.push(new_entry(0, now)).await.unwrap();
        backend.claim_next(now).await.unwrap();
        backend
            .complete(old.id, JobProcessResult::default(), now - Duration::days(3))
            .await
            .unwrap();
        backend.push(new_entry(0, now)).await.unwrap();

        let deleted = backend
            .delete_finished_before(QueueEntryState::Completed, now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.counts().await.unwrap().waiting, 1);
    }
}
