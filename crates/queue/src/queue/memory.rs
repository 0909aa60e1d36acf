//! In-process job queue.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use fanout_common::{AppResult, IdGenerator};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Enqueued, FailOutcome, JobQueue, QueueSettings, STALLED_ERROR, failed_copy};
use crate::job::{EnqueueOptions, Job, JobEnvelope, Lane};
use crate::retry::DeadLetterEntry;

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobEnvelope>,
    ready: HashMap<Lane, VecDeque<String>>,
    inflight: HashMap<String, Instant>,
    retry: HashMap<String, Instant>,
    unique: HashMap<String, String>,
    dead: VecDeque<DeadLetterEntry<Job>>,
}

impl Inner {
    fn owns(&self, envelope: &JobEnvelope) -> bool {
        envelope.lease.is_some()
            && self
                .jobs
                .get(&envelope.id)
                .is_some_and(|stored| stored.lease == envelope.lease)
    }

    fn remove(&mut self, id: &str) -> Option<JobEnvelope> {
        self.inflight.remove(id);
        self.retry.remove(id);
        let job = self.jobs.remove(id)?;
        if let Some(key) = &job.uniqueness_key {
            if self.unique.get(key).is_some_and(|holder| holder == id) {
                self.unique.remove(key);
            }
        }
        Some(job)
    }

    fn bury(&mut self, failed: JobEnvelope, max: usize) {
        self.remove(&failed.id);
        let error = failed.last_error.unwrap_or_default();
        self.dead.push_front(DeadLetterEntry::new(
            failed.id,
            failed.job,
            failed.attempts,
            error,
        ));
        self.dead.truncate(max);
    }
}

/// Job queue kept in process memory.
///
/// Deadlines and retry schedules follow `tokio::time`, so a paused test clock
/// drives them.
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    settings: QueueSettings,
    id_gen: IdGenerator,
}

impl MemoryJobQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            settings,
            id_gen: IdGenerator::new(),
        }
    }

    /// Jobs in flight or scheduled for retry, across lanes.
    pub async fn in_progress_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.inflight.len() + inner.retry.len()
    }

    fn fail_locked(&self, inner: &mut Inner, envelope: &JobEnvelope, error: &str) -> FailOutcome {
        if !inner.owns(envelope) {
            return FailOutcome::Stale;
        }

        let failed = failed_copy(envelope, error);
        if failed.attempts > failed.max_retries {
            inner.bury(failed, self.settings.dead_letter_max);
            return FailOutcome::Dead;
        }

        let attempt = failed.attempts;
        let delay = self.settings.retry.delay_for_attempt(attempt);
        inner.inflight.remove(&failed.id);
        inner.retry.insert(failed.id.clone(), Instant::now() + delay);
        inner.jobs.insert(failed.id.clone(), failed);
        FailOutcome::Retrying { attempt, delay }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job, options: EnqueueOptions) -> AppResult<Enqueued> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = options
            .uniqueness_key
            .as_ref()
            .and_then(|key| inner.unique.get(key))
        {
            return Ok(Enqueued {
                id: existing.clone(),
                duplicate: true,
            });
        }

        let id = self.id_gen.generate();
        let envelope = JobEnvelope::new(id.clone(), job, options);
        if let Some(key) = &envelope.uniqueness_key {
            inner.unique.insert(key.clone(), id.clone());
        }
        inner
            .ready
            .entry(envelope.lane)
            .or_default()
            .push_back(id.clone());
        inner.jobs.insert(id.clone(), envelope);

        Ok(Enqueued {
            id,
            duplicate: false,
        })
    }

    async fn dequeue(&self, lane: Lane) -> AppResult<Option<JobEnvelope>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        while let Some(id) = inner.ready.get_mut(&lane).and_then(VecDeque::pop_front) {
            let Some(envelope) = inner.jobs.get_mut(&id) else {
                continue;
            };
            envelope.lease = Some(self.id_gen.generate_token());
            let leased = envelope.clone();
            inner
                .inflight
                .insert(id, Instant::now() + self.settings.execution_timeout);
            return Ok(Some(leased));
        }
        Ok(None)
    }

    async fn ack(&self, envelope: &JobEnvelope) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.owns(envelope) {
            return Ok(false);
        }
        inner.remove(&envelope.id);
        Ok(true)
    }

    async fn fail(&self, envelope: &JobEnvelope, error: &str) -> AppResult<FailOutcome> {
        let mut inner = self.inner.lock().await;
        Ok(self.fail_locked(&mut inner, envelope, error))
    }

    async fn bury(&self, envelope: &JobEnvelope, error: &str) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.owns(envelope) {
            return Ok(false);
        }
        inner.bury(failed_copy(envelope, error), self.settings.dead_letter_max);
        Ok(true)
    }

    async fn promote_due(&self, lane: Lane) -> AppResult<usize> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = Instant::now();

        let mut due: Vec<(Instant, String)> = inner
            .retry
            .iter()
            .filter(|(id, at)| {
                **at <= now && inner.jobs.get(*id).is_some_and(|job| job.lane == lane)
            })
            .map(|(id, at)| (*at, id.clone()))
            .collect();
        due.sort();

        let ready = inner.ready.entry(lane).or_default();
        for (_, id) in &due {
            inner.retry.remove(id);
            ready.push_back(id.clone());
        }
        Ok(due.len())
    }

    async fn reap_stalled(&self, lane: Lane) -> AppResult<Vec<(JobEnvelope, FailOutcome)>> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let stalled: Vec<JobEnvelope> = inner
            .inflight
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .filter_map(|(id, _)| inner.jobs.get(id))
            .filter(|job| job.lane == lane)
            .cloned()
            .collect();

        Ok(stalled
            .into_iter()
            .map(|envelope| {
                let outcome = self.fail_locked(&mut inner, &envelope, STALLED_ERROR);
                (envelope, outcome)
            })
            .collect())
    }

    async fn dead_letters(&self, limit: usize) -> AppResult<Vec<DeadLetterEntry<Job>>> {
        Ok(self
            .inner
            .lock()
            .await
            .dead
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ready_count(&self, lane: Lane) -> AppResult<usize> {
        Ok(self
            .inner
            .lock()
            .await
            .ready
            .get(&lane)
            .map_or(0, VecDeque::len))
    }
}
