//! In-memory publish queue with a single retrying worker.
//!
//! Jobs are kept in arrival order. The worker always takes the oldest job
//! whose `next_run` has passed, so a job waiting out its backoff does not
//! hold up newer ones. A failed attempt reschedules the job with
//! exponential backoff; once `max_attempts` is reached the job is dropped
//! and logged. Nothing is persisted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::job::PublishJob;
use crate::publisher::{DeliveryError, Delivery, Publisher};

pub type JobId = u64;

/// Retry schedule for failed deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempts`-th failure: `base * 2^attempts`, capped at `max_delay`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        2u32.checked_pow(attempts)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Delivering,
    RetryScheduled,
}

struct QueuedJob {
    id: JobId,
    job: Arc<PublishJob>,
    attempts: u32,
    next_run: Instant,
    enqueued_at: DateTime<Utc>,
    last_error: Option<String>,
    state: JobState,
}

/// Read-only view of a queued job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(serialize_with = "id_as_string")]
    pub job_id: JobId,
    pub state: JobState,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub kind: &'static str,
    pub chat_id: Option<String>,
    pub text: Option<String>,
    pub caption: String,
}

fn id_as_string<S: serde::Serializer>(id: &JobId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&id.to_string())
}

impl QueuedJob {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            state: self.state,
            attempts: self.attempts,
            enqueued_at: self.enqueued_at,
            last_error: self.last_error.clone(),
            kind: self.job.kind(),
            chat_id: self.job.chat_id.as_ref().map(|c| c.to_string()),
            text: self.job.text.clone(),
            caption: self.job.caption.clone(),
        }
    }
}

enum Next {
    Run(JobId, Arc<PublishJob>),
    WaitUntil(Instant),
    Idle,
}

pub struct PublishQueue {
    jobs: Mutex<VecDeque<QueuedJob>>,
    wake: Notify,
    next_id: AtomicU64,
    policy: RetryPolicy,
}

impl PublishQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            next_id: AtomicU64::new(1),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Append a job and wake the worker. The job is due immediately.
    pub async fn enqueue(&self, job: PublishJob) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = job.kind();
        self.jobs.lock().await.push_back(QueuedJob {
            id,
            job: Arc::new(job),
            attempts: 0,
            next_run: Instant::now(),
            enqueued_at: Utc::now(),
            last_error: None,
            state: JobState::Pending,
        });
        self.wake.notify_one();
        info!(job_id = id, kind, "📥 Job queued");
        id
    }

    pub async fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.jobs.lock().await.iter().find(|j| j.id == id).map(QueuedJob::snapshot)
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Process jobs forever.
    ///
    /// Each attempt runs in its own task; a panicking attempt counts as a
    /// failed one and the worker carries on.
    pub async fn run<P: Publisher + 'static>(&self, publisher: Arc<P>) {
        loop {
            match self.next_due().await {
                Next::Run(id, job) => {
                    let publisher = publisher.clone();
                    let attempt = tokio::spawn(async move { publisher.publish(&job).await });
                    let result = attempt.await.unwrap_or_else(|e| Err(attempt_aborted(id, e)));
                    self.finish(id, result).await;
                }
                Next::WaitUntil(deadline) => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = sleep_until(deadline) => {}
                    }
                }
                Next::Idle => self.wake.notified().await,
            }
        }
    }

    async fn next_due(&self) -> Next {
        let now = Instant::now();
        let mut jobs = self.jobs.lock().await;

        if let Some(entry) = jobs.iter_mut().find(|j| j.next_run <= now) {
            entry.state = JobState::Delivering;
            debug!(job_id = entry.id, attempt = entry.attempts + 1, "Delivering job");
            return Next::Run(entry.id, entry.job.clone());
        }

        match jobs.iter().map(|j| j.next_run).min() {
            Some(deadline) => Next::WaitUntil(deadline),
            None => Next::Idle,
        }
    }

    async fn finish(&self, id: JobId, result: Result<Delivery, DeliveryError>) {
        let mut jobs = self.jobs.lock().await;
        let Some(pos) = jobs.iter().position(|j| j.id == id) else {
            return;
        };

        let err = match result {
            Ok(delivery) => {
                let attempts = jobs[pos].attempts + 1;
                jobs.remove(pos);
                info!(job_id = id, attempts, message_id = ?delivery.message_id, "✅ Job delivered");
                return;
            }
            Err(e) => e,
        };

        let entry = &mut jobs[pos];
        entry.attempts += 1;
        entry.last_error = Some(err.to_string());

        if entry.attempts >= self.policy.max_attempts {
            let attempts = entry.attempts;
            jobs.remove(pos);
            error!(job_id = id, attempts, "❌ Job failed after {attempts} attempts, dropping: {err}");
            return;
        }

        let mut delay = self.policy.backoff(entry.attempts);
        if let Some(floor) = err.retry_after() {
            delay = delay.max(floor);
        }
        entry.next_run = Instant::now() + delay;
        entry.state = JobState::RetryScheduled;
        warn!(
            job_id = id,
            attempt = entry.attempts,
            "Job failed, retrying in {}ms: {err}",
            delay.as_millis()
        );
    }
}

fn attempt_aborted(id: JobId, err: JoinError) -> DeliveryError {
    if !err.is_panic() {
        return DeliveryError::Aborted("cancelled".into());
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(job_id = id, "💥 Delivery attempt panicked: {message}");
    DeliveryError::Aborted(message)
}

/// Spawn the background worker that drains `queue` through `publisher`.
pub fn spawn_worker<P>(queue: Arc<PublishQueue>, publisher: Arc<P>) -> JoinHandle<()>
where
    P: Publisher + 'static,
{
    tokio::spawn(async move {
        info!("Publish worker started (max {} attempts)", queue.policy().max_attempts);
        queue.run(publisher).await;
    })
}
