use crate::domain::ports::{ClockRef, Scheduler};
use crate::domain::trigger::{JobHandle, TriggerKey};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;

/// A job that reached its fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireEvent {
    pub key: TriggerKey,
    /// Fire time the job was armed for; lets the engine spot jobs left over
    /// from before a reschedule.
    pub fire_at: DateTime<Utc>,
}

pub type FireReceiver = mpsc::UnboundedReceiver<FireEvent>;

/// In-process timer wheel built on tokio tasks.
///
/// Every scheduled job is a task sleeping until its fire time, after which it
/// pushes a [`FireEvent`] to the engine's fire loop. The timer tasks never run
/// engine code themselves, so a slow delivery cannot hold up other timers.
pub struct TokioScheduler {
    next_handle: AtomicU64,
    jobs: Arc<DashMap<JobHandle, AbortHandle>>,
    clock: ClockRef,
    fires: mpsc::UnboundedSender<FireEvent>,
}

impl TokioScheduler {
    pub fn new(clock: ClockRef) -> (Self, FireReceiver) {
        let (fires, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_handle: AtomicU64::new(0),
            jobs: Arc::new(DashMap::new()),
            clock,
            fires,
        };
        (scheduler, rx)
    }

    /// Number of armed jobs that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule(&self, key: TriggerKey, fire_at: DateTime<Utc>) -> Result<JobHandle> {
        let handle = JobHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let delay = (fire_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let jobs = self.jobs.clone();
        let fires = self.fires.clone();
        let (registered, on_registered) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            // The job must be in the registry before it can leave it.
            if on_registered.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            jobs.remove(&handle);
            if fires.send(FireEvent { key, fire_at }).is_err() {
                debug!(trigger = %key, "fire loop gone, dropping fire");
            }
        });

        self.jobs.insert(handle, task.abort_handle());
        if registered.send(()).is_err() {
            self.jobs.remove(&handle);
        }
        debug!(trigger = %key, job = handle.0, ?delay, "job armed");
        Ok(handle)
    }

    async fn cancel(&self, handle: JobHandle) -> bool {
        match self.jobs.remove(&handle) {
            Some((_, task)) => {
                task.abort();
                debug!(job = handle.0, "job released");
                true
            }
            None => false,
        }
    }
}
