//! Advisory resource locks.
//!
//! One active lock per resource, plus a FIFO queue of waiters. A waiter
//! polls with a fixed delay; releasing a lock hands it straight to the
//! head of the queue with the duration that waiter asked for.
//!
//! Locks are advisory: nothing here stops a caller that skips
//! [`LockManager::acquire`] from touching the resource.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use conductor_observability::{MetricSample, MetricsSink};
use conductor_types::{LockId, LockType, WorkflowId, WorkflowLock};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};

/// Timing for one acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOptions {
    /// How long an acquired lock stays valid.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Sleep between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl LockOptions {
    pub fn new(lock_timeout_ms: u64, max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            lock_timeout_ms,
            max_retries,
            retry_delay_ms,
        }
    }

    fn lock_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.lock_timeout_ms.min(i64::MAX as u64) as i64)
    }
}

/// A queued acquisition, identified by the id its lock will carry.
#[derive(Debug, Clone)]
struct PendingLock {
    lock_id: LockId,
    workflow_id: WorkflowId,
    lock_type: LockType,
    duration: chrono::Duration,
}

impl PendingLock {
    fn into_lock(self, resource_id: &str) -> WorkflowLock {
        let now = Utc::now();
        WorkflowLock {
            id: self.lock_id,
            workflow_id: self.workflow_id,
            resource_id: resource_id.to_string(),
            lock_type: self.lock_type,
            acquired_at: now,
            expires_at: now + self.duration,
        }
    }
}

/// Active-lock table and per-resource wait queues.
pub struct LockManager {
    active: DashMap<String, WorkflowLock>,
    pending: DashMap<String, VecDeque<PendingLock>>,
    metrics: Arc<dyn MetricsSink>,
}

impl LockManager {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            active: DashMap::new(),
            pending: DashMap::new(),
            metrics,
        }
    }

    /// Acquire `resource_id`, retrying up to `options.max_retries` times.
    ///
    /// The first failed attempt queues the request. A queued request can be
    /// handed the lock by [`release`](Self::release) while it sleeps; the
    /// next attempt then picks it up.
    #[instrument(skip(self, options), fields(workflow_id = %workflow_id, resource_id = %resource_id))]
    pub async fn acquire(
        &self,
        workflow_id: &WorkflowId,
        resource_id: &str,
        lock_type: LockType,
        options: &LockOptions,
    ) -> Result<WorkflowLock> {
        let started = Instant::now();
        let request = PendingLock {
            lock_id: LockId::generate(),
            workflow_id: workflow_id.clone(),
            lock_type,
            duration: options.lock_duration(),
        };
        let mut queued = false;

        for attempt in 0..=options.max_retries {
            if let Some(lock) = self.try_install(resource_id, &request) {
                if queued {
                    self.dequeue(resource_id, request.lock_id);
                }
                self.record_wait(resource_id, lock_type, started, "acquired");
                debug!(lock_id = %lock.id, attempt, "Lock acquired");
                return Ok(lock);
            }

            if !queued {
                self.pending
                    .entry(resource_id.to_string())
                    .or_default()
                    .push_back(request.clone());
                queued = true;
            }

            if attempt < options.max_retries {
                tokio::time::sleep(Duration::from_millis(options.retry_delay_ms)).await;
            }
        }

        // a release may have promoted us after the last attempt
        if !self.dequeue(resource_id, request.lock_id) {
            if let Some(lock) = self.held_by(resource_id, request.lock_id) {
                self.record_wait(resource_id, lock_type, started, "acquired");
                return Ok(lock);
            }
        }

        let holder = self.active.get(resource_id).map(|l| l.workflow_id.clone());
        self.record_wait(resource_id, lock_type, started, "timeout");
        warn!(
            retries = options.max_retries,
            holder = ?holder,
            "Lock acquisition gave up"
        );
        Err(SyncError::Lock {
            resource_id: resource_id.to_string(),
            retries: options.max_retries,
            holder,
        })
    }

    /// Release `lock` if it is still the active lock for its resource.
    ///
    /// Returns false for stale or already-released locks. The head of the
    /// wait queue, if any, becomes the new active lock.
    pub fn release(&self, lock: &WorkflowLock) -> bool {
        let Entry::Occupied(mut entry) = self.active.entry(lock.resource_id.clone()) else {
            debug!(lock_id = %lock.id, "Release of unknown lock ignored");
            return false;
        };
        if entry.get().id != lock.id {
            debug!(lock_id = %lock.id, "Release of superseded lock ignored");
            return false;
        }

        match self.pop_waiter(&lock.resource_id) {
            Some(next) => {
                let promoted = next.into_lock(&lock.resource_id);
                info!(
                    resource_id = %lock.resource_id,
                    from = %lock.workflow_id,
                    to = %promoted.workflow_id,
                    "Lock handed to next waiter"
                );
                entry.insert(promoted);
            }
            None => {
                entry.remove();
                debug!(resource_id = %lock.resource_id, lock_id = %lock.id, "Lock released");
            }
        }
        true
    }

    /// Release every lock held by `workflow_id` and drop its queued requests.
    ///
    /// Returns the number of active locks released.
    pub fn release_all_for_workflow(&self, workflow_id: &WorkflowId) -> usize {
        self.pending.retain(|_, queue| {
            queue.retain(|p| &p.workflow_id != workflow_id);
            !queue.is_empty()
        });

        let held: Vec<WorkflowLock> = self
            .active
            .iter()
            .filter(|l| &l.workflow_id == workflow_id)
            .map(|l| l.clone())
            .collect();

        held.iter().filter(|lock| self.release(lock)).count()
    }

    /// The lock currently installed for `resource_id`, expired or not.
    pub fn active_lock(&self, resource_id: &str) -> Option<WorkflowLock> {
        self.active.get(resource_id).map(|l| l.clone())
    }

    /// Waiters queued for `resource_id`.
    pub fn pending_count(&self, resource_id: &str) -> usize {
        self.pending.get(resource_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Install `request` if the resource is free, expired, or was already
    /// handed to this request.
    fn try_install(&self, resource_id: &str, request: &PendingLock) -> Option<WorkflowLock> {
        match self.active.entry(resource_id.to_string()) {
            Entry::Vacant(entry) => {
                let lock = request.clone().into_lock(resource_id);
                entry.insert(lock.clone());
                Some(lock)
            }
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if current.id == request.lock_id {
                    return Some(current.clone());
                }
                if current.is_expired_at(Utc::now()) {
                    debug!(
                        resource_id,
                        expired = %current.id,
                        holder = %current.workflow_id,
                        "Replacing expired lock"
                    );
                    let lock = request.clone().into_lock(resource_id);
                    entry.insert(lock.clone());
                    return Some(lock);
                }
                None
            }
        }
    }

    fn held_by(&self, resource_id: &str, lock_id: LockId) -> Option<WorkflowLock> {
        self.active
            .get(resource_id)
            .filter(|l| l.id == lock_id)
            .map(|l| l.clone())
    }

    /// Remove a queued request; false if it was no longer queued.
    fn dequeue(&self, resource_id: &str, lock_id: LockId) -> bool {
        let removed = {
            let Some(mut queue) = self.pending.get_mut(resource_id) else {
                return false;
            };
            let before = queue.len();
            queue.retain(|p| p.lock_id != lock_id);
            queue.len() != before
        };
        self.drop_empty_queue(resource_id);
        removed
    }

    fn pop_waiter(&self, resource_id: &str) -> Option<PendingLock> {
        let next = self
            .pending
            .get_mut(resource_id)
            .and_then(|mut queue| queue.pop_front());
        self.drop_empty_queue(resource_id);
        next
    }

    fn drop_empty_queue(&self, resource_id: &str) {
        self.pending.remove_if(resource_id, |_, queue| queue.is_empty());
    }

    fn record_wait(&self, resource_id: &str, lock_type: LockType, started: Instant, outcome: &str) {
        self.metrics.record(
            MetricSample::performance("lock_wait", started.elapsed().as_secs_f64() * 1000.0)
                .tag("resource_id", resource_id)
                .tag("lock_type", lock_type.as_str())
                .tag("outcome", outcome),
        );
    }
}
