//! Generation admission queue.
//!
//! Fair in-memory scheduler for GPU-bound generation jobs: FIFO backlog
//! flushed in batches, priority = tier weight + minutes waited (aging beats
//! starvation), capacity caps on total / free-tier / per-user concurrency.
//! Completion is signaled explicitly via `mark_job_finished`; a job that
//! never does occupies its slot forever (leak, not crash).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::{Clock, JobId, RadioError};
use crate::protocol::models::Tier;

pub type JobFuture = BoxFuture<'static, Result<(), RadioError>>;
pub type JobFn = Box<dyn FnOnce() -> JobFuture + Send + 'static>;

pub struct GenerationJob {
    pub id: JobId,
    pub user_id: String,
    pub tier: Tier,
    /// Unix millis at enqueue time; drives aging.
    pub created_at: u64,
    pub run: JobFn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    pub max_total_workers: usize,
    pub max_free_workers: usize,
    pub max_per_user: usize,
    pub batch_window_ms: u64,
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_total_workers: 3,
            max_free_workers: 1,
            max_per_user: 1,
            batch_window_ms: 3000,
            batch_size: 4,
        }
    }
}

struct ActiveJob {
    user_id: String,
    tier: Tier,
}

struct Inner {
    backlog: Vec<GenerationJob>,
    active: HashMap<JobId, ActiveJob>,
    active_per_user: HashMap<String, usize>,
    active_free: usize,
    config: QueueConfig,
    timer_armed: bool,
}

pub struct GenerationQueue {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl GenerationQueue {
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                backlog: Vec::new(),
                active: HashMap::new(),
                active_per_user: HashMap::new(),
                active_free: 0,
                config,
                timer_armed: false,
            }),
            clock,
        })
    }

    pub fn set_config(self: &Arc<Self>, config: QueueConfig) {
        {
            let mut inner = self.inner.lock();
            info!("Queue config updated: {:?}", config);
            inner.config = config;
        }
        self.flush_now();
    }

    pub fn get_config(&self) -> QueueConfig {
        self.inner.lock().config.clone()
    }

    /// Appends to the backlog and returns the job's 1-based position. A flush
    /// happens immediately once the backlog reaches `batch_size`, otherwise
    /// after `batch_window_ms`.
    pub fn enqueue(self: &Arc<Self>, job: GenerationJob) -> usize {
        let (position, flush, arm) = {
            let mut inner = self.inner.lock();
            debug!(
                "Job enqueued: id={} user={} tier={:?}",
                job.id, job.user_id, job.tier
            );
            inner.backlog.push(job);
            let position = inner.backlog.len();
            let flush = inner.backlog.len() >= inner.config.batch_size;
            let arm = !flush && !inner.timer_armed;
            if arm {
                inner.timer_armed = true;
            }
            (position, flush, arm)
        };
        if flush {
            self.flush_now();
        } else if arm {
            let queue = self.clone();
            let window = Duration::from_millis(self.inner.lock().config.batch_window_ms);
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                queue.flush_now();
            });
        }
        position
    }

    pub fn queue_position(&self, job_id: &JobId) -> usize {
        let inner = self.inner.lock();
        inner
            .backlog
            .iter()
            .position(|j| &j.id == job_id)
            .map_or(0, |i| i + 1)
    }

    /// Releases the job's capacity slot and immediately reschedules.
    pub fn mark_job_finished(self: &Arc<Self>, job_id: &JobId) {
        {
            let mut inner = self.inner.lock();
            let Some(job) = inner.active.remove(job_id) else {
                return;
            };
            debug!("Job finished: id={} user={}", job_id, job.user_id);
            match inner.active_per_user.get_mut(&job.user_id) {
                Some(count) if *count > 1 => *count -= 1,
                _ => {
                    inner.active_per_user.remove(&job.user_id);
                }
            }
            if job.tier == Tier::Free {
                inner.active_free = inner.active_free.saturating_sub(1);
            }
        }
        self.flush_now();
    }

    /// Dispatch every eligible backlog job, highest priority first. Public so
    /// tests drive the scheduler without timers.
    pub fn flush_now(self: &Arc<Self>) {
        let dispatched = {
            let mut inner = self.inner.lock();
            inner.timer_armed = false;
            let now = self.clock.now_ms();
            inner
                .backlog
                .sort_by(|a, b| priority(b, now).total_cmp(&priority(a, now)));

            let mut ready = Vec::new();
            loop {
                if inner.active.len() >= inner.config.max_total_workers {
                    break;
                }
                let Some(index) = inner
                    .backlog
                    .iter()
                    .position(|job| can_dispatch(&inner, job))
                else {
                    break;
                };
                let job = inner.backlog.remove(index);
                inner.active.insert(
                    job.id.clone(),
                    ActiveJob {
                        user_id: job.user_id.clone(),
                        tier: job.tier,
                    },
                );
                *inner.active_per_user.entry(job.user_id.clone()).or_insert(0) += 1;
                if job.tier == Tier::Free {
                    inner.active_free += 1;
                }
                ready.push(job);
            }
            ready
        };

        for job in dispatched {
            info!("Dispatching job: id={} tier={:?}", job.id, job.tier);
            let queue = self.clone();
            let job_id = job.id.clone();
            let fut = (job.run)();
            tokio::spawn(async move {
                // Failure releases capacity immediately; success is signaled
                // by the caller via `mark_job_finished`.
                if let Err(e) = fut.await {
                    warn!("Job failed: id={} err={}", job_id, e);
                    queue.mark_job_finished(&job_id);
                }
            });
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.lock().backlog.len()
    }
}

fn priority(job: &GenerationJob, now_ms: u64) -> f64 {
    let wait_minutes = now_ms.saturating_sub(job.created_at) as f64 / 60_000.0;
    job.tier.weight() + wait_minutes
}

fn can_dispatch(inner: &Inner, job: &GenerationJob) -> bool {
    if inner.active.len() >= inner.config.max_total_workers {
        return false;
    }
    if job.tier == Tier::Free && inner.active_free >= inner.config.max_free_workers {
        return false;
    }
    let per_user = inner.active_per_user.get(&job.user_id).copied().unwrap_or(0);
    per_user < inner.config.max_per_user
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;

    fn queue_with(config: QueueConfig) -> (Arc<GenerationQueue>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (GenerationQueue::new(config, clock.clone()), clock)
    }

    fn noop_job(id: &str, user: &str, tier: Tier, created_at: u64) -> GenerationJob {
        GenerationJob {
            id: JobId(id.to_string()),
            user_id: user.to_string(),
            tier,
            created_at,
            run: Box::new(|| Box::pin(async { Ok(()) })),
        }
    }

    fn failing_job(id: &str, user: &str, tier: Tier) -> GenerationJob {
        GenerationJob {
            id: JobId(id.to_string()),
            user_id: user.to_string(),
            tier,
            created_at: 0,
            run: Box::new(|| Box::pin(async { Err(RadioError::Provider("boom".into())) })),
        }
    }

    #[tokio::test]
    async fn test_free_tier_cap_holds_back_second_job() {
        let (queue, _clock) = queue_with(QueueConfig {
            max_total_workers: 2,
            max_free_workers: 1,
            max_per_user: 2,
            batch_window_ms: 3000,
            batch_size: 100,
        });
        queue.enqueue(noop_job("j1", "u1", Tier::Free, 0));
        queue.enqueue(noop_job("j2", "u2", Tier::Free, 0));
        queue.flush_now();

        assert_eq!(queue.active_count(), 1);
        assert_eq!(queue.backlog_len(), 1);

        queue.mark_job_finished(&JobId("j1".to_string()));
        assert_eq!(queue.active_count(), 1);
        assert_eq!(queue.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_total_and_per_user_caps() {
        let (queue, _clock) = queue_with(QueueConfig {
            max_total_workers: 2,
            max_free_workers: 2,
            max_per_user: 1,
            batch_window_ms: 3000,
            batch_size: 100,
        });
        queue.enqueue(noop_job("j1", "u1", Tier::Pro, 0));
        queue.enqueue(noop_job("j2", "u1", Tier::Pro, 0)); // same user, held
        queue.enqueue(noop_job("j3", "u2", Tier::Pro, 0));
        queue.enqueue(noop_job("j4", "u3", Tier::Pro, 0)); // total cap, held
        queue.flush_now();

        assert_eq!(queue.active_count(), 2);
        assert_eq!(queue.backlog_len(), 2);

        queue.mark_job_finished(&JobId("j1".to_string()));
        // j2 (u1) is eligible again and outranks nothing; j4 (u3) also fits.
        assert_eq!(queue.active_count(), 2);
        assert_eq!(queue.backlog_len(), 1);
    }

    #[tokio::test]
    async fn test_priority_orders_tiers_and_aging_rescues_free() {
        let (queue, clock) = queue_with(QueueConfig {
            max_total_workers: 1,
            max_free_workers: 1,
            max_per_user: 1,
            batch_window_ms: 3000,
            batch_size: 100,
        });
        // Free job has waited 10 minutes: priority 1 + 10 = 11 beats a fresh
        // unlimited job's 10.
        queue.enqueue(noop_job("old-free", "u1", Tier::Free, 0));
        clock.advance_ms(10 * 60_000);
        queue.enqueue(noop_job("fresh-unlimited", "u2", Tier::Unlimited, clock.now_ms()));
        queue.flush_now();

        assert_eq!(queue.active_count(), 1);
        assert_eq!(queue.queue_position(&JobId("fresh-unlimited".to_string())), 1);
        assert_eq!(queue.queue_position(&JobId("old-free".to_string())), 0);
    }

    #[tokio::test]
    async fn test_failed_job_releases_capacity() {
        let (queue, _clock) = queue_with(QueueConfig {
            max_total_workers: 1,
            max_free_workers: 1,
            max_per_user: 1,
            batch_window_ms: 3000,
            batch_size: 100,
        });
        queue.enqueue(failing_job("bad", "u1", Tier::Free));
        queue.enqueue(noop_job("good", "u2", Tier::Free, 0));
        queue.flush_now();
        assert_eq!(queue.active_count(), 1);

        // Let the spawned failure path run and reschedule.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(queue.queue_position(&JobId("good".to_string())) == 0);
    }

    #[tokio::test]
    async fn test_batch_size_triggers_immediate_flush() {
        let (queue, _clock) = queue_with(QueueConfig {
            max_total_workers: 4,
            max_free_workers: 4,
            max_per_user: 4,
            batch_window_ms: 60_000,
            batch_size: 2,
        });
        queue.enqueue(noop_job("j1", "u1", Tier::Pro, 0));
        assert_eq!(queue.active_count(), 0); // below batch size, timer path
        queue.enqueue(noop_job("j2", "u2", Tier::Pro, 0));
        assert_eq!(queue.active_count(), 2);
    }

    #[tokio::test]
    async fn test_mark_unknown_job_is_noop() {
        let (queue, _clock) = queue_with(QueueConfig::default());
        queue.mark_job_finished(&JobId("ghost".to_string()));
        assert_eq!(queue.active_count(), 0);
    }
}
