use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chime_core::config::EngineConfig;
use chime_core::Clock;

use crate::{
    dispatch::{DispatchCall, Dispatcher, Outcome},
    error::Result,
    store::ScheduleStore,
    trigger::next_due,
    types::{FailureDisposition, Lease, Schedule, SuccessDisposition},
};

/// Live engine health, shared with the gateway's /health endpoint.
#[derive(Debug, Clone, Default)]
pub struct EngineHealth {
    /// When the last poll cycle finished, successfully or not.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Poll cycles in a row that failed outright (store unavailable).
    pub consecutive_failures: u32,
}

/// Cheap cloneable handle onto the engine's health snapshot.
#[derive(Debug, Clone, Default)]
pub struct HealthHandle {
    inner: Arc<Mutex<EngineHealth>>,
}

impl HealthHandle {
    pub fn snapshot(&self) -> EngineHealth {
        self.inner.lock().unwrap().clone()
    }

    fn record(&self, at: DateTime<Utc>, ok: bool) {
        let mut health = self.inner.lock().unwrap();
        health.last_tick_at = Some(at);
        health.consecutive_failures = if ok {
            0
        } else {
            health.consecutive_failures + 1
        };
    }
}

/// Per-tick accounting, logged after busy ticks and returned for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Due rows returned by the poll.
    pub due: usize,
    /// Claims won this tick.
    pub claimed: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    /// Claims or commits lost to concurrent writers. Harmless.
    pub conflicts: usize,
}

/// The poller: claims due schedules, dispatches them under a concurrency
/// bound, and commits each outcome.
///
/// Stateless between ticks — every cycle reads fresh rows, so any number
/// of instances can run against one database. Correctness under that
/// concurrency rests entirely on the store's claim/commit conditions; the
/// engine just skips whatever it loses.
pub struct ExecutionEngine {
    store: Arc<ScheduleStore>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    cfg: EngineConfig,
    /// Lease owner tag, unique per instance, so stale commits are refused.
    instance_id: String,
    limiter: Arc<Semaphore>,
    health: HealthHandle,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<ScheduleStore>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
        cfg: EngineConfig,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(cfg.max_concurrent));
        Self {
            store,
            dispatcher,
            clock,
            instance_id: format!("chime-{}", Uuid::new_v4()),
            limiter,
            health: HealthHandle::default(),
            cfg,
        }
    }

    /// Handle for the health endpoint; snapshot it any time.
    pub fn health(&self) -> HealthHandle {
        self.health.clone()
    }

    /// Main loop. Polls every `poll_seconds` until `shutdown` broadcasts
    /// `true`. A failing store backs the whole loop off exponentially
    /// instead of tight-looping against a dead database.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            instance = %self.instance_id,
            poll_seconds = self.cfg.poll_seconds,
            max_concurrent = self.cfg.max_concurrent,
            "execution engine started"
        );
        let mut interval =
            tokio::time::interval(StdDuration::from_secs(self.cfg.poll_seconds.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(stats) if stats.due > 0 => {
                            info!(
                                due = stats.due,
                                claimed = stats.claimed,
                                succeeded = stats.succeeded,
                                retried = stats.retried,
                                failed = stats.failed,
                                conflicts = stats.conflicts,
                                "tick"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let failures = self.health.snapshot().consecutive_failures;
                            error!(consecutive = failures, "engine tick error: {e}");
                            let pause = backoff_secs(
                                self.cfg.backoff_base_secs,
                                self.cfg.backoff_cap_secs,
                                failures,
                            );
                            // The pause can run to half an hour; shutdown
                            // must still be able to interrupt it.
                            tokio::select! {
                                _ = tokio::time::sleep(StdDuration::from_secs(pause)) => {}
                                _ = shutdown.changed() => {
                                    if *shutdown.borrow() {
                                        info!("execution engine shutting down");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("execution engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one poll cycle. Public so tests can drive the engine tick by
    /// tick against a manual clock.
    pub async fn tick(&self) -> Result<TickStats> {
        let result = self.tick_inner().await;
        self.health.record(self.clock.now(), result.is_ok());
        result
    }

    async fn tick_inner(&self) -> Result<TickStats> {
        let now = self.clock.now();
        let due = self.store.get_due(now, self.cfg.batch_size)?;
        let mut stats = TickStats {
            due: due.len(),
            ..TickStats::default()
        };
        if due.is_empty() {
            return Ok(stats);
        }

        let lease_len = Duration::seconds(self.cfg.lease_seconds as i64);
        let mut inflight = JoinSet::new();
        let mut tick_err = None;
        for schedule in due {
            let lease = match self.store.claim(
                schedule.id,
                schedule.version,
                &self.instance_id,
                now,
                lease_len,
            ) {
                Ok(lease) => lease,
                Err(e) if e.is_conflict() => {
                    // Another instance or a concurrent edit got there first.
                    stats.conflicts += 1;
                    debug!(schedule_id = %schedule.id, "claim lost");
                    continue;
                }
                // Hard store error: stop claiming, but still collect what
                // is already in flight before reporting the tick failed.
                Err(e) => {
                    tick_err = Some(e);
                    break;
                }
            };
            stats.claimed += 1;

            let permit = match Arc::clone(&self.limiter).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed, engine is going away
            };
            let dispatcher = Arc::clone(&self.dispatcher);
            let call = DispatchCall::for_schedule(&schedule);
            inflight.spawn(async move {
                let outcome = dispatcher.invoke(&call).await;
                drop(permit);
                (schedule, lease, outcome)
            });
        }

        while let Some(joined) = inflight.join_next().await {
            let (schedule, lease, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    // The dispatch task panicked; lease expiry recovers the row.
                    error!("dispatch task failed: {e}");
                    continue;
                }
            };
            let fired_at = self.clock.now();
            match outcome {
                Outcome::Success => self.apply_success(&schedule, &lease, fired_at, &mut stats),
                Outcome::Transient(reason) => {
                    self.apply_failure(&schedule, &lease, fired_at, &reason, false, &mut stats)
                }
                Outcome::Permanent(reason) => {
                    self.apply_failure(&schedule, &lease, fired_at, &reason, true, &mut stats)
                }
            }
        }

        match tick_err {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    // --- outcome application -----------------------------------------------

    fn apply_success(
        &self,
        schedule: &Schedule,
        lease: &Lease,
        fired_at: DateTime<Utc>,
        stats: &mut TickStats,
    ) {
        // next_due is None exactly when the trigger is exhausted (a once
        // trigger that just ran); recurring triggers always reschedule.
        let disposition = match next_due(&schedule.trigger, fired_at, Some(fired_at)) {
            Some(next) => SuccessDisposition::Reschedule(next),
            None => SuccessDisposition::Complete,
        };
        match self.store.commit_success(lease, fired_at, disposition) {
            Ok(()) => {
                stats.succeeded += 1;
                info!(
                    schedule_id = %schedule.id,
                    kind = %schedule.trigger.kind(),
                    "dispatch succeeded"
                );
            }
            Err(e) if e.is_conflict() => {
                stats.conflicts += 1;
                debug!(
                    schedule_id = %schedule.id,
                    "success commit discarded: schedule changed mid-dispatch"
                );
            }
            Err(e) => error!(schedule_id = %schedule.id, "success commit failed: {e}"),
        }
    }

    fn apply_failure(
        &self,
        schedule: &Schedule,
        lease: &Lease,
        fired_at: DateTime<Utc>,
        reason: &str,
        permanent: bool,
        stats: &mut TickStats,
    ) {
        let attempt = schedule.retry_count + 1;
        let disposition = if permanent || attempt >= self.cfg.max_retries {
            FailureDisposition::Fail
        } else {
            let delay = backoff_secs(
                self.cfg.backoff_base_secs,
                self.cfg.backoff_cap_secs,
                attempt,
            );
            FailureDisposition::Retry {
                next_run_at: fired_at + Duration::seconds(delay as i64),
                retry_count: attempt,
            }
        };
        match &disposition {
            FailureDisposition::Retry {
                next_run_at,
                retry_count,
            } => warn!(
                schedule_id = %schedule.id,
                attempt = retry_count,
                retry_at = %next_run_at,
                "dispatch failed, will retry: {reason}"
            ),
            FailureDisposition::Fail => warn!(
                schedule_id = %schedule.id,
                attempts = attempt,
                permanent,
                "dispatch failed for good: {reason}"
            ),
        }

        let exhausted = matches!(disposition, FailureDisposition::Fail);
        match self.store.commit_failure(lease, fired_at, disposition) {
            Ok(()) if exhausted => stats.failed += 1,
            Ok(()) => stats.retried += 1,
            Err(e) if e.is_conflict() => {
                stats.conflicts += 1;
                debug!(
                    schedule_id = %schedule.id,
                    "failure commit discarded: schedule changed mid-dispatch"
                );
            }
            Err(e) => error!(schedule_id = %schedule.id, "failure commit failed: {e}"),
        }
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped.
fn backoff_secs(base_secs: u64, cap_secs: u64, attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(31);
    base_secs.saturating_mul(1u64 << exp).min(cap_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_secs(30, 1800, 1), 30);
        assert_eq!(backoff_secs(30, 1800, 2), 60);
        assert_eq!(backoff_secs(30, 1800, 3), 120);
        // 30 * 2^6 = 1920, capped
        assert_eq!(backoff_secs(30, 1800, 7), 1800);
        assert_eq!(backoff_secs(30, 1800, 31), 1800);
    }

    #[test]
    fn backoff_survives_extreme_inputs() {
        assert_eq!(backoff_secs(u64::MAX, 1800, 5), 1800);
        assert_eq!(backoff_secs(30, 1800, u32::MAX), 1800);
        // attempt 0 (no failures yet) behaves like the first attempt
        assert_eq!(backoff_secs(30, 1800, 0), 30);
    }
}
