//! Timers driving scheduled rules and the `run_*` helpers
//!
//! Every schedule is its own task looping on a tokio timer and the engine's
//! cancellation token. A tick hands its work to a separate task, so a slow
//! action never pushes back the next tick; ticks may overlap.

use chrono::{Local, NaiveDateTime, NaiveTime};
use ha_core::Context;
use ha_hub::SharedHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::dispatch::{log_report, spawn_guarded};
use crate::executor::ActionExecutor;
use crate::rule::{CallbackFuture, RuleId, ScheduledRule, TaskCallback};

#[derive(Clone)]
pub struct Scheduler {
    hub: SharedHub,
    executor: ActionExecutor,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(hub: SharedHub, executor: ActionExecutor, cancel: CancellationToken) -> Self {
        Self {
            hub,
            executor,
            cancel,
        }
    }

    /// Replay a scheduled rule's actions every period
    pub fn start_rule(&self, rule: Arc<ScheduledRule>) -> JoinHandle<()> {
        let executor = self.executor.clone();
        let tick_rule = rule.clone();
        self.every(rule.id, rule.period, move || {
            let rule = tick_rule.clone();
            let executor = executor.clone();
            let future: CallbackFuture = Box::pin(async move {
                let context = Context::new();
                info!(rule_id = %rule.id, context_id = %context.id, "Scheduled rule fired");
                let report = rule
                    .actions
                    .execute_retained(&executor, &rule.targets, &context)
                    .await;
                log_report(rule.id, &report);
                Ok(())
            });
            future
        })
    }

    /// Run `callback` every `period`, first one period from now
    pub fn every<F>(&self, rule_id: RuleId, period: Duration, callback: F) -> JoinHandle<()>
    where
        F: Fn() -> CallbackFuture + Send + Sync + 'static,
    {
        let hub = self.hub.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !hub.is_connected() {
                    debug!(rule_id = %rule_id, "Hub not connected, skipping tick");
                    continue;
                }
                trace!(rule_id = %rule_id, "Schedule tick");
                spawn_guarded(rule_id, callback());
            }
            debug!(rule_id = %rule_id, "Schedule stopped");
        })
    }

    /// Run `callback` once after `delay`
    pub fn once(&self, rule_id: RuleId, delay: Duration, callback: TaskCallback) -> JoinHandle<()> {
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(rule_id = %rule_id, "Delayed task cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    spawn_guarded(rule_id, callback());
                }
            }
        })
    }

    /// Run `callback` every day at `at`, local time
    pub fn daily(&self, rule_id: RuleId, at: NaiveTime, callback: TaskCallback) -> JoinHandle<()> {
        let hub = self.hub.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let wait = until_next(at, Local::now().naive_local());
                trace!(rule_id = %rule_id, wait = ?wait, "Waiting for daily run");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                if hub.is_connected() {
                    spawn_guarded(rule_id, callback());
                }
                // Step past the scheduled instant before recomputing
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
            debug!(rule_id = %rule_id, "Daily schedule stopped");
        })
    }
}

/// Time from `now` until the next occurrence of `at`
pub fn until_next(at: NaiveTime, now: NaiveDateTime) -> Duration {
    let mut next = now.date().and_time(at);
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ha_hub::LocalHub;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn day(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_time(at(h, m, s))
    }

    #[test]
    fn test_until_next_later_today() {
        assert_eq!(until_next(at(7, 30, 0), day(6, 0, 0)), Duration::from_secs(90 * 60));
    }

    #[test]
    fn test_until_next_rolls_over_to_tomorrow() {
        assert_eq!(until_next(at(7, 0, 0), day(8, 0, 0)), Duration::from_secs(23 * 3600));
        assert_eq!(until_next(at(7, 0, 0), day(7, 0, 0)), Duration::from_secs(24 * 3600));
    }

    fn counting_scheduler() -> (Scheduler, Arc<LocalHub>, CancellationToken) {
        let hub = Arc::new(LocalHub::new());
        let cancel = CancellationToken::new();
        let executor = ActionExecutor::new(hub.clone(), Duration::from_secs(5));
        (Scheduler::new(hub.clone(), executor, cancel.clone()), hub, cancel)
    }

    fn counter(count: &Arc<AtomicUsize>) -> impl Fn() -> CallbackFuture + Send + Sync + 'static {
        let count = count.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_ticks_after_each_period_until_cancelled() {
        let (scheduler, _hub, cancel) = counting_scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.every(RuleId(1), Duration::from_secs(10), counter(&count));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        cancel.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_are_skipped_while_disconnected() {
        let (scheduler, hub, _cancel) = counting_scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.every(RuleId(1), Duration::from_secs(10), counter(&count));

        hub.disconnect();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        hub.connect();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_is_cancellable() {
        let (scheduler, _hub, cancel) = counting_scheduler();
        let count = Arc::new(AtomicUsize::new(0));

        scheduler.once(RuleId(1), Duration::from_secs(1), Arc::new(counter(&count)));
        let cancelled = scheduler.once(RuleId(2), Duration::from_secs(60), Arc::new(counter(&count)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        cancel.cancel();
        cancelled.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
