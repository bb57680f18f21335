//! Bounded exponential backoff for convergence polling.
//!
//! A [`BackoffScheduler`] hands out growing, capped delays until either
//! the total time budget, the caller's deadline, or cancellation says
//! stop. Waiting is a separate, explicit step so the caller decides where
//! the operation suspends.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::cancel::OperationContext;
use crate::clock::Clock;
use crate::config::duration_ms;

/// Shape of the backoff schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first re-poll.
    #[serde(rename = "base_delay_ms", with = "duration_ms", default = "default_base_delay")]
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Total time the schedule may span, measured from its creation.
    #[serde(rename = "max_total_ms", with = "duration_ms", default = "default_max_total")]
    pub max_total: Duration,
    /// Add up to 25% random jitter to each delay (still capped).
    #[serde(default)]
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            max_total: default_max_total(),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn with_max_total(mut self, total: Duration) -> Self {
        self.max_total = total;
        self
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Short schedule for directories that usually catch up within seconds.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_total: Duration::from_secs(30),
            jitter: false,
        }
    }

    /// Long schedule for directories with minutes of replication lag.
    #[must_use]
    pub fn patient() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_total: Duration::from_secs(20 * 60),
            jitter: true,
        }
    }

    /// Delay for the given attempt (0-indexed), before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..=0.25);
        delay.mul_f64(factor).min(self.max_delay.max(delay))
    }
}

const fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_max_total() -> Duration {
    Duration::from_secs(5 * 60)
}

/// How a [`BackoffScheduler::wait`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full delay passed.
    Elapsed,
    /// Cancellation fired first.
    Cancelled,
}

/// Produces the delays between convergence polls.
#[derive(Debug)]
pub struct BackoffScheduler {
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
    ctx: OperationContext,
    started: Instant,
    attempt: u32,
}

impl BackoffScheduler {
    /// Start a schedule now.
    pub fn new(policy: BackoffPolicy, clock: Arc<dyn Clock>, ctx: OperationContext) -> Self {
        let started = clock.now();
        Self {
            policy,
            clock,
            ctx,
            started,
            attempt: 0,
        }
    }

    /// Number of delays handed out so far.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Time since the schedule started.
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started)
    }

    /// The next delay, or `None` once the schedule is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.next_delay_at_least(None)
    }

    /// Like [`next_delay`](Self::next_delay), but never shorter than
    /// `floor` (a server's retry-after hint).
    pub fn next_delay_at_least(&mut self, floor: Option<Duration>) -> Option<Duration> {
        if self.ctx.is_cancelled() {
            debug!(attempt = self.attempt, "Backoff exhausted: cancelled");
            return None;
        }

        let computed = self.policy.jittered(self.policy.delay_for(self.attempt));
        let delay = floor.map_or(computed, |floor| computed.max(floor));

        let now = self.clock.now();
        let resume_at = now.checked_add(delay)?;
        let within_budget = now
            .saturating_duration_since(self.started)
            .checked_add(delay)
            .is_some_and(|total| total <= self.policy.max_total);
        let within_deadline = self
            .ctx
            .deadline()
            .is_none_or(|deadline| resume_at <= deadline);

        if !within_budget || !within_deadline {
            debug!(
                attempt = self.attempt,
                delay_ms = delay.as_millis(),
                elapsed_ms = self.elapsed().as_millis(),
                within_budget,
                within_deadline,
                "Backoff exhausted"
            );
            return None;
        }

        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Suspend for `delay`, returning early if cancellation fires.
    pub async fn wait(&self, delay: Duration) -> WaitOutcome {
        tokio::select! {
            biased;
            () = self.ctx.cancelled() => WaitOutcome::Cancelled,
            () = self.clock.sleep(delay) => WaitOutcome::Elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::clock::ManualClock;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(800))
            .with_multiplier(2.0)
            .with_max_total(Duration::from_secs(10))
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(10), Duration::from_millis(800));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(800));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let policy = policy().with_jitter(true);
        for attempt in 0..8 {
            let delay = policy.jittered(policy.delay_for(attempt));
            assert!(delay >= policy.delay_for(attempt));
            assert!(delay <= Duration::from_millis(800));
        }
    }

    #[tokio::test]
    async fn test_schedule_exhausts_on_total_budget() {
        let clock = Arc::new(ManualClock::new());
        let policy = policy().with_max_total(Duration::from_millis(1000));
        let mut scheduler = BackoffScheduler::new(policy, clock.clone(), OperationContext::new());

        let mut handed_out = Vec::new();
        while let Some(delay) = scheduler.next_delay() {
            handed_out.push(delay);
            assert_eq!(scheduler.wait(delay).await, WaitOutcome::Elapsed);
        }

        // 100 + 200 + 400 = 700; the next 800 would overrun 1000.
        assert_eq!(
            handed_out,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
        assert_eq!(clock.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_schedule_respects_deadline() {
        let clock = Arc::new(ManualClock::new());
        let ctx = OperationContext::with_timeout(clock.as_ref(), Duration::from_millis(250));
        let mut scheduler = BackoffScheduler::new(policy(), clock, ctx);

        assert_eq!(scheduler.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(scheduler.wait(Duration::from_millis(100)).await, WaitOutcome::Elapsed);
        // 100 elapsed + 200 would land past the 250ms deadline.
        assert_eq!(scheduler.next_delay(), None);
    }

    #[test]
    fn test_cancelled_schedule_is_exhausted() {
        let handle = CancelHandle::new();
        let ctx = OperationContext::new().cancel_on(handle.signal());
        let mut scheduler = BackoffScheduler::new(policy(), Arc::new(ManualClock::new()), ctx);

        handle.cancel();
        assert_eq!(scheduler.next_delay(), None);
    }

    #[test]
    fn test_retry_after_floor_raises_delay() {
        let mut scheduler = BackoffScheduler::new(
            policy(),
            Arc::new(ManualClock::new()),
            OperationContext::new(),
        );
        assert_eq!(
            scheduler.next_delay_at_least(Some(Duration::from_secs(2))),
            Some(Duration::from_secs(2))
        );
        assert_eq!(scheduler.attempt(), 1);
    }

    #[tokio::test]
    async fn test_wait_returns_promptly_on_cancel() {
        let handle = CancelHandle::new();
        let ctx = OperationContext::new().cancel_on(handle.signal());
        let scheduler = BackoffScheduler::new(policy(), Arc::new(crate::clock::TokioClock), ctx);

        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            scheduler.wait(Duration::from_secs(3600)),
        )
        .await;
        assert_eq!(outcome.ok(), Some(WaitOutcome::Cancelled));
    }
}
