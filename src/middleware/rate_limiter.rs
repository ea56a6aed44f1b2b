// Sliding-window rate limiting for provider dispatches.
//
// Two ceilings apply simultaneously: a trailing 60-second window and a
// daily quota, both taken from the active tier. The limiter itself is
// stateless; all counters live in the shared UsageTracker so that stats
// reporting and admission control read the same numbers.

use crate::core::types::ApiTier;
use crate::utils::usage::{UsageTracker, MINUTE_WINDOW};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Re-check interval used when the daily quota is exhausted, since no
    /// window timestamp can predict when the day rolls over.
    recheck_interval: Duration,
}

impl RateLimiter {
    pub fn new(recheck_interval: Duration) -> Self {
        Self { recheck_interval }
    }

    /// Whether one more dispatch is admissible right now. Prunes the minute
    /// window as a side effect; never mutates admission counts.
    pub fn can_admit(&self, tier: &ApiTier, usage: &UsageTracker, now: Instant) -> bool {
        let in_window = usage.requests_last_minute(now);
        if in_window >= tier.requests_per_minute as usize {
            debug!(
                in_window,
                limit = tier.requests_per_minute,
                "per-minute ceiling reached"
            );
            return false;
        }

        let today = usage.requests_today(now);
        if today >= tier.requests_per_day {
            debug!(today, limit = tier.requests_per_day, "daily quota exhausted");
            return false;
        }

        true
    }

    /// Account for one admitted dispatch. Callers must invoke this exactly
    /// once per provider attempt they were admitted for; a model fallback
    /// retry within the same admission does not get a second call.
    pub fn record_admission(&self, usage: &UsageTracker, now: Instant) {
        usage.record_admission(now);
    }

    /// How long until the next admission could succeed.
    ///
    /// When the minute window is full this is the time until its oldest
    /// entry ages out. When only the daily quota blocks, there is nothing
    /// to compute from, so the configured re-check interval is returned.
    pub fn next_admission_delay(
        &self,
        tier: &ApiTier,
        usage: &UsageTracker,
        now: Instant,
    ) -> Duration {
        let in_window = usage.requests_last_minute(now);
        if in_window >= tier.requests_per_minute as usize {
            if let Some(oldest) = usage.oldest_in_window(now) {
                let age = now.saturating_duration_since(oldest);
                return MINUTE_WINDOW.saturating_sub(age);
            }
        }

        self.recheck_interval
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
