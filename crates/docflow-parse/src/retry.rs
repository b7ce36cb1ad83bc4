//! Retry/backoff policy for calls to the external parsing service.
//!
//! Delay computation is pure so it can be unit-tested without clocks;
//! jitter is applied separately at sleep time.

use std::time::Duration;

use docflow_core::defaults;

/// Exponential backoff with a cap and optional `Retry-After` override.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First-retry delay; doubles each attempt.
    pub base: Duration,
    /// Upper bound on any computed delay.
    pub cap: Duration,
    /// Attempts after the initial one.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(defaults::BACKOFF_BASE_MS),
            cap: Duration::from_millis(defaults::BACKOFF_CAP_MS),
            max_retries: defaults::MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, max_retries: u32) -> Self {
        Self {
            base,
            cap,
            max_retries,
        }
    }

    /// Base delay before retry number `attempt` (0-based), without
    /// jitter: `base * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32));
        let millis = (self.base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.cap)
    }

    /// Delay before retry number `attempt`, honoring a server-provided
    /// `Retry-After` value when present. An explicit server hint wins
    /// over the computed backoff but is still capped.
    pub fn delay_with_hint(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        match retry_after_secs {
            Some(secs) => Duration::from_secs(secs).min(self.cap),
            None => self.delay(attempt),
        }
    }

    /// Apply up to +/-25% random jitter so synchronized clients
    /// spread out after a shared failure.
    pub fn jittered(&self, delay: Duration) -> Duration {
        use rand::Rng;
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return delay;
        }
        let spread = millis / 4;
        let jitter = rand::thread_rng().gen_range(0..=spread * 2);
        Duration::from_millis(millis - spread + jitter)
    }

    /// Whether another retry is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(500), Duration::from_millis(30_000), 3)
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let p = policy();
        assert_eq!(p.delay(0), Duration::from_millis(500));
        assert_eq!(p.delay(1), Duration::from_millis(1_000));
        assert_eq!(p.delay(2), Duration::from_millis(2_000));
        assert_eq!(p.delay(3), Duration::from_millis(4_000));
    }

    #[test]
    fn test_delay_hits_cap() {
        let p = policy();
        assert_eq!(p.delay(10), Duration::from_millis(30_000));
        assert_eq!(p.delay(63), Duration::from_millis(30_000));
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let p = policy();
        assert_eq!(p.delay_with_hint(0, Some(7)), Duration::from_secs(7));
        assert_eq!(
            p.delay_with_hint(0, None),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_retry_after_is_capped() {
        let p = policy();
        assert_eq!(p.delay_with_hint(0, Some(600)), Duration::from_millis(30_000));
    }

    #[test]
    fn test_retry_budget() {
        let p = policy();
        assert!(p.should_retry(0));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = policy();
        let base = Duration::from_millis(1_000);
        for _ in 0..100 {
            let d = p.jittered(base);
            assert!(d >= Duration::from_millis(750), "jitter too low: {:?}", d);
            assert!(d <= Duration::from_millis(1_250), "jitter too high: {:?}", d);
        }
    }

    #[test]
    fn test_jitter_zero_delay_is_zero() {
        let p = policy();
        assert_eq!(p.jittered(Duration::ZERO), Duration::ZERO);
    }
}
