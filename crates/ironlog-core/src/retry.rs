//! Bounded retry with exponential backoff.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::rng::DeterministicRng;

/// Retry policy shared by notifications, fan-out deliveries and the job
/// runner.
///
/// The nominal delay before attempt `n + 1` is `base_delay * 2^(n - 1)`,
/// capped at `max_delay`. The scheduled delay is drawn from
/// `[(1 - jitter) * nominal, nominal]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after which an item is dead-lettered.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Fraction of the nominal delay that may be shaved off, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60 * 60),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Default attempt ceiling, also used as the manual-requeue ceiling.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Returns a policy with a different attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether an item with `attempts` attempts has none left.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Nominal (unjittered) delay after `attempts` failed attempts.
    #[must_use]
    pub fn nominal_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Jittered delay after `attempts` failed attempts.
    pub fn jittered_delay(&self, attempts: u32, rng: &mut dyn DeterministicRng) -> Duration {
        let nominal = self.nominal_delay(attempts);
        let jitter = self.jitter.clamp(0.0, 1.0);
        nominal.mul_f64(1.0 - jitter * rng.next_f64())
    }

    /// When the next automatic attempt may start, or `None` once the item is
    /// exhausted.
    pub fn next_attempt_at(
        &self,
        attempts: u32,
        now: DateTime<Utc>,
        rng: &mut dyn DeterministicRng,
    ) -> Option<DateTime<Utc>> {
        if self.is_exhausted(attempts) {
            return None;
        }
        let delay = self.jittered_delay(attempts, rng);
        let delay = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct Fixed(f64);

    impl DeterministicRng for Fixed {
        fn next_f64(&mut self) -> f64 {
            self.0
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_nominal_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.nominal_delay(1), Duration::from_secs(30));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(60));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(120));
    }

    #[test]
    fn test_nominal_delay_is_capped() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.nominal_delay(40), Duration::from_secs(3600));
    }

    #[test]
    fn test_jittered_delay_never_exceeds_nominal() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.jittered_delay(2, &mut Fixed(0.0)), Duration::from_secs(60));
        assert_eq!(policy.jittered_delay(2, &mut Fixed(0.5)), Duration::from_secs(45));
    }

    #[test]
    fn test_next_attempt_at_is_none_when_exhausted() {
        let policy = RetryPolicy::default();

        assert!(policy.next_attempt_at(5, fixed_now(), &mut Fixed(0.0)).is_none());
        assert_eq!(
            policy.next_attempt_at(1, fixed_now(), &mut Fixed(0.0)),
            Some(fixed_now() + TimeDelta::seconds(30))
        );
    }
}
