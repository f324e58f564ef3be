//! Retry budget and backoff curve for transient HTTP failures (429 / 5xx)

use std::time::Duration;

/// Default delay before repeating a request that got a 5xx
pub const DEFAULT_SERVER_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Delay curve between attempts of the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every time
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the `attempt`-th retry (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(d) => d,
            Self::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// How often and how patiently a single page request is repeated.
///
/// `max_attempts = None` retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn unbounded(backoff: Backoff) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    pub fn bounded(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    /// Whether another retry is allowed after `retries_so_far` retries.
    pub fn allows(&self, retries_so_far: u32) -> bool {
        self.max_attempts.is_none_or(|max| retries_so_far < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Backoff::Fixed(DEFAULT_SERVER_ERROR_BACKOFF))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_constant() {
        let b = Backoff::Fixed(Duration::from_millis(250));
        assert_eq!(b.delay(1), Duration::from_millis(250));
        assert_eq!(b.delay(10), Duration::from_millis(250));
    }

    #[test]
    fn exponential_backoff_caps() {
        let b = Backoff::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
        };
        assert_eq!(b.delay(1), Duration::from_secs(1));
        assert_eq!(b.delay(2), Duration::from_secs(2));
        assert_eq!(b.delay(4), Duration::from_secs(8));
        assert_eq!(b.delay(5), Duration::from_secs(10));
        assert_eq!(b.delay(40), Duration::from_secs(10));
    }

    #[test]
    fn default_is_unbounded_fixed() {
        let p = RetryPolicy::default();
        assert!(p.allows(u32::MAX - 1));
        assert_eq!(p.backoff, Backoff::Fixed(DEFAULT_SERVER_ERROR_BACKOFF));
    }

    #[test]
    fn bounded_stops_at_limit() {
        let p = RetryPolicy::bounded(2, Backoff::Fixed(Duration::ZERO));
        assert!(p.allows(0));
        assert!(p.allows(1));
        assert!(!p.allows(2));
    }
}
