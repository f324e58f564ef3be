//! Request throttling from a fixed interval or server reset hints

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::SharedClock;
use crate::http::ResponseMeta;

/// Reset values above this are absolute Unix timestamps, below are deltas.
const EPOCH_THRESHOLD: f64 = 1_000_000_000.0;

/// Longest wait a server hint can impose.
pub const MAX_RESET_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

const REMAINING_HEADERS: &[&str] = &["x-ratelimit-remaining", "ratelimit-remaining"];
const RESET_HEADERS: &[&str] = &["x-ratelimit-reset", "ratelimit-reset"];

/// What a response says about the rate-limit window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHint {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitHint {
    /// Parse rate-limit headers, resolving relative resets against `now`.
    ///
    /// `Retry-After` wins over the `*-ratelimit-*` pair and implies an
    /// exhausted window.
    pub fn from_meta(meta: &ResponseMeta, now: DateTime<Utc>) -> Self {
        if let Some(at) = meta.header("retry-after").and_then(|v| parse_retry_after(v, now)) {
            return Self {
                remaining: Some(0),
                reset_at: Some(at),
            };
        }

        let remaining = REMAINING_HEADERS
            .iter()
            .find_map(|h| meta.header(h))
            .and_then(|v| v.trim().parse().ok());
        let reset_at = RESET_HEADERS
            .iter()
            .find_map(|h| meta.header(h))
            .and_then(|v| parse_reset(v, now));
        Self {
            remaining,
            reset_at,
        }
    }

    /// The window is exhausted and the server told us when it reopens.
    pub fn exhausted_until(&self) -> Option<DateTime<Utc>> {
        match (self.remaining, self.reset_at) {
            (Some(0), Some(at)) => Some(at),
            _ => None,
        }
    }
}

fn parse_reset(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    if secs > EPOCH_THRESHOLD {
        DateTime::from_timestamp_millis((secs * 1000.0) as i64)
    } else {
        after(now, Duration::try_from_secs_f64(secs).ok()?)
    }
}

fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return after(now, Duration::from_secs(secs));
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// `now + delay`, with the delay capped at [`MAX_RESET_WAIT`].
fn after(now: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    let delay = chrono::Duration::from_std(delay.min(MAX_RESET_WAIT)).ok()?;
    now.checked_add_signed(delay)
}

/// Blocks the caller until the next request may be issued.
///
/// Owned by exactly one extraction loop; concurrent runs need their own.
pub struct RateLimiter {
    clock: SharedClock,
    min_interval: Duration,
    last_request: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .field("last_request", &self.last_request)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration, clock: SharedClock) -> Self {
        Self {
            clock,
            min_interval,
            last_request: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_request(&self) -> Option<DateTime<Utc>> {
        self.last_request
    }

    /// Sleep until it is safe to send the next request, then mark it as sent.
    ///
    /// An exhausted window in `last` means sleeping until its reset (never
    /// negative). Otherwise the residual of `min_interval` since the previous
    /// call is slept. Returns the time slept.
    pub fn wait(&mut self, last: Option<&ResponseMeta>) -> Duration {
        let now = self.clock.now();
        let hint = last.map(|m| RateLimitHint::from_meta(m, now));

        let delay = match hint.and_then(|h| h.exhausted_until()) {
            Some(reset_at) => {
                let d = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
                if d > MAX_RESET_WAIT {
                    log::warn!(
                        "rate limit reset {reset_at} is too far out, waiting {MAX_RESET_WAIT:?}"
                    );
                }
                let d = d.min(MAX_RESET_WAIT);
                log::debug!("rate limit exhausted, sleeping {d:?} until reset");
                d
            }
            None => match self.last_request {
                Some(prev) => {
                    let elapsed = (now - prev).to_std().unwrap_or(Duration::ZERO);
                    self.min_interval.saturating_sub(elapsed)
                }
                None => Duration::ZERO,
            },
        };

        if !delay.is_zero() {
            self.clock.sleep(delay);
        }
        self.last_request = Some(self.clock.now());
        delay
    }
}
