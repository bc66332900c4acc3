use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Wait used after a 429 without a usable `Retry-After` header.
///
/// Lichess asks clients to wait a full minute after being rate limited.
pub const DEFAULT_RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(60);

/// Where a [`RateLimitSignal`] wait came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryHint {
    /// `Retry-After: <seconds>`.
    Seconds,
    /// `Retry-After: <http-date>`.
    Date,
    /// Header absent or unparsable.
    Fallback,
}

/// How long to wait before the next attempt after a 429.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimitSignal {
    pub wait: Duration,
    pub hint: RetryHint,
}

impl RateLimitSignal {
    /// Reads the wait duration from a "too many requests" response's headers.
    pub fn extract(headers: &HeaderMap, now: DateTime<Utc>, fallback: Duration) -> Self {
        let value = headers
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim);

        if let Some(value) = value {
            if let Some(wait) = parse_seconds(value) {
                return Self {
                    wait,
                    hint: RetryHint::Seconds,
                };
            }
            if let Some(at) = parse_http_date(value) {
                let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
                return Self {
                    wait,
                    hint: RetryHint::Date,
                };
            }
        }

        Self {
            wait: fallback,
            hint: RetryHint::Fallback,
        }
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
