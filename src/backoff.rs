use std::time::Duration;

/// Exponential delay for the `attempt`-th transient retry (1-based).
///
/// Returns `min(base * 2^(attempt - 1), max)`. Attempt `0` is treated as `1`
/// and the multiplication saturates instead of overflowing.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let multiplier = 1u32 << exp;
    base.checked_mul(multiplier).unwrap_or(max).min(max)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::backoff_delay;

    #[test]
    fn doubles_from_base() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(1, base, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, base, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, base, max), Duration::from_millis(400));
        assert_eq!(backoff_delay(4, base, max), Duration::from_millis(800));
    }

    #[test]
    fn attempt_zero_uses_base() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(0, base, Duration::from_secs(30)), base);
    }

    #[test]
    fn caps_at_max() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(6, base, max), max);
        assert_eq!(backoff_delay(u32::MAX, base, max), max);
    }

    #[test]
    fn huge_base_saturates_to_max() {
        let max = Duration::from_secs(5);
        assert_eq!(backoff_delay(40, Duration::MAX, max), max);
    }
}
