use std::time::Duration;

/// Largest exponent applied to the base delay.
pub const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Delay to wait after attempt number `attempt` (zero based) failed:
/// `base * 2^attempt`, with the exponent capped at [`MAX_BACKOFF_EXPONENT`].
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.pow(attempt.min(MAX_BACKOFF_EXPONENT)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_calculation() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, 16), Duration::from_secs(65536));
        // Capped
        assert_eq!(backoff_delay(base, 17), Duration::from_secs(65536));
        assert_eq!(backoff_delay(base, 100), Duration::from_secs(65536));
    }

    #[test]
    fn test_backoff_scales_with_base() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(250));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(1));
        assert_eq!(backoff_delay(Duration::ZERO, 5), Duration::ZERO);
    }
}
