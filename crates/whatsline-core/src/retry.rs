use std::time::Duration;

/// Reconnect pacing: every consecutive failed attempt doubles the wait up
/// to a ceiling, until [`ReconnectBackoff::reset`] after a successful open.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(floor_ms: u64, ceiling_ms: u64) -> Self {
        let floor = Duration::from_millis(floor_ms);
        Self {
            floor,
            ceiling: Duration::from_millis(ceiling_ms),
            current: floor,
            attempt: 0,
        }
    }

    /// The wait before the next attempt, paired with that attempt's
    /// ordinal (1-based). Advances the pace.
    pub fn next_delay(&mut self) -> (u32, Duration) {
        let delay = self.current.min(self.ceiling);
        self.attempt = self.attempt.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        (self.attempt, delay)
    }

    /// Drop back to the floor once a connection actually opened.
    pub fn reset(&mut self) {
        self.current = self.floor;
        self.attempt = 0;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_wait_is_the_floor() {
        let mut backoff = ReconnectBackoff::new(250, 8_000);
        assert_eq!(backoff.next_delay(), (1, Duration::from_millis(250)));
    }

    #[test]
    fn consecutive_failures_double_the_wait() {
        let mut backoff = ReconnectBackoff::new(100, 10_000);
        let waits: Vec<_> = (0..4).map(|_| backoff.next_delay().1).collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn wait_never_exceeds_the_ceiling() {
        let mut backoff = ReconnectBackoff::new(1_000, 4_000);
        let last = (0..6).map(|_| backoff.next_delay().1).last();
        assert_eq!(last, Some(Duration::from_millis(4_000)));
    }

    #[test]
    fn reset_returns_to_the_floor() {
        let mut backoff = ReconnectBackoff::new(500, 30_000);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), (1, Duration::from_millis(500)));
    }
}
