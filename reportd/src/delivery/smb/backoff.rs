use std::time::Duration;

/// Jittered exponential back-off for SMB reconnects.
///
/// Each sleep is `delay/2 + rand(0, delay/2)`, clamped to
/// `[initial, max]`; the delay doubles after every sleep.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Sleep before the next attempt, then double the delay.
    pub fn next_sleep(&mut self) -> Duration {
        let half = self.current / 2;
        let jitter = half.mul_f64(rand::random::<f64>());
        let sleep = (half + jitter).clamp(self.initial, self.max);
        self.current = self.current.saturating_mul(2).min(self.max);
        sleep
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_stays_in_bounds() {
        let mut backoff = Backoff::default();
        for _ in 0..20 {
            let sleep = backoff.next_sleep();
            assert!(sleep >= Duration::from_secs(1));
            assert!(sleep <= Duration::from_secs(60));
        }
        assert_eq!(backoff.current, Duration::from_secs(60));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_sleep();
        backoff.next_sleep();
        backoff.reset();
        assert_eq!(backoff.current, Duration::from_millis(100));
    }
}
