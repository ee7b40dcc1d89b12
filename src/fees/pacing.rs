//! Fixed-interval pacing for sequential RPC work.

use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Hands out permits no closer together than `period`. The first permit is
/// immediate.
pub struct Pacer {
    ticker: Option<Interval>,
}

impl Pacer {
    /// A zero period disables pacing.
    pub fn new(period: Duration) -> Self {
        let ticker = (!period.is_zero()).then(|| {
            let mut ticker = interval(period);
            // A slow call should not be followed by a burst of catch-up permits
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        Self { ticker }
    }

    pub async fn ready(&mut self) {
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_permits_are_spaced() {
        let start = Instant::now();
        let mut pacer = Pacer::new(Duration::from_millis(100));
        pacer.ready().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        pacer.ready().await;
        pacer.ready().await;
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_work_does_not_cause_burst() {
        let mut pacer = Pacer::new(Duration::from_millis(100));
        pacer.ready().await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        let before = Instant::now();
        pacer.ready().await;
        pacer.ready().await;
        assert_eq!(before.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_never_waits() {
        let start = Instant::now();
        let mut pacer = Pacer::new(Duration::ZERO);
        for _ in 0..5 {
            pacer.ready().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
