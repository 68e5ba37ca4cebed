//! Latency injection for exercising the fallback path.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// How often, and for how long, to stall a call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChaosConfig {
    /// Probability in `[0, 1]` that a call is delayed.
    pub failure_rate: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            min_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(7000),
        }
    }
}

impl ChaosConfig {
    pub fn new(failure_rate: f64, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            failure_rate,
            min_delay,
            max_delay,
        }
    }

    /// Clamps the rate into `[0, 1]` and orders the delay bounds.
    pub fn normalized(self) -> Self {
        let failure_rate = if self.failure_rate.is_nan() {
            0.0
        } else {
            self.failure_rate.clamp(0.0, 1.0)
        };
        let (min_delay, max_delay) = if self.min_delay <= self.max_delay {
            (self.min_delay, self.max_delay)
        } else {
            (self.max_delay, self.min_delay)
        };
        Self {
            failure_rate,
            min_delay,
            max_delay,
        }
    }
}

/// Delays a fraction of calls by a random duration. Never changes results.
#[derive(Debug, Clone)]
pub struct ChaosInjector {
    config: ChaosConfig,
}

impl Default for ChaosInjector {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ChaosInjector {
    pub fn new(config: ChaosConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(ChaosConfig::default())
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.failure_rate > 0.0
    }

    /// Decides whether the next call is delayed, and by how much.
    pub fn sample_delay(&self) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(self.config.failure_rate) {
            return None;
        }
        let min = millis(self.config.min_delay);
        let max = millis(self.config.max_delay);
        Some(Duration::from_millis(rng.gen_range(min..=max)))
    }

    /// Sleeps if this call was picked for a delay.
    pub async fn perturb(&self) {
        if let Some(delay) = self.sample_delay() {
            metrics::counter!("chaos_delays_total").increment(1);
            debug!(delay_ms = millis(delay), "Injecting chaos delay");
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs `fut` after a possible injected delay.
    pub async fn wrap<F: Future>(&self, fut: F) -> F::Output {
        self.perturb().await;
        fut.await
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_clamps_and_swaps() {
        let config = ChaosConfig::new(
            1.7,
            Duration::from_millis(500),
            Duration::from_millis(100),
        )
        .normalized();
        assert_eq!(config.failure_rate, 1.0);
        assert_eq!(config.min_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_millis(500));

        let negative = ChaosConfig::new(-0.5, Duration::ZERO, Duration::ZERO).normalized();
        assert_eq!(negative.failure_rate, 0.0);
        let nan = ChaosConfig::new(f64::NAN, Duration::ZERO, Duration::ZERO).normalized();
        assert_eq!(nan.failure_rate, 0.0);
    }

    #[test]
    fn test_disabled_never_delays() {
        let chaos = ChaosInjector::disabled();
        assert!(!chaos.is_enabled());
        for _ in 0..100 {
            assert_eq!(chaos.sample_delay(), None);
        }
    }

    #[test]
    fn test_full_rate_always_delays_within_bounds() {
        let chaos = ChaosInjector::new(ChaosConfig::new(
            1.0,
            Duration::from_millis(20),
            Duration::from_millis(30),
        ));
        for _ in 0..100 {
            let delay = chaos.sample_delay().unwrap();
            assert!(delay >= Duration::from_millis(20));
            assert!(delay <= Duration::from_millis(30));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_delays_but_keeps_output() {
        let chaos = ChaosInjector::new(ChaosConfig::new(
            1.0,
            Duration::from_secs(3),
            Duration::from_secs(3),
        ));

        let start = tokio::time::Instant::now();
        let value = chaos.wrap(async { 42 }).await;

        assert_eq!(value, 42);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
