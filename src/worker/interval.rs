//! Inter-arrival interval generation.
//!
//! A generator maps a target rate to the delay before the next job issuance.
//! Returning [`Duration::ZERO`] means "do not pace": the worker treats the
//! situation exactly like ASAP mode and issues as soon as a permit is free.

use std::sync::Arc;
use std::time::Duration;

use rand::thread_rng;
use rand_distr::{Distribution, Exp};

/// Maps a target rate (queries per second) to the next inter-arrival delay.
///
/// Generators must be pure apart from randomness: the worker calls them from
/// its scheduling loop every time it re-arms the issuance timer.
pub type IntervalGenerator = Arc<dyn Fn(f64) -> Duration + Send + Sync>;

/// Fixed inter-arrival pacing: `1s / qps`, or zero when `qps` is zero.
pub fn fixed_interval(qps: f64) -> Duration {
    if qps <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(1.0 / qps).unwrap_or(Duration::MAX)
}

/// Exponentially distributed inter-arrival pacing with mean `1 / qps`,
/// producing Poisson arrivals. Returns zero when `qps` is zero.
pub fn exponential_interval(qps: f64) -> Duration {
    if qps <= 0.0 {
        return Duration::ZERO;
    }
    let exp = match Exp::new(qps) {
        Ok(exp) => exp,
        Err(_) => return Duration::ZERO,
    };
    Duration::try_from_secs_f64(exp.sample(&mut thread_rng())).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_matches_rate() {
        assert_eq!(fixed_interval(1.0), Duration::from_secs(1));
        assert_eq!(fixed_interval(5.0), Duration::from_millis(200));
        assert_eq!(fixed_interval(1000.0), Duration::from_millis(1));
    }

    #[test]
    fn zero_qps_disables_pacing() {
        assert_eq!(fixed_interval(0.0), Duration::ZERO);
        assert_eq!(exponential_interval(0.0), Duration::ZERO);
    }

    #[test]
    fn exponential_mean_tracks_rate() {
        let qps = 100.0;
        let n = 10_000;
        let total: Duration = (0..n).map(|_| exponential_interval(qps)).sum();
        let mean = total.as_secs_f64() / n as f64;
        // Mean of Exp(100) is 10ms; allow a wide band for sampling noise.
        assert!(mean > 0.005 && mean < 0.02, "mean interval {mean}s");
    }

    #[test]
    fn exponential_samples_vary() {
        let samples: Vec<Duration> = (0..100).map(|_| exponential_interval(10.0)).collect();
        let first = samples[0];
        assert!(samples.iter().any(|s| *s != first));
    }
}
