//! Exponential backoff with jitter for the `Recover` edge.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub jitter_fraction: f64,
    rng: Arc<Mutex<StdRng>>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(16),
            jitter_fraction: 0.2,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }
}

impl BackoffPolicy {
    /// A policy whose jitter is reproducible across runs: two policies built
    /// from the same seed and driven through the same attempt sequence
    /// produce byte-identical delays.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            ..Self::default()
        }
    }

    /// Delay before retry attempt `attempt` (1-indexed). Jitter is applied
    /// symmetrically around the computed delay, +/- `jitter_fraction`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.saturating_pow(attempt.saturating_sub(1));
        let raw = self.base.saturating_mul(exp).min(self.cap);

        let jitter_range = raw.as_secs_f64() * self.jitter_fraction;
        let offset = self
            .rng
            .lock()
            .expect("backoff rng lock poisoned")
            .gen_range(-jitter_range..=jitter_range);
        let jittered = (raw.as_secs_f64() + offset).max(0.0);
        Duration::from_secs_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_within_jitter_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=5 {
            let delay = policy.delay_for(attempt);
            let ideal = policy.base.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
            let capped = ideal.min(policy.cap.as_secs_f64());
            let lower = capped * (1.0 - policy.jitter_fraction) - 0.01;
            let upper = capped * (1.0 + policy.jitter_fraction) + 0.01;
            assert!(delay.as_secs_f64() >= lower.max(0.0), "attempt {attempt}: {delay:?} below {lower}");
            assert!(delay.as_secs_f64() <= upper, "attempt {attempt}: {delay:?} above {upper}");
        }
    }

    #[test]
    fn delay_never_exceeds_cap_plus_jitter() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay_for(10);
        assert!(delay.as_secs_f64() <= policy.cap.as_secs_f64() * (1.0 + policy.jitter_fraction) + 0.01);
    }

    #[test]
    fn fixed_seed_produces_identical_delays_across_runs() {
        let a = BackoffPolicy::with_seed(42);
        let b = BackoffPolicy::with_seed(42);
        for attempt in 1..=5 {
            assert_eq!(a.delay_for(attempt), b.delay_for(attempt));
        }
    }

    #[test]
    fn different_seeds_need_not_agree() {
        let a = BackoffPolicy::with_seed(1);
        let b = BackoffPolicy::with_seed(2);
        let diverged = (1..=5).any(|attempt| a.delay_for(attempt) != b.delay_for(attempt));
        assert!(diverged, "two distinct seeds produced identical jitter for every attempt");
    }
}
