use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Source of the random numbers used by a [`Forest`](crate::Forest).
///
/// The bounded samplers return `None` when the waiting time exceeds
/// the limit, i.e. no event happens in the time (or sequence) window.
pub trait RandomGenerator {
    /// Uniform on `[0, 1)`.
    fn sample(&mut self) -> f64;

    /// Uniform on `0..n`.
    ///
    /// # Panics
    ///
    /// * If `n == 0`.
    fn sample_int(&mut self, n: usize) -> usize {
        assert!(n > 0, "can't sample from an empty range");
        ((self.sample() * n as f64) as usize).min(n - 1)
    }

    /// Exponential waiting time with the given rate.
    fn sample_expo(&mut self, rate: f64) -> f64 {
        -(-self.sample()).ln_1p() / rate
    }

    /// Exponential waiting time, `None` if it is not below `limit`.
    fn sample_expo_limit(&mut self, rate: f64, limit: f64) -> Option<f64>;

    /// Waiting time for a rate that starts at `rate` and changes as
    /// `rate * exp(growth * t)`, `None` if it is not below `limit`.
    fn sample_expo_expo_limit(&mut self, rate: f64, growth: f64, limit: f64) -> Option<f64>;
}

/// Integral of `rate * exp(growth * t)` over `[0, limit]`.
fn integrated_rate(rate: f64, growth: f64, limit: f64) -> f64 {
    if growth == 0.0 {
        rate * limit
    } else {
        (rate / growth * (growth * limit).exp_m1()).max(0.0)
    }
}

/// Inverse of [`integrated_rate`] at `budget`.
///
/// `ln_1p` keeps this accurate as `growth` approaches zero.
fn waiting_time(rate: f64, growth: f64, budget: f64) -> f64 {
    if growth == 0.0 {
        budget / rate
    } else {
        ((growth * budget / rate).ln_1p() / growth).max(0.0)
    }
}

/// A seedable generator backed by ChaCha8.
///
/// Bounded exponential samples share one unit exponential:
/// a window without an event only spends the rate integrated over it.
/// A waiting time therefore does not depend on how the time line
/// is split into windows.
#[derive(Debug, Clone)]
pub struct ChaChaGenerator {
    rng: ChaCha8Rng,
    seed: u64,
    unit_exponential: f64,
}

impl ChaChaGenerator {
    pub fn seed_from_u64(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let unit_exponential = Self::draw_unit_exponential(&mut rng);
        Self {
            rng,
            seed,
            unit_exponential,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn draw_unit_exponential(rng: &mut ChaCha8Rng) -> f64 {
        -(-rng.gen::<f64>()).ln_1p()
    }

    fn bounded_waiting_time(&mut self, rate: f64, growth: f64, limit: f64) -> Option<f64> {
        assert!(rate >= 0.0 && limit >= 0.0, "invalid rate {rate} or limit {limit}");
        if rate == 0.0 {
            return None;
        }
        let budget = integrated_rate(rate, growth, limit);
        if self.unit_exponential >= budget {
            self.unit_exponential -= budget;
            return None;
        }
        let time = waiting_time(rate, growth, self.unit_exponential);
        self.unit_exponential = Self::draw_unit_exponential(&mut self.rng);
        if time.is_finite() && time < limit {
            Some(time)
        } else {
            None
        }
    }
}

impl RandomGenerator for ChaChaGenerator {
    fn sample(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn sample_expo_limit(&mut self, rate: f64, limit: f64) -> Option<f64> {
        self.bounded_waiting_time(rate, 0.0, limit)
    }

    fn sample_expo_expo_limit(&mut self, rate: f64, growth: f64, limit: f64) -> Option<f64> {
        self.bounded_waiting_time(rate, growth, limit)
    }
}

#[cfg(test)]
mod test_random_generator {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_determinism() {
        let mut a = ChaChaGenerator::seed_from_u64(42);
        let mut b = ChaChaGenerator::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(a.sample(), b.sample());
            assert_eq!(
                a.sample_expo_limit(1.5, 0.3),
                b.sample_expo_limit(1.5, 0.3)
            );
        }
        assert_eq!(a.seed(), 42);
    }

    #[test]
    fn test_sample_int_range() {
        let mut rng = ChaChaGenerator::seed_from_u64(1);
        let mut counts = [0_usize; 5];
        for _ in 0..10000 {
            counts[rng.sample_int(5)] += 1;
        }
        assert!(counts.iter().all(|&c| c > 1800 && c < 2200), "{counts:?}");
    }

    #[test]
    fn test_zero_rate_has_no_event() {
        let mut rng = ChaChaGenerator::seed_from_u64(3);
        assert!(rng.sample_expo_limit(0.0, f64::INFINITY).is_none());
        assert!(rng.sample_expo_expo_limit(0.0, 2.0, 10.0).is_none());
    }

    #[test]
    fn test_splitting_windows_keeps_waiting_time() {
        for seed in 0..50 {
            let mut whole = ChaChaGenerator::seed_from_u64(seed);
            let mut split = ChaChaGenerator::seed_from_u64(seed);
            let expected = whole.sample_expo_limit(2.0, f64::INFINITY).unwrap();
            match split.sample_expo_limit(2.0, 0.3) {
                Some(t) => assert_eq!(t, expected),
                None => {
                    let t = split.sample_expo_limit(2.0, f64::INFINITY).unwrap();
                    assert!((0.3 + t - expected).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_growth_near_zero_matches_exponential() {
        for seed in 0..20 {
            let mut a = ChaChaGenerator::seed_from_u64(seed);
            let mut b = ChaChaGenerator::seed_from_u64(seed);
            let t0 = a.sample_expo_limit(0.7, f64::INFINITY).unwrap();
            let t1 = b.sample_expo_expo_limit(0.7, 1e-14, f64::INFINITY).unwrap();
            assert!((t0 - t1).abs() < 1e-9, "{t0} {t1}");
        }
    }

    #[test]
    fn test_negative_growth_can_miss() {
        // The total hazard is rate / |growth| = 0.01, so most draws see no event.
        let mut rng = ChaChaGenerator::seed_from_u64(11);
        let misses = (0..1000)
            .filter(|_| rng.sample_expo_expo_limit(0.01, -1.0, f64::INFINITY).is_none())
            .count();
        assert!(misses > 950);
    }

    #[test]
    fn test_expo_expo_mean() {
        // E[t] = e * E1(1) for rate 1 and growth 1.
        let mut rng = ChaChaGenerator::seed_from_u64(2024);
        let n = 100000;
        let total: f64 = (0..n)
            .map(|_| rng.sample_expo_expo_limit(1.0, 1.0, f64::INFINITY).unwrap())
            .sum();
        let mean = total / n as f64;
        assert!((mean - 0.596_347_4).abs() < 0.01, "{mean}");
    }

    proptest! {
        #[test]
        fn test_bounded_samples_are_valid(
            seed in any::<u64>(),
            rate in 1e-8..1e3f64,
            growth in -10.0..10.0f64,
            limit in 0.0..100.0f64,
        ) {
            let mut rng = ChaChaGenerator::seed_from_u64(seed);
            for _ in 0..10 {
                if let Some(t) = rng.sample_expo_expo_limit(rate, growth, limit) {
                    prop_assert!(t >= 0.0);
                    prop_assert!(t < limit);
                    prop_assert!(!t.is_nan());
                }
            }
        }
    }
}
