use crate::data::event::Event;
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// Randomly thins out high-volume events.
///
/// Seeded samplers make the same decisions for the same sequence of calls, which keeps tests
/// deterministic.
#[derive(Clone, Debug)]
pub struct Sampler {
    rng: SmallRng,
}

impl Sampler {
    pub fn new(seed: u64) -> Sampler { Sampler { rng: SmallRng::seed_from_u64(seed) } }

    pub fn from_entropy() -> Sampler { Sampler { rng: SmallRng::from_entropy() } }

    /// Returns `true` with probability `rate`.  Rates outside `[0, 1]` are clamped.
    pub fn sample(&mut self, rate: f64) -> bool {
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 || rate.is_nan() {
            false
        } else {
            self.rng.gen::<f64>() < rate
        }
    }

    /// Keeps `event` with probability `rate`.
    pub fn filter(&mut self, event: Event, rate: f64) -> Option<Event> {
        if self.sample(rate) {
            Some(event)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Sampler;
    use crate::data::metric::Metric;

    #[test]
    fn test_seeded_samplers_agree() {
        let mut a = Sampler::new(0x5eed);
        let mut b = Sampler::new(0x5eed);
        let first: Vec<bool> = (0..256).map(|_| a.sample(0.3)).collect();
        let second: Vec<bool> = (0..256).map(|_| b.sample(0.3)).collect();
        assert_eq!(first, second);

        let kept = first.iter().filter(|&&kept| kept).count();
        assert!(kept > 30 && kept < 130, "kept {} of 256 at rate 0.3", kept);
    }

    #[test]
    fn test_rate_bounds() {
        let mut sampler = Sampler::new(1);
        assert!((0..100).all(|_| sampler.sample(1.0)));
        assert!((0..100).all(|_| !sampler.sample(0.0)));
        assert!(!sampler.sample(f64::NAN));
        assert!(sampler.sample(2.0));
    }

    #[test]
    fn test_filter_events() {
        let mut sampler = Sampler::new(7);
        let metric = Metric::counter("sampled");
        assert!(sampler.filter(metric.inc(), 1.0).is_some());
        assert!(sampler.filter(metric.inc(), 0.0).is_none());
    }
}
