use super::{event::Op, LocalValue, Quantile, Reading};
use crate::{
    error::{Error, Result},
    helper::{floor_duration, MIN_INTERVAL},
};
use hdrhistogram::Histogram as HdrHistogram;
use std::{
    fmt,
    str::FromStr,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

/// What a histogram does with a value outside its configured bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutOfRangePolicy {
    /// Clamp the value to the nearest bound and record it.
    Truncate,
    /// Drop the value.
    Ignore,
    /// Panic.
    Panic,
}

impl FromStr for OutOfRangePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "truncate" => Ok(OutOfRangePolicy::Truncate),
            "ignore" => Ok(OutOfRangePolicy::Ignore),
            "panic" => Ok(OutOfRangePolicy::Panic),
            other => Err(Error::config(format!("unknown out-of-range policy '{}'", other))),
        }
    }
}

impl fmt::Display for OutOfRangePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            OutOfRangePolicy::Truncate => write!(f, "truncate"),
            OutOfRangePolicy::Ignore => write!(f, "ignore"),
            OutOfRangePolicy::Panic => write!(f, "panic"),
        }
    }
}

/// Bounds, precision and reporting settings for a histogram metric.
///
/// A `HistogramConfig` can only be constructed valid: `new` checks the bounds, the precision and
/// the quantile list up front.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramConfig {
    min: i64,
    max: i64,
    significant_digits: u8,
    quantiles: Vec<f64>,
    policy: OutOfRangePolicy,
    flush_interval: Duration,
}

impl HistogramConfig {
    /// Creates a configuration.
    ///
    /// `min` must be non-negative and no greater than `max`, `significant_digits` at most 5, and
    /// `quantiles` at least two strictly ascending values between 0 and 1.
    pub fn new(min: i64, max: i64, significant_digits: u8, quantiles: Vec<f64>) -> Result<HistogramConfig> {
        if min < 0 {
            return Err(Error::config(format!("histogram min {} is negative", min)));
        }
        if min > max {
            return Err(Error::config(format!("histogram min {} exceeds max {}", min, max)));
        }
        if significant_digits > 5 {
            return Err(Error::config(format!(
                "histogram significant digits {} exceeds 5",
                significant_digits
            )));
        }
        if quantiles.len() < 2 {
            return Err(Error::config("histogram needs at least two quantiles"));
        }
        if quantiles.iter().any(|q| !(0.0..=1.0).contains(q)) {
            return Err(Error::config("histogram quantiles must be between 0 and 1"));
        }
        if quantiles.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::config("histogram quantiles must be strictly ascending"));
        }

        let config = HistogramConfig {
            min,
            max,
            significant_digits,
            quantiles,
            policy: OutOfRangePolicy::Truncate,
            flush_interval: Duration::from_secs(1),
        };

        // Surface anything the bucketed structure itself rejects now rather than on first use.
        config.build()?;
        Ok(config)
    }

    pub fn with_policy(mut self, policy: OutOfRangePolicy) -> HistogramConfig {
        self.policy = policy;
        self
    }

    /// Sets how often the histogram is resolved in the background, floored to 100ms.
    pub fn with_flush_interval(mut self, interval: Duration) -> HistogramConfig {
        self.flush_interval = floor_duration(interval, MIN_INTERVAL);
        self
    }

    pub fn min(&self) -> i64 { self.min }

    pub fn max(&self) -> i64 { self.max }

    pub fn significant_digits(&self) -> u8 { self.significant_digits }

    pub fn quantiles(&self) -> &[f64] { &self.quantiles }

    pub fn policy(&self) -> OutOfRangePolicy { self.policy }

    pub fn flush_interval(&self) -> Duration { self.flush_interval }

    fn build(&self) -> Result<HdrHistogram<u64>> {
        let high = (self.max as u64).max(2);
        HdrHistogram::new_with_bounds(1, high, self.significant_digits)
            .map_err(|e| Error::config(format!("invalid histogram bounds: {:?}", e)))
    }
}

impl Default for HistogramConfig {
    fn default() -> HistogramConfig {
        HistogramConfig {
            min: 0,
            max: 3_600_000_000,
            significant_digits: 3,
            quantiles: vec![0.5, 0.9, 0.99, 0.999],
            policy: OutOfRangePolicy::Truncate,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Lock-guarded bucketed histogram backing histogram series.
pub struct HistogramValue {
    config: HistogramConfig,
    histogram: Mutex<HdrHistogram<u64>>,
}

impl HistogramValue {
    pub fn new(config: HistogramConfig) -> Result<HistogramValue> {
        let histogram = config.build()?;
        Ok(HistogramValue {
            config,
            histogram: Mutex::new(histogram),
        })
    }

    /// Number of values recorded so far.
    pub fn len(&self) -> u64 { self.lock().len() }

    fn lock(&self) -> MutexGuard<HdrHistogram<u64>> {
        // Recording never leaves the histogram half-updated, so a poisoned lock is still usable.
        self.histogram.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn quantiles(&self) -> Reading {
        let histogram = self.lock();
        let quantiles = self
            .config
            .quantiles
            .iter()
            .map(|&quantile| Quantile {
                quantile,
                value: histogram.value_at_quantile(quantile) as i64,
            })
            .collect();
        Reading::Quantiles(quantiles)
    }
}

impl LocalValue for HistogramValue {
    fn apply(&self, op: &Op) -> Option<i64> {
        let mut value = op.apply(0);
        if value < self.config.min || value > self.config.max {
            match self.config.policy {
                OutOfRangePolicy::Truncate => value = value.clamp(self.config.min, self.config.max),
                OutOfRangePolicy::Ignore => return None,
                OutOfRangePolicy::Panic => panic!(
                    "histogram value {} outside of [{}, {}]",
                    value, self.config.min, self.config.max
                ),
            }
        }

        self.lock().saturating_record(value as u64);
        Some(value)
    }

    fn resolve(&self) -> Reading { self.quantiles() }

    fn peek(&self) -> Reading { self.quantiles() }
}

#[cfg(test)]
mod tests {
    use super::{HistogramConfig, HistogramValue, OutOfRangePolicy};
    use crate::data::{event::Op, LocalValue, Reading};
    use std::time::Duration;

    fn config(policy: OutOfRangePolicy) -> HistogramConfig {
        HistogramConfig::new(10, 1_000, 3, vec![0.0, 0.5, 1.0])
            .unwrap()
            .with_policy(policy)
    }

    #[test]
    fn test_config_validation() {
        assert!(HistogramConfig::new(0, 100, 3, vec![0.5, 0.99]).is_ok());
        assert!(HistogramConfig::new(100, 10, 3, vec![0.5, 0.99]).is_err());
        assert!(HistogramConfig::new(-1, 10, 3, vec![0.5, 0.99]).is_err());
        assert!(HistogramConfig::new(0, 100, 3, vec![0.5]).is_err());
        assert!(HistogramConfig::new(0, 100, 3, vec![0.99, 0.5]).is_err());
        assert!(HistogramConfig::new(0, 100, 3, vec![0.5, 1.5]).is_err());
        assert!(HistogramConfig::new(0, 100, 6, vec![0.5, 0.99]).is_err());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("truncate".parse::<OutOfRangePolicy>().unwrap(), OutOfRangePolicy::Truncate);
        assert_eq!("ignore".parse::<OutOfRangePolicy>().unwrap(), OutOfRangePolicy::Ignore);
        assert_eq!("panic".parse::<OutOfRangePolicy>().unwrap(), OutOfRangePolicy::Panic);
        assert!("clamp".parse::<OutOfRangePolicy>().unwrap_err().is_config());
    }

    #[test]
    fn test_flush_interval_is_floored() {
        let config = HistogramConfig::default().with_flush_interval(Duration::from_millis(5));
        assert_eq!(config.flush_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_truncate_clamps_out_of_range_values() {
        let histogram = HistogramValue::new(config(OutOfRangePolicy::Truncate)).unwrap();
        assert_eq!(histogram.apply(&Op::Set(1)), Some(10));
        assert_eq!(histogram.apply(&Op::Set(5_000)), Some(1_000));
        assert_eq!(histogram.len(), 2);

        match histogram.resolve() {
            Reading::Quantiles(q) => {
                assert_eq!(q[0].value, 10);
                assert_eq!(q[2].value, 1_000);
            },
            other => panic!("expected quantiles, got {:?}", other),
        }
    }

    #[test]
    fn test_ignore_drops_out_of_range_values() {
        let histogram = HistogramValue::new(config(OutOfRangePolicy::Ignore)).unwrap();
        assert_eq!(histogram.apply(&Op::Set(1)), None);
        assert_eq!(histogram.apply(&Op::Set(5_000)), None);
        assert_eq!(histogram.apply(&Op::Set(500)), Some(500));
        assert_eq!(histogram.len(), 1);
    }

    #[test]
    #[should_panic(expected = "outside of")]
    fn test_panic_policy_panics() {
        let histogram = HistogramValue::new(config(OutOfRangePolicy::Panic)).unwrap();
        histogram.apply(&Op::Set(5_000));
    }

    #[test]
    fn test_quantiles_within_precision() {
        let config = HistogramConfig::new(0, 1_000_000, 3, vec![0.5, 0.9, 0.99]).unwrap();
        let histogram = HistogramValue::new(config).unwrap();

        let mut values: Vec<i64> = (1..=10_000).map(|v| v * 37).collect();
        for v in &values {
            histogram.apply(&Op::Set(*v));
        }
        values.sort_unstable();

        let quantiles = match histogram.resolve() {
            Reading::Quantiles(q) => q,
            other => panic!("expected quantiles, got {:?}", other),
        };

        for q in quantiles {
            let rank = ((q.quantile * values.len() as f64).ceil() as usize).max(1) - 1;
            let exact = values[rank] as f64;
            let error = (q.value as f64 - exact).abs() / exact;
            assert!(error <= 2e-3, "p{} = {}, exact {}", q.percent(), q.value, exact);
        }
    }
}
