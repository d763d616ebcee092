use crate::error::Result;
use serde::ser::{Serialize, SerializeMap, Serializer};

pub mod counter;
pub mod delta;
pub mod event;
pub mod histogram;
pub mod labels;
pub mod metric;
pub mod record;

pub(crate) use self::{counter::IntValue, delta::Delta, histogram::HistogramValue};
use self::{event::Op, metric::Metric, metric::MetricType};

/// A single quantile extracted from a histogram.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quantile {
    /// The quantile, from 0.0 to 1.0.
    pub quantile: f64,
    /// The sample value at that quantile.
    pub value: i64,
}

impl Quantile {
    /// The quantile as a percentage label: `0.5` is `"50"`, `0.999` is `"99.9"`.
    pub fn percent(&self) -> String { percent_label(self.quantile) }
}

pub(crate) fn percent_label(quantile: f64) -> String {
    // Round away float noise such as 0.999 * 100 = 99.89999999999999.
    let percent = (quantile * 100.0 * 1_000.0).round() / 1_000.0;
    format!("{}", percent)
}

/// The value a series reports when it is resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum Reading {
    Scalar(i64),
    Quantiles(Vec<Quantile>),
}

impl Serialize for Reading {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Reading::Scalar(value) => serializer.serialize_i64(*value),
            Reading::Quantiles(quantiles) => {
                let mut map = serializer.serialize_map(Some(quantiles.len()))?;
                for q in quantiles {
                    map.serialize_entry(&q.percent(), &q.value)?;
                }
                map.end()
            },
        }
    }
}

/// Accumulation strategy for the live value of one series.
pub(crate) trait LocalValue: Send + Sync {
    /// Applies the operation, returning the value to report for it, or `None` if it was ignored.
    fn apply(&self, op: &Op) -> Option<i64>;

    /// Produces the value to emit; may reset state, as deltas do.
    fn resolve(&self) -> Reading;

    /// Reads the current value without side effects.
    fn peek(&self) -> Reading;
}

/// Creates the local value strategy for a metric's type.
pub(crate) fn local_value(metric: &Metric) -> Result<Box<dyn LocalValue>> {
    Ok(match metric.kind() {
        MetricType::Counter | MetricType::Gauge => Box::new(IntValue::new()),
        MetricType::Delta => Box::new(Delta::new()),
        MetricType::Histogram => {
            let config = metric.histogram_settings().cloned().unwrap_or_default();
            Box::new(HistogramValue::new(config)?)
        },
    })
}
