use super::{
    event::{Event, Op},
    histogram::HistogramConfig,
    labels::LabelSet,
};
use crate::helper::{floor_duration, MIN_INTERVAL};
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
    time::Duration,
};

/// The kind of series a metric describes, which selects how its values accumulate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// Monotonic running total; reports the latest value.
    Counter,
    /// Point-in-time value; reports the latest value.
    Gauge,
    /// Accumulates between resolves and reports only the change since the last one.
    Delta,
    /// Records a distribution and reports configured quantiles.
    Histogram,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MetricType::Counter => write!(f, "counter"),
            MetricType::Gauge => write!(f, "gauge"),
            MetricType::Delta => write!(f, "delta"),
            MetricType::Histogram => write!(f, "histogram"),
        }
    }
}

#[derive(Clone, Debug)]
struct MetricDef {
    id: String,
    kind: MetricType,
    labels: LabelSet,
    periodic: Option<Duration>,
    histogram: Option<HistogramConfig>,
    label_string: OnceLock<String>,
}

/// A named, typed series descriptor.
///
/// Metrics are cheap to clone and are built with chained calls:
///
/// ```
/// use series::Metric;
/// use std::time::Duration;
///
/// let requests = Metric::counter("requests")
///     .label("method", "GET")
///     .periodic(Duration::from_secs(10));
/// let event = requests.inc();
/// ```
///
/// Two metrics are the same series when their type, id and label set match; the order in which
/// labels were added does not matter.
#[derive(Clone)]
pub struct Metric {
    inner: Arc<MetricDef>,
}

impl Metric {
    fn new(id: &str, kind: MetricType, histogram: Option<HistogramConfig>) -> Metric {
        Metric {
            inner: Arc::new(MetricDef {
                id: id.to_owned(),
                kind,
                labels: LabelSet::new(),
                periodic: None,
                histogram,
                label_string: OnceLock::new(),
            }),
        }
    }

    pub fn counter(id: &str) -> Metric { Metric::new(id, MetricType::Counter, None) }

    pub fn gauge(id: &str) -> Metric { Metric::new(id, MetricType::Gauge, None) }

    pub fn delta(id: &str) -> Metric { Metric::new(id, MetricType::Delta, None) }

    /// Creates a histogram metric with the default configuration.
    pub fn histogram(id: &str) -> Metric { Metric::histogram_with(id, HistogramConfig::default()) }

    /// Creates a histogram metric with an explicit, already-validated configuration.
    pub fn histogram_with(id: &str, config: HistogramConfig) -> Metric {
        Metric::new(id, MetricType::Histogram, Some(config))
    }

    // Clones the definition only if this metric has already been shared, and drops the memoized
    // label string since the label set may be about to change.
    fn def_mut(&mut self) -> &mut MetricDef {
        let def = Arc::make_mut(&mut self.inner);
        def.label_string = OnceLock::new();
        def
    }

    /// Adds a label.
    pub fn label(mut self, key: &str, value: &str) -> Metric {
        self.def_mut().labels.insert(key, value);
        self
    }

    /// Adds every label in `pairs`.
    pub fn annotate<I, K, V>(mut self, pairs: I) -> Metric
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.def_mut().labels.extend(pairs);
        self
    }

    /// Replaces the histogram configuration.  Ignored by every other metric type.
    pub fn histogram_config(mut self, config: HistogramConfig) -> Metric {
        self.def_mut().histogram = Some(config);
        self
    }

    /// Re-emits this series every `interval`, independent of new events.
    ///
    /// Intervals shorter than 100ms are raised to 100ms.
    pub fn periodic(mut self, interval: Duration) -> Metric {
        self.def_mut().periodic = Some(floor_duration(interval, MIN_INTERVAL));
        self
    }

    pub fn id(&self) -> &str { &self.inner.id }

    pub fn kind(&self) -> MetricType { self.inner.kind }

    pub fn labels(&self) -> &LabelSet { &self.inner.labels }

    pub fn periodic_interval(&self) -> Option<Duration> { self.inner.periodic }

    /// The histogram configuration, for histogram metrics.
    pub fn histogram_settings(&self) -> Option<&HistogramConfig> { self.inner.histogram.as_ref() }

    /// Canonical `k=v,k=v` form of the label set, computed once.
    pub fn label_string(&self) -> &str { self.inner.label_string.get_or_init(|| self.inner.labels.to_string()) }

    /// The interval this series should be re-emitted on, if any.
    ///
    /// Histograms always have one: their explicit periodic interval or else the flush interval
    /// of their configuration.
    pub(crate) fn schedule_interval(&self) -> Option<Duration> {
        match (self.inner.periodic, &self.inner.histogram) {
            (Some(interval), _) => Some(interval),
            (None, Some(config)) if self.inner.kind == MetricType::Histogram => Some(config.flush_interval()),
            _ => None,
        }
    }

    pub fn event(&self, op: Op) -> Event { Event::new(self.clone(), op) }

    pub fn inc(&self) -> Event { self.add(1) }

    pub fn dec(&self) -> Event { self.add(-1) }

    pub fn add(&self, amount: i64) -> Event { self.event(Op::Add(amount)) }

    pub fn set(&self, value: i64) -> Event { self.event(Op::Set(value)) }

    /// Sets the value to whatever `f` returns when the event is applied.
    pub fn collect<F>(&self, f: F) -> Event
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.event(Op::Collect(Arc::new(f)))
    }

    /// Adds whatever `f` returns when the event is applied.
    pub fn collect_add<F>(&self, f: F) -> Event
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.event(Op::CollectAdd(Arc::new(f)))
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Metric) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.kind == other.inner.kind
                && self.inner.id == other.inner.id
                && self.inner.labels == other.inner.labels)
    }
}

impl Eq for Metric {}

impl Hash for Metric {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.kind.hash(state);
        self.inner.id.hash(state);
        self.inner.labels.hash(state);
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.inner.labels.is_empty() {
            write!(f, "{}", self.inner.id)
        } else {
            write!(f, "{}{{{}}}", self.inner.id, self.label_string())
        }
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Metric")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("labels", &self.inner.labels)
            .field("periodic", &self.inner.periodic)
            .finish()
    }
}
