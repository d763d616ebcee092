use super::metric::Metric;
use crate::clock::now_millis;
use std::{fmt, sync::Arc};

/// A deferred computation producing a value when an event is applied.
pub type Collect = Arc<dyn Fn() -> i64 + Send + Sync>;

/// The mutation an event performs on the current value of its series.
#[derive(Clone)]
pub enum Op {
    Add(i64),
    Set(i64),
    Collect(Collect),
    CollectAdd(Collect),
}

impl Op {
    /// Computes the new value from the current one.
    pub fn apply(&self, current: i64) -> i64 {
        match self {
            Op::Add(amount) => current.wrapping_add(*amount),
            Op::Set(value) => *value,
            Op::Collect(f) => f(),
            Op::CollectAdd(f) => current.wrapping_add(f()),
        }
    }
}

impl Default for Op {
    fn default() -> Op { Op::Add(0) }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Op::Add(amount) => write!(f, "Add({})", amount),
            Op::Set(value) => write!(f, "Set({})", value),
            Op::Collect(_) => write!(f, "Collect(..)"),
            Op::CollectAdd(_) => write!(f, "CollectAdd(..)"),
        }
    }
}

/// A single mutation request against a metric.
///
/// Events are inert until pushed into a `Collector`.  An event without a metric, such as
/// `Event::default()`, is silently dropped wherever it is accepted.
#[derive(Clone, Debug, Default)]
pub struct Event {
    metric: Option<Metric>,
    op: Op,
    timestamp: i64,
    resolved_value: i64,
    resolved: bool,
}

impl Event {
    /// Creates an event against `metric`, captured now.
    pub fn new(metric: Metric, op: Op) -> Event {
        Event {
            metric: Some(metric),
            op,
            timestamp: now_millis(),
            resolved_value: 0,
            resolved: false,
        }
    }

    /// Overrides the capture timestamp, in milliseconds since the Unix epoch.
    pub fn at(mut self, timestamp: i64) -> Event {
        self.timestamp = timestamp;
        self
    }

    pub fn metric(&self) -> Option<&Metric> { self.metric.as_ref() }

    pub fn op(&self) -> &Op { &self.op }

    pub fn timestamp(&self) -> i64 { self.timestamp }

    /// Whether a collector has applied this event.
    pub fn is_resolved(&self) -> bool { self.resolved }

    /// The series value right after this event was applied, once resolved.
    pub fn value(&self) -> Option<i64> {
        if self.resolved {
            Some(self.resolved_value)
        } else {
            None
        }
    }

    pub(crate) fn resolve(&mut self, value: i64) {
        self.resolved_value = value;
        self.resolved = true;
    }
}

#[cfg(test)]
mod tests {
    use super::{Event, Op};
    use crate::data::metric::Metric;
    use std::sync::Arc;

    #[test]
    fn test_op_apply() {
        assert_eq!(Op::Add(3).apply(4), 7);
        assert_eq!(Op::Add(-10).apply(4), -6);
        assert_eq!(Op::Set(9).apply(4), 9);
        assert_eq!(Op::Collect(Arc::new(|| 42)).apply(4), 42);
        assert_eq!(Op::CollectAdd(Arc::new(|| 42)).apply(4), 46);
    }

    #[test]
    fn test_mutators_build_inert_events() {
        let metric = Metric::counter("x");
        let event = metric.add(5).at(1_000);

        assert_eq!(event.metric(), Some(&metric));
        assert_eq!(event.timestamp(), 1_000);
        assert!(!event.is_resolved());
        assert_eq!(event.value(), None);
        assert_eq!(metric.dec().op().apply(0), -1);
        assert_eq!(metric.set(12).op().apply(0), 12);
    }

    #[test]
    fn test_default_event_has_no_metric() {
        let event = Event::default();
        assert!(event.metric().is_none());
    }

    #[test]
    fn test_resolve_records_value() {
        let mut event = Metric::gauge("g").set(3);
        event.resolve(3);
        assert!(event.is_resolved());
        assert_eq!(event.value(), Some(3));
    }
}
