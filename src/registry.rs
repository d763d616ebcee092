use crate::{
    data::{event::Event, local_value, metric::Metric, record::Record, LocalValue, Reading},
    error::Result,
};
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc, Mutex, PoisonError, RwLock,
};

/// The live accumulator for one (metric, label set) pair.
pub(crate) struct TrackedSeries {
    metric: Metric,
    value: Box<dyn LocalValue>,
    last_modified: AtomicI64,
}

impl TrackedSeries {
    fn new(metric: Metric) -> Result<TrackedSeries> {
        let value = local_value(&metric)?;
        Ok(TrackedSeries {
            metric,
            value,
            last_modified: AtomicI64::new(0),
        })
    }

    pub fn metric(&self) -> &Metric { &self.metric }

    pub fn last_modified(&self) -> i64 { self.last_modified.load(Ordering::Acquire) }

    /// Applies the event's operation, returning the value it produced.
    pub fn apply(&self, event: &Event) -> Option<i64> {
        let value = self.value.apply(event.op())?;
        self.last_modified.fetch_max(event.timestamp(), Ordering::AcqRel);
        Some(value)
    }

    pub fn resolve(&self) -> Reading { self.value.resolve() }

    pub fn record(&self) -> Record {
        Record {
            id: self.metric.id().to_owned(),
            value: self.value.peek(),
            labels: self.metric.labels().clone(),
            last_modified: self.last_modified(),
        }
    }
}

type SeriesList = Arc<Mutex<Vec<Arc<TrackedSeries>>>>;

/// Tracked series indexed by metric id.
///
/// The id map is only write-locked to add a new id.  Everything else, including the
/// check-then-insert for a new label set, happens under the lock of that id's own list, so
/// unrelated metrics never contend.
pub(crate) struct Registry {
    shards: RwLock<HashMap<String, SeriesList, FnvBuildHasher>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            shards: RwLock::new(HashMap::with_hasher(FnvBuildHasher::default())),
        }
    }

    fn list(&self, id: &str) -> SeriesList {
        if let Some(list) = self.shards.read().unwrap_or_else(PoisonError::into_inner).get(id) {
            return list.clone();
        }

        self.shards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Finds the series for `metric`, creating it if this is the first sighting.
    ///
    /// The boolean is `true` for exactly one caller per series: the one that created it.
    pub fn get_or_create(&self, metric: &Metric) -> Result<(Arc<TrackedSeries>, bool)> {
        let list = self.list(metric.id());
        let mut list = list.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(series) = list.iter().find(|s| s.metric() == metric) {
            return Ok((series.clone(), false));
        }

        let series = Arc::new(TrackedSeries::new(metric.clone())?);
        list.push(series.clone());
        Ok((series, true))
    }

    /// Every tracked series, in no particular order.
    pub fn all(&self) -> Vec<Arc<TrackedSeries>> {
        let lists: Vec<SeriesList> = self
            .shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        lists
            .iter()
            .flat_map(|list| list.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
        shards
            .values()
            .map(|list| list.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }
}
