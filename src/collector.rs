use crate::{
    backend::{Cancel, Canceller},
    clock::Clock,
    configuration::Configuration,
    data::{
        event::Event,
        metric::MetricType,
        record::Record,
        Reading,
    },
    distribution::{BackendHandle, Distributor},
    error::{Error, Result},
    helper::{floor_duration, MIN_INTERVAL},
    registry::{Registry, TrackedSeries},
    render::Emission,
    scheduler::{Emitter, Scheduler, Subscriber},
};
use log::{debug, warn};
use std::{
    fmt::{self, Display},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// State shared between the collector, its callers and its timer threads.
struct Core {
    registry: Registry,
    distributor: Distributor,
    scheduler: Scheduler,
    clock: Clock,
    closed: AtomicBool,
}

impl Core {
    fn ingest(self: &Arc<Core>, event: &mut Event) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let metric = match event.metric() {
            Some(metric) => metric.clone(),
            None => return,
        };

        let (series, created) = match self.registry.get_or_create(&metric) {
            Ok(found) => found,
            Err(e) => {
                warn!("dropping event for {}: {}", metric, e);
                return;
            },
        };

        let value = match series.apply(event) {
            Some(value) => value,
            None => return,
        };
        event.resolve(value);

        // Counters and gauges report the value this event produced; deltas and histograms
        // report their window.
        let reading = match metric.kind() {
            MetricType::Counter | MetricType::Gauge => Reading::Scalar(value),
            MetricType::Delta | MetricType::Histogram => series.resolve(),
        };
        self.distributor
            .publish(Emission::new(series.metric().clone(), reading, event.timestamp()));

        if created {
            if let Some(interval) = metric.schedule_interval() {
                let target: Arc<dyn Emitter> = self.clone();
                if let Err(e) = self.scheduler.subscribe(&target, interval, Subscriber::Series(series)) {
                    debug!("not scheduling {}: {}", metric, e);
                }
            }
        }
    }
}

impl Emitter for Core {
    fn emit(&self, series: &TrackedSeries) {
        let emission = Emission::new(series.metric().clone(), series.resolve(), self.clock.now());
        self.distributor.publish(emission);
    }

    fn publish(self: Arc<Self>, events: Vec<Event>) {
        for mut event in events {
            self.ingest(&mut event);
        }
    }
}

/// Aggregates events into tracked series and forwards their values to backends.
///
/// Every pushed event is applied to its series and the resulting value is distributed
/// immediately.  Periodic metrics and histograms are additionally re-emitted from a background
/// timer, one per distinct interval.
///
/// A collector is shared by reference between threads; every ingestion method takes `&self`.
/// Closing drains every backend and reports what went wrong along the way.
pub struct Collector {
    core: Arc<Core>,
    canceller: Option<Canceller>,
    backends: Vec<BackendHandle>,
}

impl Collector {
    pub(crate) fn from_config(conf: Configuration) -> Result<Collector> {
        let capacity = conf.validated_capacity()?;
        let (canceller, cancel) = Cancel::new();
        let (distributor, backends) = Distributor::start(capacity, conf.backends, &cancel)?;

        let core = Core {
            registry: Registry::new(),
            distributor,
            scheduler: Scheduler::new(cancel),
            clock: conf.clock,
            closed: AtomicBool::new(false),
        };

        Ok(Collector {
            core: Arc::new(core),
            canceller: Some(canceller),
            backends,
        })
    }

    /// Gets a builder to configure a `Collector` with.
    pub fn builder() -> Configuration { Configuration::new() }

    /// Applies an event and distributes the resulting value.
    ///
    /// Events without a metric, and any event pushed after [`close`](Collector::close), are
    /// dropped.
    pub fn push(&self, mut event: Event) { self.core.ingest(&mut event); }

    /// Like [`push`](Collector::push), but leaves the resolved value visible on `event`.
    pub fn push_event(&self, event: &mut Event) { self.core.ingest(event); }

    /// Pushes every event in order.
    pub fn publish<I>(&self, events: I)
    where
        I: IntoIterator<Item = Event>,
    {
        for mut event in events {
            self.core.ingest(&mut event);
        }
    }

    /// Calls `producer` every `interval` and pushes the events it returns.
    ///
    /// A producer error skips that tick; nothing else happens.  Intervals shorter than 100ms are
    /// raised to 100ms.
    pub fn register<F, E>(&self, mut producer: F, interval: Duration) -> Result<()>
    where
        F: FnMut() -> std::result::Result<Vec<Event>, E> + Send + 'static,
        E: Display,
    {
        if self.core.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let producer = Box::new(move || producer().map_err(|e| e.to_string()));
        let target: Arc<dyn Emitter> = self.core.clone();
        self.core.scheduler.subscribe(
            &target,
            floor_duration(interval, MIN_INTERVAL),
            Subscriber::Producer(producer),
        )
    }

    /// Emits the current value of every tracked series now.
    ///
    /// Delta series are resolved, so this starts a new delta window.
    pub fn flush(&self) -> Result<()> {
        if self.core.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        for series in self.core.registry.all() {
            self.core.emit(&series);
        }
        Ok(())
    }

    /// The current value of every tracked series, without resetting anything.
    pub fn records(&self) -> Vec<Record> {
        self.core
            .registry
            .all()
            .iter()
            .map(|series| series.record())
            .collect()
    }

    /// Number of tracked series.
    pub fn series_count(&self) -> usize { self.core.registry.len() }

    /// Number of background timer threads.
    pub fn timer_count(&self) -> usize { self.core.scheduler.len() }

    /// Stops the timers, drains every backend and waits for them to exit.
    ///
    /// Errors from all backends are gathered: one error is returned as-is, several as
    /// [`Error::Aggregate`].  Closing again does nothing.
    pub fn close(&mut self) -> Result<()> {
        self.core.closed.store(true, Ordering::Release);
        if let Some(canceller) = self.canceller.take() {
            canceller.cancel();
        }

        self.core.scheduler.shutdown();
        self.core.distributor.close();

        let mut errors = Vec::new();
        for backend in self.backends.drain(..) {
            match backend.handle.join() {
                Ok(Ok(())) => debug!("backend {} finished", backend.name),
                Ok(Err(e)) => errors.push(e),
                Err(_) => errors.push(Error::BackendPanicked(backend.name)),
            }
        }

        Error::join(errors)
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let backends: Vec<&str> = self.backends.iter().map(|b| b.name.as_str()).collect();
        f.debug_struct("Collector")
            .field("series", &self.series_count())
            .field("timers", &self.timer_count())
            .field("backends", &backends)
            .finish()
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("errors while closing dropped collector: {}", e);
        }
    }
}
