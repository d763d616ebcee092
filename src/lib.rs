//! Concurrent metrics aggregation and forwarding.
//!
//! Callers describe series with [`Metric`]s and turn them into [`Event`]s with mutators such
//! as [`Metric::inc`] or [`Metric::set`].  A [`Collector`] applies events to their tracked
//! series, renders every new value and hands it to one or more backends: any writer, the `log`
//! facade, size-rotated files, or TCP/UDP sockets.
//!
//! ```no_run
//! use series::{Collector, FileConfig, Metric, Renderer};
//!
//! let files = FileConfig::new("/var/log/metrics").renderer(Renderer::json()).build()?;
//! let mut collector = Collector::builder().capacity(1024).backend(files).build()?;
//!
//! let requests = Metric::counter("requests").label("method", "GET");
//! collector.push(requests.inc());
//! collector.close()?;
//! # Ok::<(), series::Error>(())
//! ```
mod backend;
mod clock;
mod collector;
mod configuration;
mod data;
mod distribution;
mod error;
pub mod extract;
mod helper;
mod registry;
mod render;
mod sampler;
mod scheduler;

pub use self::{
    backend::{
        Backend, Backoff, Cancel, Canceller, FileBackend, FileConfig, LineSink, LogSink, LogWriter, LoggerBackend, Network,
        Policy, SocketBackend, SocketConfig, Stream, WriterBackend,
    },
    clock::{Clock, ClockSource, Mock, System},
    collector::Collector,
    configuration::Configuration,
    data::{
        event::{Collect, Event, Op},
        histogram::{HistogramConfig, OutOfRangePolicy},
        labels::LabelSet,
        metric::{Metric, MetricType},
        record::Record,
        Quantile, Reading,
    },
    error::{Error, Result},
    extract::Message,
    render::{expand_quantiles, Emission, Format, HistogramFn, Renderer, ScalarFn},
    sampler::Sampler,
};
