//! Wire formats for emitted series values.
//!
//! A [`Renderer`] is a pair of plain functions: one serializing a single scalar value, and one
//! serializing a set of histogram quantiles.  Most formats have no native histogram form and
//! use [`expand_quantiles`], which calls the scalar function once per quantile under a
//! synthesized `<id>.p<percent>` key.
use crate::data::{labels::LabelSet, metric::Metric, Quantile, Reading};
use crate::error::{Error, Result};
use std::{fmt, io, str::FromStr};

mod graphite;
mod json;
mod opentsdb;
mod statsd;

/// Writes one scalar emission: `(buffer, key, labels, value, unix millis)`.
pub type ScalarFn = fn(&mut Vec<u8>, &str, &LabelSet, i64, i64) -> io::Result<()>;

/// Writes one histogram emission, given the scalar function of the same renderer.
pub type HistogramFn = fn(&mut Vec<u8>, &str, &LabelSet, &[Quantile], i64, ScalarFn) -> io::Result<()>;

/// Serialization functions for one wire format.
#[derive(Clone, Copy)]
pub struct Renderer {
    pub scalar: ScalarFn,
    pub histogram: HistogramFn,
}

impl Renderer {
    pub fn json() -> Renderer {
        Renderer {
            scalar: json::scalar,
            histogram: json::histogram,
        }
    }

    pub fn graphite() -> Renderer {
        Renderer {
            scalar: graphite::scalar,
            histogram: expand_quantiles,
        }
    }

    pub fn opentsdb() -> Renderer {
        Renderer {
            scalar: opentsdb::scalar,
            histogram: expand_quantiles,
        }
    }

    pub fn statsd() -> Renderer {
        Renderer {
            scalar: statsd::scalar,
            histogram: expand_quantiles,
        }
    }

    pub fn for_format(format: Format) -> Renderer {
        match format {
            Format::Json => Renderer::json(),
            Format::Graphite => Renderer::graphite(),
            Format::OpenTsdb => Renderer::opentsdb(),
            Format::Statsd => Renderer::statsd(),
        }
    }
}

impl Default for Renderer {
    fn default() -> Renderer { Renderer::json() }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { f.write_str("Renderer") }
}

/// Names of the built-in renderers, for configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Graphite,
    OpenTsdb,
    Statsd,
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Format::Json),
            "graphite" => Ok(Format::Graphite),
            "opentsdb" | "telnet" => Ok(Format::OpenTsdb),
            "statsd" => Ok(Format::Statsd),
            other => Err(Error::config(format!("unknown render format '{}'", other))),
        }
    }
}

/// Renders each quantile as its own scalar line keyed `<id>.p<percent>`.
pub fn expand_quantiles(
    buf: &mut Vec<u8>, id: &str, labels: &LabelSet, quantiles: &[Quantile], timestamp: i64, scalar: ScalarFn,
) -> io::Result<()> {
    for q in quantiles {
        let key = format!("{}.p{}", id, q.percent());
        scalar(buf, &key, labels, q.value, timestamp)?;
    }
    Ok(())
}

/// One resolved value of one series, waiting to be rendered by each backend.
#[derive(Clone, Debug)]
pub struct Emission {
    metric: Metric,
    reading: Reading,
    timestamp: i64,
}

impl Emission {
    pub fn new(metric: Metric, reading: Reading, timestamp: i64) -> Emission {
        Emission {
            metric,
            reading,
            timestamp,
        }
    }

    pub fn metric(&self) -> &Metric { &self.metric }

    pub fn reading(&self) -> &Reading { &self.reading }

    pub fn timestamp(&self) -> i64 { self.timestamp }

    /// Appends the rendered form of this emission to `buf`.
    pub fn render(&self, renderer: &Renderer, buf: &mut Vec<u8>) -> io::Result<()> {
        let id = self.metric.id();
        let labels = self.metric.labels();
        match &self.reading {
            Reading::Scalar(value) => (renderer.scalar)(buf, id, labels, *value, self.timestamp),
            Reading::Quantiles(quantiles) => {
                (renderer.histogram)(buf, id, labels, quantiles, self.timestamp, renderer.scalar)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Emission, Format, Renderer};
    use crate::data::{metric::Metric, Quantile, Reading};

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("telnet".parse::<Format>().unwrap(), Format::OpenTsdb);
        assert!("influx".parse::<Format>().is_err());
    }

    #[test]
    fn test_histogram_expansion_uses_scalar_per_quantile() {
        let emission = Emission::new(
            Metric::histogram("latency").label("svc", "api"),
            Reading::Quantiles(vec![
                Quantile { quantile: 0.5, value: 12 },
                Quantile { quantile: 0.999, value: 90 },
            ]),
            5_000,
        );

        let mut buf = Vec::new();
        emission.render(&Renderer::graphite(), &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "latency.p50;svc=api 12 5\nlatency.p99.9;svc=api 90 5\n"
        );
    }
}
