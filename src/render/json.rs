use crate::data::{labels::LabelSet, Quantile};
use serde::{
    ser::{SerializeMap, Serializer},
    Serialize,
};
use std::io;

#[derive(Serialize)]
struct Line<'a, V: Serialize> {
    metric: &'a str,
    ts: i64,
    #[serde(skip_serializing_if = "no_tags")]
    tags: &'a LabelSet,
    value: V,
}

fn no_tags(labels: &&LabelSet) -> bool { labels.is_empty() }

struct Quantiles<'a>(&'a [Quantile]);

impl<'a> Serialize for Quantiles<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for q in self.0 {
            map.serialize_entry(&q.percent(), &q.value)?;
        }
        map.end()
    }
}

fn write_line<V: Serialize>(buf: &mut Vec<u8>, line: &Line<V>) -> io::Result<()> {
    serde_json::to_writer(&mut *buf, line)?;
    buf.push(b'\n');
    Ok(())
}

pub fn scalar(buf: &mut Vec<u8>, id: &str, labels: &LabelSet, value: i64, timestamp: i64) -> io::Result<()> {
    write_line(
        buf,
        &Line {
            metric: id,
            ts: timestamp,
            tags: labels,
            value,
        },
    )
}

pub fn histogram(
    buf: &mut Vec<u8>, id: &str, labels: &LabelSet, quantiles: &[Quantile], timestamp: i64,
    _scalar: super::ScalarFn,
) -> io::Result<()> {
    write_line(
        buf,
        &Line {
            metric: id,
            ts: timestamp,
            tags: labels,
            value: Quantiles(quantiles),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::{histogram, scalar};
    use crate::data::{labels::LabelSet, Quantile};
    use serde_json::Value;

    fn parse(line: &str) -> (String, i64, LabelSet, Value) {
        let v: Value = serde_json::from_str(line).unwrap();
        let labels = v
            .get("tags")
            .and_then(|t| t.as_object())
            .map(|t| {
                t.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().unwrap().to_owned()))
                    .collect()
            })
            .unwrap_or_default();
        (
            v["metric"].as_str().unwrap().to_owned(),
            v["ts"].as_i64().unwrap(),
            labels,
            v["value"].clone(),
        )
    }

    #[test]
    fn test_scalar_layout() {
        let labels: LabelSet = vec![("method", "GET")].into_iter().collect();
        let mut buf = Vec::new();
        scalar(&mut buf, "reqs", &labels, 3, 1_500).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "{\"metric\":\"reqs\",\"ts\":1500,\"tags\":{\"method\":\"GET\"},\"value\":3}\n"
        );

        let mut buf = Vec::new();
        scalar(&mut buf, "reqs", &LabelSet::new(), 3, 1_500).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "{\"metric\":\"reqs\",\"ts\":1500,\"value\":3}\n");
    }

    #[test]
    fn test_scalar_round_trip() {
        let labels: LabelSet = vec![("b", "2"), ("a", "1")].into_iter().collect();
        let mut buf = Vec::new();
        scalar(&mut buf, "disk.used", &labels, -17, 1_700_000_000_123).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let (id, ts, parsed, value) = parse(text.trim_end());
        assert_eq!(id, "disk.used");
        assert_eq!(ts, 1_700_000_000_123);
        assert_eq!(parsed, labels);
        assert_eq!(value.as_i64(), Some(-17));
    }

    #[test]
    fn test_histogram_nests_quantiles() {
        let quantiles = vec![Quantile { quantile: 0.5, value: 4 }, Quantile { quantile: 0.99, value: 9 }];
        let mut buf = Vec::new();
        histogram(&mut buf, "lat", &LabelSet::new(), &quantiles, 10, scalar).unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "{\"metric\":\"lat\",\"ts\":10,\"value\":{\"50\":4,\"99\":9}}\n");
        let (_, _, _, value) = parse(text.trim_end());
        assert_eq!(value["99"].as_i64(), Some(9));
    }
}
