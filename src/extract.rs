//! Pulling metric events out of structured log messages.
//!
//! A [`Message`] is a loggable value that may carry [`Event`]s anywhere inside it: directly, as
//! values of ordered key/value pairs or maps, or behind a lazily evaluated producer.
//! [`forward`] pushes every embedded event into a collector and logs whatever is left.
use crate::{
    collector::Collector,
    data::{event::Event, record::Record},
};
use log::{log, Level};
use std::{collections::BTreeMap, fmt};

/// A structured log message.
pub enum Message {
    Text(String),
    Int(i64),
    Event(Event),
    Record(Record),
    /// Key/value pairs in the order given.
    Pairs(Vec<(String, Message)>),
    Map(BTreeMap<String, Message>),
    /// Evaluated on every split and every display; nothing is cached.
    Producer(Box<dyn Fn() -> Message + Send + Sync>),
}

impl Message {
    /// Creates a message from key/value pairs.
    pub fn pairs<I, K>(pairs: I) -> Message
    where
        I: IntoIterator<Item = (K, Message)>,
        K: Into<String>,
    {
        Message::Pairs(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn producer<F>(f: F) -> Message
    where
        F: Fn() -> Message + Send + Sync + 'static,
    {
        Message::Producer(Box::new(f))
    }

    /// Separates embedded events from the rest of the message.
    ///
    /// Containers keep their other entries in order.  A container whose every entry was an
    /// event disappears from the residual, as does a bare event.
    pub fn split(self) -> (Option<Message>, Vec<Event>) {
        let mut events = Vec::new();
        let residual = self.split_into(&mut events);
        (residual, events)
    }

    fn split_into(self, events: &mut Vec<Event>) -> Option<Message> {
        match self {
            Message::Event(event) => {
                events.push(event);
                None
            },
            Message::Producer(f) => f().split_into(events),
            Message::Pairs(pairs) => {
                if pairs.is_empty() {
                    return Some(Message::Pairs(pairs));
                }
                let kept: Vec<_> = pairs
                    .into_iter()
                    .filter_map(|(k, v)| v.split_into(events).map(|v| (k, v)))
                    .collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(Message::Pairs(kept))
                }
            },
            Message::Map(map) => {
                if map.is_empty() {
                    return Some(Message::Map(map));
                }
                let kept: BTreeMap<_, _> = map
                    .into_iter()
                    .filter_map(|(k, v)| v.split_into(events).map(|v| (k, v)))
                    .collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(Message::Map(kept))
                }
            },
            other => Some(other),
        }
    }
}

fn write_entries<'a, I>(f: &mut fmt::Formatter, entries: I) -> fmt::Result
where
    I: Iterator<Item = (&'a String, &'a Message)>,
{
    for (i, (k, v)) in entries.enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{}={}", k, v)?;
    }
    Ok(())
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::Text(text) => f.write_str(text),
            Message::Int(value) => write!(f, "{}", value),
            Message::Event(event) => match event.metric() {
                Some(metric) => write!(f, "{} {:?}", metric, event.op()),
                None => f.write_str("<event>"),
            },
            Message::Record(record) => match serde_json::to_string(record) {
                Ok(json) => f.write_str(&json),
                Err(_) => Err(fmt::Error),
            },
            Message::Pairs(pairs) => write_entries(f, pairs.iter().map(|(k, v)| (k, v))),
            Message::Map(map) => write_entries(f, map.iter()),
            Message::Producer(producer) => write!(f, "{}", producer()),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "Message({})", self) }
}

impl From<&str> for Message {
    fn from(text: &str) -> Message { Message::Text(text.to_owned()) }
}

impl From<String> for Message {
    fn from(text: String) -> Message { Message::Text(text) }
}

impl From<i64> for Message {
    fn from(value: i64) -> Message { Message::Int(value) }
}

impl From<Event> for Message {
    fn from(event: Event) -> Message { Message::Event(event) }
}

impl From<Record> for Message {
    fn from(record: Record) -> Message { Message::Record(record) }
}

/// Pushes the events embedded in `message` into `collector` and logs the rest at `level`.
///
/// Nothing is logged when the message consisted only of events.
pub fn forward(collector: &Collector, level: Level, message: Message) {
    let (residual, events) = message.split();
    collector.publish(events);
    if let Some(residual) = residual {
        log!(target: "series", level, "{}", residual);
    }
}

#[cfg(test)]
mod tests {
    use super::{forward, Message};
    use crate::{
        backend::{testing::SharedBuffer, WriterBackend},
        collector::Collector,
        data::{labels::LabelSet, metric::Metric, record::Record, Reading},
        render::Renderer,
    };
    use log::Level;
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    #[test]
    fn test_split_nested_message() {
        let requests = Metric::counter("requests");
        let mut map = BTreeMap::new();
        map.insert("latency".to_owned(), Message::Event(Metric::histogram("latency").set(12)));
        map.insert("status".to_owned(), Message::Int(200));

        let message = Message::pairs(vec![
            ("msg", Message::from("handled request")),
            ("count", Message::from(requests.inc())),
            ("detail", Message::Map(map)),
            ("lazy", Message::producer(|| Message::from(Metric::gauge("depth").set(3)))),
        ]);

        let (residual, events) = message.split();
        let ids: Vec<&str> = events.iter().map(|e| e.metric().unwrap().id()).collect();
        assert_eq!(ids, vec!["requests", "latency", "depth"]);
        assert_eq!(residual.unwrap().to_string(), "msg=handled request detail=status=200");
    }

    #[test]
    fn test_split_bare_event_leaves_nothing() {
        let (residual, events) = Message::from(Metric::gauge("g").set(1)).split();
        assert!(residual.is_none());
        assert_eq!(events.len(), 1);

        let (residual, events) = Message::pairs(vec![("only", Message::from(Metric::gauge("g").set(1)))]).split();
        assert!(residual.is_none());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_producer_runs_on_every_display() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let message = Message::producer(move || Message::Int(counted.fetch_add(1, Ordering::SeqCst) as i64));

        assert_eq!(message.to_string(), "0");
        assert_eq!(message.to_string(), "1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_plain_message_is_untouched() {
        let record = Record {
            id: "reqs".to_owned(),
            value: Reading::Scalar(4),
            labels: LabelSet::new(),
            last_modified: 1_500,
        };
        let (residual, events) = Message::pairs(vec![("snapshot", Message::from(record))]).split();
        assert!(events.is_empty());
        assert_eq!(residual.unwrap().to_string(), r#"snapshot={"id":"reqs","value":4}"#);
    }

    #[test]
    fn test_forward_pushes_events() {
        let _ = env_logger::builder().is_test(true).try_init();
        let buffer = SharedBuffer::default();
        let mut collector = Collector::builder()
            .capacity(8)
            .backend(WriterBackend::new("buffer", buffer.clone(), Renderer::statsd()))
            .build()
            .unwrap();

        let message = Message::pairs(vec![
            ("msg", Message::from("cache miss")),
            ("misses", Message::from(Metric::counter("misses").add(2))),
        ]);
        forward(&collector, Level::Info, message);
        collector.close().unwrap();

        assert_eq!(buffer.lines(), vec!["misses:2|g"]);
    }
}
