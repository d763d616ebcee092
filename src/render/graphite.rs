use crate::data::labels::LabelSet;
use std::io::{self, Write};

/// `<id>[;<k>=<v>]* <value> <unix-seconds>`
pub fn scalar(buf: &mut Vec<u8>, id: &str, labels: &LabelSet, value: i64, timestamp: i64) -> io::Result<()> {
    buf.write_all(id.as_bytes())?;
    for (k, v) in labels.iter() {
        write!(buf, ";{}={}", k, v)?;
    }
    writeln!(buf, " {} {}", value, timestamp / 1_000)
}

#[cfg(test)]
mod tests {
    use super::scalar;
    use crate::data::labels::LabelSet;

    fn parse(line: &str) -> (String, LabelSet, i64, i64) {
        let mut fields = line.split(' ');
        let mut path = fields.next().unwrap().split(';');
        let id = path.next().unwrap().to_owned();
        let labels = path
            .map(|tag| {
                let (k, v) = tag.split_once('=').unwrap();
                (k.to_owned(), v.to_owned())
            })
            .collect();
        let value = fields.next().unwrap().parse().unwrap();
        let ts = fields.next().unwrap().parse().unwrap();
        (id, labels, value, ts)
    }

    #[test]
    fn test_scalar_round_trip() {
        let labels: LabelSet = vec![("host", "web1"), ("dc", "east")].into_iter().collect();
        let mut buf = Vec::new();
        scalar(&mut buf, "cpu.load", &labels, 42, 1_700_000_000_999).unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "cpu.load;dc=east;host=web1 42 1700000000\n");
        assert_eq!(parse(text.trim_end()), ("cpu.load".to_owned(), labels, 42, 1_700_000_000));
    }
}
