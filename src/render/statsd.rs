use crate::data::labels::LabelSet;
use std::io::{self, Write};

/// `<id>:<value>|g[|#<k>:<v>,...]`
///
/// StatsD carries no timestamp; the receiver stamps arrival time.
pub fn scalar(buf: &mut Vec<u8>, id: &str, labels: &LabelSet, value: i64, _timestamp: i64) -> io::Result<()> {
    write!(buf, "{}:{}|g", id, value)?;
    for (i, (k, v)) in labels.iter().enumerate() {
        let sep = if i == 0 { "|#" } else { "," };
        write!(buf, "{}{}:{}", sep, k, v)?;
    }
    buf.push(b'\n');
    Ok(())
}
