use crate::data::labels::LabelSet;
use std::io::{self, Write};

/// `put <id> <unix-ms> <value> [<k>=<v> ...]`
pub fn scalar(buf: &mut Vec<u8>, id: &str, labels: &LabelSet, value: i64, timestamp: i64) -> io::Result<()> {
    write!(buf, "put {} {} {}", id, timestamp, value)?;
    for (k, v) in labels.iter() {
        write!(buf, " {}={}", k, v)?;
    }
    buf.push(b'\n');
    Ok(())
}
