use super::{labels::LabelSet, Reading};
use serde::Serialize;

/// A point-in-time export of one series, suitable for embedding in a log message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub id: String,
    pub value: Reading,
    #[serde(skip_serializing_if = "LabelSet::is_empty")]
    pub labels: LabelSet,
    /// Latest event timestamp applied to the series, in milliseconds.  Not serialized.
    #[serde(skip)]
    pub last_modified: i64,
}
