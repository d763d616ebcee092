use std::{
    io::{Error, ErrorKind},
    time::Duration,
};

/// Shortest interval any background timer runs at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

pub fn io_error(reason: &str) -> Error { Error::new(ErrorKind::Other, reason) }

pub fn duration_as_millis(d: Duration) -> i64 { (d.as_secs() as i64 * 1_000) + i64::from(d.subsec_millis()) }

/// Floors `d` to at least `min`.
pub fn floor_duration(d: Duration, min: Duration) -> Duration {
    if d < min {
        min
    } else {
        d
    }
}

/// Capacity of a queue as configured: negative means unbounded.
pub fn queue_capacity(capacity: i64) -> Option<usize> {
    if capacity < 0 {
        None
    } else {
        Some(capacity as usize)
    }
}
