use crate::clock::ClockSource;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Default)]
pub struct System;

impl System {
    pub fn new() -> Self { System {} }
}

impl ClockSource for System {
    fn now(&self) -> i64 { now_millis() }
}

/// Wall-clock milliseconds since the Unix epoch, or zero for a clock set before it.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
