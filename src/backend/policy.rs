use crate::error::{Error, Result};
use std::{fmt, str::FromStr, time::Duration};

/// What a socket backend does when dialing or sending fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Stop the backend permanently and report the error.
    Abort,
    /// Log the failure and carry on; failed messages are dropped.
    Continue,
    /// Carry on like `Continue`, but keep the error for the collector to report on close.
    Collect,
    /// Panic the worker thread.
    Panic,
}

impl FromStr for Policy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abort" => Ok(Policy::Abort),
            "continue" | "drop" => Ok(Policy::Continue),
            "collect" => Ok(Policy::Collect),
            "panic" => Ok(Policy::Panic),
            other => Err(Error::config(format!("unknown failure policy '{}'", other))),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Policy::Abort => write!(f, "abort"),
            Policy::Continue => write!(f, "continue"),
            Policy::Collect => write!(f, "collect"),
            Policy::Panic => write!(f, "panic"),
        }
    }
}

/// Bounded exponential backoff: `min`, doubling on each step, capped at `max`.
#[derive(Clone, Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Backoff { Backoff { min, max, current: None } }

    /// The delay to wait before the next attempt.
    pub fn next(&mut self) -> Duration {
        let delay = match self.current {
            None => self.min,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }

    pub fn reset(&mut self) { self.current = None; }
}
