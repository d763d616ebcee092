use std::sync::Arc;

mod mock;
pub use self::mock::Mock;
mod system;
pub use self::system::System;
pub(crate) use self::system::now_millis;

/// A source of wall-clock time, in milliseconds since the Unix epoch.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> i64;
}

impl<T: ClockSource> ClockSource for Arc<T> {
    fn now(&self) -> i64 { (**self).now() }
}

/// Cloneable handle to the clock used for periodic emissions.
#[derive(Clone)]
pub struct Clock {
    source: Arc<dyn ClockSource>,
}

impl Clock {
    /// Creates a clock backed by the system wall clock.
    pub fn new() -> Clock { Clock::from_source(System::new()) }

    /// Creates a clock backed by the given source.
    pub fn from_source<S: ClockSource + 'static>(source: S) -> Clock { Clock { source: Arc::new(source) } }

    /// Creates a clock backed by a controllable mock, returning both.
    ///
    /// The mock starts at `offset` milliseconds and only moves when incremented.
    pub fn mock(offset: i64) -> (Clock, Arc<Mock>) {
        let mock = Arc::new(Mock::new(offset));
        (Clock::from_source(mock.clone()), mock)
    }

    /// Current time in milliseconds since the Unix epoch.
    pub fn now(&self) -> i64 { self.source.now() }
}

impl Default for Clock {
    fn default() -> Clock { Clock::new() }
}
