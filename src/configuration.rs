use crate::{
    backend::Backend,
    clock::Clock,
    collector::Collector,
    error::{Error, Result},
    helper::queue_capacity,
};

/// A configuration builder for `Collector`.
pub struct Configuration {
    capacity: Option<i64>,
    pub(crate) backends: Vec<Box<dyn Backend>>,
    pub(crate) clock: Clock,
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            capacity: None,
            backends: Vec::new(),
            clock: Clock::new(),
        }
    }
}

impl Configuration {
    /// Creates a new `Configuration` with default values.
    pub fn new() -> Configuration { Default::default() }

    /// Sets the publish queue capacity.  Required.
    ///
    /// This controls how many emissions can be queued for each backend before publishers block.
    /// A negative capacity makes the queues unbounded, trading memory for never blocking.  Zero
    /// is rejected.
    pub fn capacity(mut self, capacity: i64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Adds a backend.  At least one is required.
    pub fn backend<B: Backend>(mut self, backend: B) -> Self {
        self.backends.push(Box::new(backend));
        self
    }

    /// Adds an already boxed backend.
    pub fn boxed_backend(mut self, backend: Box<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Sets the clock used to stamp periodic and flushed emissions.
    ///
    /// Defaults to the system clock.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn validated_capacity(&self) -> Result<Option<usize>> {
        match self.capacity {
            None => Err(Error::config("publish capacity is required")),
            Some(0) => Err(Error::config("publish capacity must not be zero")),
            Some(capacity) => Ok(queue_capacity(capacity)),
        }
    }

    /// Validates the configuration, starts the backends and returns the running `Collector`.
    pub fn build(self) -> Result<Collector> { Collector::from_config(self) }
}
