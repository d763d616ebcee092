use super::{event::Op, LocalValue, Reading};
use std::sync::atomic::{AtomicI64, Ordering};

/// Last-write integer cell backing counters and gauges.
pub struct IntValue {
    value: AtomicI64,
}

impl IntValue {
    pub fn new() -> IntValue { IntValue { value: AtomicI64::new(0) } }

    pub fn value(&self) -> i64 { self.value.load(Ordering::Acquire) }
}

impl LocalValue for IntValue {
    fn apply(&self, op: &Op) -> Option<i64> {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            let next = op.apply(current);
            match self
                .value
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(next),
                Err(actual) => current = actual,
            }
        }
    }

    fn resolve(&self) -> Reading { Reading::Scalar(self.value()) }

    fn peek(&self) -> Reading { Reading::Scalar(self.value()) }
}
