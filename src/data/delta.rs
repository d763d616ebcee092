use super::{event::Op, LocalValue, Reading};
use std::sync::atomic::{AtomicI64, Ordering};

/// Reset-on-read accumulator.
///
/// Applies accumulate into a pending amount.  Each resolve swaps the pending amount out, folds
/// it into the running total, and reports only what changed since the previous resolve.
pub struct Delta {
    pending: AtomicI64,
    total: AtomicI64,
}

impl Delta {
    pub fn new() -> Delta {
        Delta {
            pending: AtomicI64::new(0),
            total: AtomicI64::new(0),
        }
    }

    /// Sum of every amount reported by `resolve` so far.
    pub fn total(&self) -> i64 { self.total.load(Ordering::Acquire) }
}

impl LocalValue for Delta {
    fn apply(&self, op: &Op) -> Option<i64> {
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            let next = op.apply(current);
            match self
                .pending
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(next),
                Err(actual) => current = actual,
            }
        }
    }

    fn resolve(&self) -> Reading {
        let amount = self.pending.swap(0, Ordering::AcqRel);
        self.total.fetch_add(amount, Ordering::AcqRel);
        Reading::Scalar(amount)
    }

    fn peek(&self) -> Reading { Reading::Scalar(self.pending.load(Ordering::Acquire)) }
}
