use crate::clock::ClockSource;
use std::sync::atomic::{AtomicI64, Ordering};

pub struct Mock {
    offset: AtomicI64,
}

impl Mock {
    pub fn new(offset: i64) -> Self {
        Self {
            offset: AtomicI64::new(offset),
        }
    }

    pub fn increment(&self, amount: i64) { self.offset.fetch_add(amount, Ordering::Release); }

    pub fn set(&self, value: i64) { self.offset.store(value, Ordering::Release); }
}

impl ClockSource for Mock {
    fn now(&self) -> i64 { self.offset.load(Ordering::Acquire) }
}
