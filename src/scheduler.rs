use crate::{
    backend::Cancel,
    data::event::Event,
    error::{Error, Result},
    helper::duration_as_millis,
    registry::TrackedSeries,
};
use crossbeam_channel::{self, select, tick, Receiver, Sender};
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use log::debug;
use std::{
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

/// Batch producer invoked on every tick of its interval.
pub(crate) type Producer = Box<dyn FnMut() -> std::result::Result<Vec<Event>, String> + Send>;

/// Where timer threads send their work.
pub(crate) trait Emitter: Send + Sync + 'static {
    /// Resolves a series and distributes its value.
    fn emit(&self, series: &TrackedSeries);

    /// Feeds events back through ingestion.
    fn publish(self: Arc<Self>, events: Vec<Event>);
}

pub(crate) enum Subscriber {
    Series(Arc<TrackedSeries>),
    Producer(Producer),
}

impl Subscriber {
    fn fire(&mut self, target: &Arc<dyn Emitter>) {
        match self {
            Subscriber::Series(series) => target.emit(series),
            Subscriber::Producer(producer) => match producer() {
                Ok(events) => target.clone().publish(events),
                Err(e) => debug!("producer failed, skipping this tick: {}", e),
            },
        }
    }
}

struct Timer {
    tx: Sender<Subscriber>,
    handle: JoinHandle<()>,
}

/// Background re-emission, with at most one thread per distinct interval.
///
/// The first subscription for an interval starts its timer thread; later ones for the same
/// interval join that thread's queue.
pub(crate) struct Scheduler {
    cancel: Cancel,
    timers: Mutex<HashMap<Duration, Timer, FnvBuildHasher>>,
}

impl Scheduler {
    pub fn new(cancel: Cancel) -> Scheduler {
        Scheduler {
            cancel,
            timers: Mutex::new(HashMap::with_hasher(FnvBuildHasher::default())),
        }
    }

    /// Adds `subscriber` to the timer for `interval`, starting it if needed.
    pub fn subscribe(&self, target: &Arc<dyn Emitter>, interval: Duration, subscriber: Subscriber) -> Result<()> {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }

        if let Some(timer) = timers.get(&interval) {
            return timer.tx.send(subscriber).map_err(|_| Error::Closed);
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(subscriber).map_err(|_| Error::Closed)?;

        let cancel = self.cancel.clone();
        let target = target.clone();
        let handle = thread::Builder::new()
            .name(format!("series-timer-{}ms", duration_as_millis(interval)))
            .spawn(move || run_timer(interval, rx, cancel, target))?;

        debug!("started timer for {:?}", interval);
        timers.insert(interval, Timer { tx, handle });
        Ok(())
    }

    /// Number of running timer threads.
    pub fn len(&self) -> usize { self.timers.lock().unwrap_or_else(PoisonError::into_inner).len() }

    /// Stops every timer thread and waits for it to exit.
    pub fn shutdown(&self) {
        let timers: Vec<Timer> = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, timer)| timer)
            .collect();

        for timer in timers {
            drop(timer.tx);
            if timer.handle.join().is_err() {
                debug!("timer thread panicked");
            }
        }
    }
}

fn run_timer(interval: Duration, rx: Receiver<Subscriber>, cancel: Cancel, target: Arc<dyn Emitter>) {
    let ticker = tick(interval);
    let mut subscribers = Vec::new();

    loop {
        select! {
            recv(cancel.receiver()) -> _ => break,
            recv(rx) -> subscriber => match subscriber {
                Ok(subscriber) => subscribers.push(subscriber),
                Err(_) => break,
            },
            recv(ticker) -> _ => {
                subscribers.extend(rx.try_iter());
                for subscriber in subscribers.iter_mut() {
                    subscriber.fire(&target);
                }
            },
        }
    }
}
