use crate::{
    backend::{Backend, Cancel, Stream},
    error::{Error, Result},
    render::Emission,
};
use crossbeam_channel::{self, Receiver, Sender};
use log::{debug, error};
use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    thread::{self, JoinHandle},
};

fn channel<T>(capacity: Option<usize>) -> (Sender<T>, Receiver<T>) {
    match capacity {
        Some(capacity) => crossbeam_channel::bounded(capacity),
        None => crossbeam_channel::unbounded(),
    }
}

/// A running backend thread.
pub(crate) struct BackendHandle {
    pub name: String,
    pub handle: JoinHandle<Result<()>>,
}

fn spawn_backend(backend: Box<dyn Backend>, stream: Stream) -> Result<BackendHandle> {
    let name = backend.name().to_owned();
    let handle = thread::Builder::new()
        .name(format!("series-backend-{}", name))
        .spawn(move || backend.consume(stream))?;
    Ok(BackendHandle { name, handle })
}

/// Delivers emissions from any number of publishers to every backend.
///
/// A single backend reads the publish queue directly.  With several, a broker thread copies
/// each emission into one bounded subscription per backend, so every backend sees every
/// emission in publish order.  A slow backend eventually backs up the broker and, through it,
/// the publishers.
pub(crate) struct Distributor {
    tx: RwLock<Option<Sender<Arc<Emission>>>>,
    broker: Mutex<Option<JoinHandle<()>>>,
}

impl Distributor {
    /// Starts the backends and returns the distributor feeding them, along with their handles.
    pub fn start(
        capacity: Option<usize>, backends: Vec<Box<dyn Backend>>, cancel: &Cancel,
    ) -> Result<(Distributor, Vec<BackendHandle>)> {
        if backends.is_empty() {
            return Err(Error::config("at least one backend is required"));
        }

        let (tx, rx) = channel(capacity);
        let mut handles = Vec::with_capacity(backends.len());

        if backends.len() == 1 {
            for backend in backends {
                handles.push(spawn_backend(backend, Stream::new(rx.clone(), cancel.clone()))?);
            }
            let distributor = Distributor {
                tx: RwLock::new(Some(tx)),
                broker: Mutex::new(None),
            };
            return Ok((distributor, handles));
        }

        let mut subscriptions = Vec::with_capacity(backends.len());
        for backend in backends {
            let (sub_tx, sub_rx) = channel(capacity);
            subscriptions.push(sub_tx);
            handles.push(spawn_backend(backend, Stream::new(sub_rx, cancel.clone()))?);
        }

        let broker = thread::Builder::new()
            .name("series-broker".to_owned())
            .spawn(move || run_broker(rx, subscriptions))?;

        let distributor = Distributor {
            tx: RwLock::new(Some(tx)),
            broker: Mutex::new(Some(broker)),
        };
        Ok((distributor, handles))
    }

    /// Queues an emission for every backend, blocking while the queue is full.
    ///
    /// Returns `false` once the distributor has been closed.
    pub fn publish(&self, emission: Emission) -> bool {
        let tx = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(Arc::new(emission)).is_ok(),
            None => false,
        }
    }

    /// Closes the publish queue and waits for the broker to hand off everything queued.
    pub fn close(&self) {
        drop(self.tx.write().unwrap_or_else(PoisonError::into_inner).take());

        let broker = self.broker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(broker) = broker {
            if broker.join().is_err() {
                error!("distribution broker panicked");
            }
        }
    }
}

fn run_broker(rx: Receiver<Arc<Emission>>, mut subscriptions: Vec<Sender<Arc<Emission>>>) {
    for emission in rx.iter() {
        // A backend that died no longer receives; keep feeding the others.
        subscriptions.retain(|sub| sub.send(emission.clone()).is_ok());
        if subscriptions.is_empty() {
            debug!("every backend has exited; discarding emissions");
        }
    }
}
