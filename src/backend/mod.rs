//! Consumers of rendered emissions.
//!
//! Every backend runs on its own thread and drains a [`Stream`] until the collector closes it.
//! A backend returns when its stream ends or when it hits an error it cannot recover from; the
//! collector gathers those errors when it closes.
use crate::{error::Result, render::Emission};
use crossbeam_channel::{self, select, Receiver, Sender, TryRecvError};
use std::{sync::Arc, time::Duration};

mod file;
mod logger;
mod policy;
mod socket;
mod writer;

pub use self::{
    file::{FileBackend, FileConfig},
    logger::{LineSink, LogSink, LogWriter, LoggerBackend},
    policy::{Backoff, Policy},
    socket::{Network, SocketBackend, SocketConfig},
    writer::WriterBackend,
};

/// A sink for emissions.
pub trait Backend: Send + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Consumes emissions until the stream ends, returning the first unrecoverable error.
    fn consume(self: Box<Self>, stream: Stream) -> Result<()>;
}

/// Cancellation signal shared by every background thread of a collector.
///
/// Nothing is ever sent on the channel; cancellation is the disconnect caused by dropping the
/// paired [`Canceller`].
#[derive(Clone)]
pub struct Cancel {
    rx: Receiver<()>,
}

/// Owner side of a [`Cancel`].
pub struct Canceller {
    _tx: Sender<()>,
}

impl Canceller {
    pub fn cancel(self) {}
}

impl Cancel {
    pub fn new() -> (Canceller, Cancel) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        (Canceller { _tx: tx }, Cancel { rx })
    }

    pub fn is_cancelled(&self) -> bool { matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected)) }

    /// Sleeps for `timeout` unless cancelled first; returns whether cancellation happened.
    pub fn wait(&self, timeout: Duration) -> bool {
        select! {
            recv(self.rx) -> _ => true,
            default(timeout) => false,
        }
    }

    pub fn receiver(&self) -> &Receiver<()> { &self.rx }
}

/// The queue of emissions feeding one backend.
pub struct Stream {
    rx: Receiver<Arc<Emission>>,
    cancel: Cancel,
}

impl Stream {
    pub fn new(rx: Receiver<Arc<Emission>>, cancel: Cancel) -> Stream { Stream { rx, cancel } }

    /// Blocks for the next emission; `None` once the stream is closed and drained.
    pub fn recv(&self) -> Option<Arc<Emission>> { self.rx.recv().ok() }

    /// Whether nothing is queued right now.
    pub fn is_empty(&self) -> bool { self.rx.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = Arc<Emission>> + '_ { self.rx.iter() }

    pub fn receiver(&self) -> &Receiver<Arc<Emission>> { &self.rx }

    pub fn cancel(&self) -> &Cancel { &self.cancel }
}
