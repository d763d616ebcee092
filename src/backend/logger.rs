use super::{writer::WriterBackend, Backend, Stream};
use crate::{error::Result, render::Renderer};
use log::Level;
use std::io::{self, Write};

/// A destination for complete lines of text.
pub trait LineSink: Send {
    fn send(&mut self, line: &str) -> io::Result<()>;
}

impl<F> LineSink for F
where
    F: FnMut(&str) -> io::Result<()> + Send,
{
    fn send(&mut self, line: &str) -> io::Result<()> { self(line) }
}

/// Forwards each line to the `log` facade.
pub struct LogSink {
    level: Level,
    target: String,
}

impl LogSink {
    pub fn new(level: Level, target: &str) -> LogSink {
        LogSink {
            level,
            target: target.to_owned(),
        }
    }
}

impl Default for LogSink {
    fn default() -> LogSink { LogSink::new(Level::Info, "series") }
}

impl LineSink for LogSink {
    fn send(&mut self, line: &str) -> io::Result<()> {
        log::log!(target: self.target.as_str(), self.level, "{}", line);
        Ok(())
    }
}

/// Adapts a [`LineSink`] into a `Write`r, handing over one line per newline.
///
/// Trailing bytes without a newline are held until more arrive or the writer is flushed.
pub struct LogWriter<S> {
    sink: S,
    pending: Vec<u8>,
}

impl<S: LineSink> LogWriter<S> {
    pub fn new(sink: S) -> LogWriter<S> {
        LogWriter {
            sink,
            pending: Vec::new(),
        }
    }

    fn send(&mut self, line: &[u8]) -> io::Result<()> { self.sink.send(&String::from_utf8_lossy(line)) }
}

impl<S: LineSink> Write for LogWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            if self.pending.is_empty() {
                self.send(&rest[..pos])?;
            } else {
                self.pending.extend_from_slice(&rest[..pos]);
                let line = std::mem::take(&mut self.pending);
                self.send(&line)?;
            }
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.send(&line)?;
        }
        Ok(())
    }
}

struct BoxedSink(Box<dyn LineSink>);

impl LineSink for BoxedSink {
    fn send(&mut self, line: &str) -> io::Result<()> { self.0.send(line) }
}

/// Writes rendered emissions into a line sink, by default the `log` facade.
pub struct LoggerBackend {
    inner: WriterBackend<LogWriter<BoxedSink>>,
}

impl LoggerBackend {
    /// Logs every emission at `info` under the `series` target.
    pub fn new(name: &str, renderer: Renderer) -> LoggerBackend {
        LoggerBackend::with_sink(name, LogSink::default(), renderer)
    }

    pub fn with_sink<S: LineSink + 'static>(name: &str, sink: S, renderer: Renderer) -> LoggerBackend {
        let sink = BoxedSink(Box::new(sink));
        LoggerBackend {
            inner: WriterBackend::new(name, LogWriter::new(sink), renderer),
        }
    }
}

impl Backend for LoggerBackend {
    fn name(&self) -> &str { self.inner.name() }

    fn consume(mut self: Box<Self>, stream: Stream) -> Result<()> { self.inner.run(&stream) }
}
