use super::{Backend, Stream};
use crate::{error::Result, render::Renderer};
use std::io::Write;

/// Renders emissions into any `Write`r, one line each.
///
/// The writer is flushed whenever the queue runs dry and once more when the stream ends.
pub struct WriterBackend<W> {
    name: String,
    writer: W,
    renderer: Renderer,
}

impl<W: Write + Send + 'static> WriterBackend<W> {
    pub fn new(name: &str, writer: W, renderer: Renderer) -> WriterBackend<W> {
        WriterBackend {
            name: name.to_owned(),
            writer,
            renderer,
        }
    }

    pub(crate) fn run(&mut self, stream: &Stream) -> Result<()> {
        let mut buf = Vec::with_capacity(256);
        for emission in stream.iter() {
            buf.clear();
            emission.render(&self.renderer, &mut buf)?;
            self.writer.write_all(&buf)?;
            if stream.is_empty() {
                self.writer.flush()?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send + 'static> Backend for WriterBackend<W> {
    fn name(&self) -> &str { &self.name }

    fn consume(mut self: Box<Self>, stream: Stream) -> Result<()> { self.run(&stream) }
}

#[cfg(test)]
mod tests {
    use super::WriterBackend;
    use crate::{
        backend::{
            testing::{emission, stream, SharedBuffer},
            Backend,
        },
        error::Error,
        render::Renderer,
    };
    use std::io::{self, Write};

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> { Err(io::Error::new(io::ErrorKind::Other, "broken")) }

        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    #[test]
    fn test_writer_renders_each_emission() {
        let buffer = SharedBuffer::default();
        let backend = Box::new(WriterBackend::new("mem", buffer.clone(), Renderer::statsd()));
        let (tx, stream, _canceller) = stream();

        tx.send(emission("a", 1, 0)).unwrap();
        tx.send(emission("b", 2, 0)).unwrap();
        drop(tx);

        backend.consume(stream).unwrap();
        assert_eq!(buffer.lines(), vec!["a:1|g", "b:2|g"]);
    }

    #[test]
    fn test_writer_errors_are_fatal() {
        let backend = Box::new(WriterBackend::new("broken", Broken, Renderer::json()));
        let (tx, stream, _canceller) = stream();
        tx.send(emission("a", 1, 0)).unwrap();
        drop(tx);

        match backend.consume(stream) {
            Err(Error::Io(e)) => assert_eq!(e.to_string(), "broken"),
            other => panic!("expected io error, got {:?}", other),
        }
    }
}
