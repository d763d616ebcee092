use super::{Backend, Stream};
use crate::{
    error::{Error, Result},
    render::Renderer,
};
use flate2::{write::GzEncoder, Compression};
use log::debug;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

const MEGABYTE: f64 = 1024.0 * 1024.0;

/// Configuration for a [`FileBackend`].
///
/// Files are named `<prefix><counter>.<extension>`, with the counter zero-padded to
/// `counter_width` digits and `.gz` appended when compressing.
#[derive(Clone, Debug)]
pub struct FileConfig {
    directory: PathBuf,
    prefix: String,
    extension: String,
    counter_width: usize,
    rotate_megabytes: f64,
    gzip: bool,
    renderer: Renderer,
}

impl FileConfig {
    pub fn new<P: AsRef<Path>>(directory: P) -> FileConfig {
        FileConfig {
            directory: directory.as_ref().to_path_buf(),
            prefix: "metrics.".to_owned(),
            extension: "log".to_owned(),
            counter_width: 4,
            rotate_megabytes: 100.0,
            gzip: false,
            renderer: Renderer::default(),
        }
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_owned();
        self
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_owned();
        self
    }

    /// Sets the zero-pad width of the rotation counter.
    ///
    /// Defaults to `4`.
    pub fn counter_width(mut self, width: usize) -> Self {
        self.counter_width = width;
        self
    }

    /// Sets the size, in megabytes of rendered output, after which the current file is closed
    /// and the next one opened.
    ///
    /// Defaults to `100`.  Zero disables rotation.
    pub fn rotate_megabytes(mut self, megabytes: f64) -> Self {
        self.rotate_megabytes = megabytes;
        self
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Validates the configuration and creates the output directory.
    pub fn build(self) -> Result<FileBackend> {
        if self.directory.as_os_str().is_empty() {
            return Err(Error::config("file backend needs a directory"));
        }
        if self.prefix.is_empty() && self.extension.is_empty() {
            return Err(Error::config("file backend needs a prefix or an extension"));
        }
        if self.counter_width == 0 || self.counter_width > 20 {
            return Err(Error::config(format!(
                "file counter width {} must be between 1 and 20",
                self.counter_width
            )));
        }
        if !self.rotate_megabytes.is_finite() || self.rotate_megabytes < 0.0 {
            return Err(Error::config(format!(
                "file rotation threshold {} must be a non-negative number of megabytes",
                self.rotate_megabytes
            )));
        }

        fs::create_dir_all(&self.directory)?;

        let threshold = (self.rotate_megabytes * MEGABYTE) as u64;
        Ok(FileBackend {
            name: format!("file:{}", self.directory.display()),
            config: self,
            threshold,
            counter: 0,
        })
    }
}

enum Output {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Output {
    fn close(self) -> io::Result<()> {
        match self {
            Output::Plain(mut w) => w.flush(),
            Output::Gzip(w) => w.finish()?.flush(),
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Plain(w) => w.write(buf),
            Output::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Plain(w) => w.flush(),
            Output::Gzip(w) => w.flush(),
        }
    }
}

/// The currently open file and how many bytes have been written into it.
struct Segment {
    path: PathBuf,
    output: Output,
    written: u64,
}

/// Writes rendered emissions into a directory of size-rotated files.
///
/// On start the backend probes the directory for the first unused file name, so restarting
/// against the same directory continues the sequence instead of overwriting it.
pub struct FileBackend {
    name: String,
    config: FileConfig,
    threshold: u64,
    counter: u64,
}

impl FileBackend {
    fn file_name(&self, counter: u64) -> String {
        let mut name = format!(
            "{}{:0width$}",
            self.config.prefix,
            counter,
            width = self.config.counter_width
        );
        if !self.config.extension.is_empty() {
            name.push('.');
            name.push_str(&self.config.extension);
        }
        if self.config.gzip {
            name.push_str(".gz");
        }
        name
    }

    /// Finds the next file name that does not exist yet.
    fn next_path(&mut self) -> PathBuf {
        loop {
            let path = self.config.directory.join(self.file_name(self.counter));
            self.counter += 1;
            if !path.exists() {
                return path;
            }
        }
    }

    fn open(&mut self) -> io::Result<Segment> {
        loop {
            let path = self.next_path();
            let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                // Someone else claimed the name between the probe and the open.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };

            debug!("[{}] opened {}", self.name, path.display());
            let writer = BufWriter::new(file);
            let output = if self.config.gzip {
                Output::Gzip(GzEncoder::new(writer, Compression::default()))
            } else {
                Output::Plain(writer)
            };

            return Ok(Segment {
                path,
                output,
                written: 0,
            });
        }
    }

    fn close(&self, segment: Segment) -> io::Result<()> {
        debug!("[{}] closing {} after {} bytes", self.name, segment.path.display(), segment.written);
        segment.output.close()
    }

    fn run(&mut self, stream: &Stream) -> Result<()> {
        let mut segment: Option<Segment> = None;
        let mut buf = Vec::with_capacity(256);

        for emission in stream.iter() {
            buf.clear();
            emission.render(&self.config.renderer, &mut buf)?;

            let mut current = match segment.take() {
                Some(current) => current,
                None => self.open()?,
            };
            current.output.write_all(&buf)?;
            current.written += buf.len() as u64;

            if self.threshold > 0 && current.written >= self.threshold {
                self.close(current)?;
            } else {
                if stream.is_empty() {
                    current.output.flush()?;
                }
                segment = Some(current);
            }
        }

        if let Some(current) = segment {
            self.close(current)?;
        }
        Ok(())
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &str { &self.name }

    fn consume(mut self: Box<Self>, stream: Stream) -> Result<()> { self.run(&stream) }
}
