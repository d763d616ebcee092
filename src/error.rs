use std::{fmt, io};
use thiserror::Error;

/// Errors produced while configuring a collector or delivering metrics.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value was missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An I/O error from a file or socket.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A connection could not be established.
    #[error("failed to dial {address}: {source}")]
    Dial { address: String, source: io::Error },

    /// A message could not be delivered after exhausting its retries.
    #[error("failed to send message after {attempts} attempts: {source}")]
    Send { attempts: usize, source: io::Error },

    /// A backend was stopped by its failure policy.
    #[error("backend {backend} aborted: {source}")]
    Aborted { backend: String, source: Box<Error> },

    /// A backend thread panicked.
    #[error("backend {0} panicked")]
    BackendPanicked(String),

    /// The collector has already been closed.
    #[error("collector is closed")]
    Closed,

    /// Several errors collected from independent workers.
    #[error("{}", Aggregate(.0))]
    Aggregate(Vec<Error>),
}

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config<S: Into<String>>(reason: S) -> Self { Error::Config(reason.into()) }

    /// Folds a list of errors into a single result.
    ///
    /// No errors is success, a single error is returned as-is, and anything more becomes an
    /// `Aggregate`.
    pub fn join(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }

    /// Whether this error came from invalid configuration.
    pub fn is_config(&self) -> bool { matches!(self, Error::Config(_)) }
}

struct Aggregate<'a>(&'a [Error]);

impl<'a> fmt::Display for Aggregate<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} errors occurred", self.0.len())?;
        for err in self.0 {
            write!(f, "; {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_join_empty_is_ok() {
        assert!(Error::join(Vec::new()).is_ok());
    }

    #[test]
    fn test_join_single_is_unwrapped() {
        let err = Error::join(vec![Error::Closed]).unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[test]
    fn test_join_many_aggregates() {
        let err = Error::join(vec![Error::Closed, Error::config("zero capacity")]).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("2 errors occurred"));
        assert!(message.contains("collector is closed"));
        assert!(message.contains("zero capacity"));
    }
}
