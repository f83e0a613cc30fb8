use crate::retry::Retry;
use slog::{o, Discard, Logger};
use std::path::PathBuf;
use std::time::Duration;

/// DownloadOptions implements the builder pattern for the optional parts of a download:
/// retry behavior, server-certificate trust, chunking, timeouts, and logging.
#[derive(Clone)]
pub struct DownloadOptions {
    pub(crate) retry: Retry,
    pub(crate) trust_anchor: Option<PathBuf>,
    pub(crate) chunk_size: usize,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) logger: Logger,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            retry: Retry::default(),
            trust_anchor: None,
            chunk_size: 32 * 1024,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            logger: Logger::root(Discard, o!()),
        }
    }
}

impl DownloadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry configuration.  By default, a single attempt is made.
    pub fn retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    /// Trust only the PEM certificate(s) in the given file when verifying HTTPS servers.
    /// Without a trust anchor, the platform's trust store is used.
    pub fn trust_anchor<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.trust_anchor = Some(path.into());
        self
    }

    /// Set the maximum number of bytes read and written at a time; progress is reported and
    /// cancellation checked once per chunk.  The default is 32KiB.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the timeout for establishing a connection.  The default is 30 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the longest time to wait for the next chunk of data before failing the attempt.
    /// The default is 30 seconds.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the [`slog::Logger`] used to report progress of attempts.  By default nothing is
    /// logged.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}
