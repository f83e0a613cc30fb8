use reqwest::StatusCode;

/// The classification of a [`DownloadError`], without any of its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidMetadata,
    TlsTrustFailure,
    NotFound,
    TransportFailure,
    ChecksumMismatch,
    Oversize,
    Cancelled,
    RetriesExhausted,
    Storage,
}

/// The terminal failure of a download.  Each component reports its own kind of failure; the
/// decision to retry is made only by the retry controller, based on [`DownloadError::kind`].
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The artifact descriptor is malformed; no transfer was attempted.
    #[error("invalid artifact metadata: {0}")]
    InvalidMetadata(String),

    /// The server certificate could not be verified, or the trust anchor could not be loaded.
    #[error("TLS trust failure")]
    TlsTrust(#[source] anyhow::Error),

    /// The remote resource or local path does not exist (or the server refused it with a
    /// client error).
    #[error("artifact not found at {link}")]
    NotFound {
        link: String,
        #[source]
        source: anyhow::Error,
    },

    /// A connection, read, or server-side failure that may succeed on another attempt.
    #[error("transport failure{}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Transport {
        status: Option<StatusCode>,
        #[source]
        source: anyhow::Error,
    },

    /// The full content was received but does not hash to the declared value.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The content is larger than the declared size.
    #[error("artifact exceeds its declared size of {expected} bytes")]
    Oversize { expected: u64 },

    /// The cancellation signal was observed.
    #[error("download cancelled")]
    Cancelled,

    /// Every attempt failed with a retryable error; `last` is the final one.
    #[error("download failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<DownloadError>,
    },

    /// A local resource failed: the partial or target file could not be read, written, or
    /// renamed, or the HTTP client could not be set up.
    #[error("storage failure")]
    Storage(#[source] anyhow::Error),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::InvalidMetadata(_) => ErrorKind::InvalidMetadata,
            DownloadError::TlsTrust(_) => ErrorKind::TlsTrustFailure,
            DownloadError::NotFound { .. } => ErrorKind::NotFound,
            DownloadError::Transport { .. } => ErrorKind::TransportFailure,
            DownloadError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            DownloadError::Oversize { .. } => ErrorKind::Oversize,
            DownloadError::Cancelled => ErrorKind::Cancelled,
            DownloadError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            DownloadError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Shorthand for a transport failure without an HTTP status.
    pub(crate) fn transport<E: Into<anyhow::Error>>(err: E) -> Self {
        DownloadError::Transport {
            status: None,
            source: err.into(),
        }
    }

    pub(crate) fn storage<E: Into<anyhow::Error>>(err: E) -> Self {
        DownloadError::Storage(err.into())
    }
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn transport_display_includes_status() {
        let err = DownloadError::Transport {
            status: Some(StatusCode::BAD_GATEWAY),
            source: anyhow!("oops"),
        };
        assert_eq!(
            err.to_string(),
            "transport failure (status 502 Bad Gateway)"
        );
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }

    #[test]
    fn exhausted_exposes_last_error() {
        let err = DownloadError::RetriesExhausted {
            attempts: 3,
            last: Box::new(DownloadError::ChecksumMismatch {
                expected: "aa".into(),
                actual: "bb".into(),
            }),
        };
        assert_eq!(err.to_string(), "download failed after 3 attempts");
        match err {
            DownloadError::RetriesExhausted { last, .. } => {
                assert_eq!(last.kind(), ErrorKind::ChecksumMismatch)
            }
            _ => unreachable!(),
        }
    }
}
