//! Sources of artifact bytes.  The [`Transport`] trait allows injecting a fake source in tests.
use crate::error::{DownloadError, Result};
use crate::options::DownloadOptions;
use crate::tls;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use reqwest::header;
use reqwest::StatusCode;
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeekExt};
use tokio::sync::OnceCell;
use tokio_util::io::StreamReader;

/// A byte source opened at a particular offset.
pub struct Opened {
    /// The content, starting at the requested offset if `resumed` is true, or at the
    /// beginning of the artifact otherwise.
    pub body: Box<dyn AsyncRead + Send + Unpin>,

    /// True if the body continues from the requested offset.  False means the source ignored
    /// the offset and the body holds the whole artifact.
    pub resumed: bool,

    /// Number of bytes in the body, if known.
    pub content_length: Option<u64>,
}

/// A source of artifact bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the artifact at `link`, requesting the bytes from `offset` onward.
    async fn open(&self, link: &str, offset: u64) -> Result<Opened>;
}

/// Fetches artifacts over HTTP or HTTPS, using byte-range requests to resume.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client with the trust configuration and timeouts in the options.
    pub async fn new(options: &DownloadOptions) -> Result<Self> {
        let anchors = match &options.trust_anchor {
            Some(path) => Some(tls::load_trust_anchor(path).await?),
            None => None,
        };
        let builder = reqwest::Client::builder().connect_timeout(options.connect_timeout);
        let client = tls::configure_trust(builder, anchors)
            .build()
            .map_err(|e| {
                let tls = tls::is_tls_config_error(&e);
                let err = anyhow::Error::new(e).context("while building HTTP client");
                if tls {
                    DownloadError::TlsTrust(err)
                } else {
                    DownloadError::storage(err)
                }
            })?;
        Ok(Self { client })
    }
}

/// An [`HttpTransport`] that is only built when first opened, so a download that needs no
/// transfer never loads the trust anchor.
pub(crate) struct LazyHttpTransport<'a> {
    options: &'a DownloadOptions,
    transport: OnceCell<HttpTransport>,
}

impl<'a> LazyHttpTransport<'a> {
    pub(crate) fn new(options: &'a DownloadOptions) -> Self {
        Self {
            options,
            transport: OnceCell::new(),
        }
    }
}

#[async_trait]
impl<'a> Transport for LazyHttpTransport<'a> {
    async fn open(&self, link: &str, offset: u64) -> Result<Opened> {
        let transport = self
            .transport
            .get_or_try_init(|| HttpTransport::new(self.options))
            .await?;
        transport.open(link, offset).await
    }
}

/// Convert a failure to send a request into a classified error.
fn send_error(link: &str, err: reqwest::Error) -> DownloadError {
    if err.is_builder() {
        return DownloadError::InvalidMetadata(format!("invalid link {:?}: {}", link, err));
    }
    if tls::is_certificate_error(&err) {
        return DownloadError::TlsTrust(
            anyhow::Error::new(err).context(format!("while fetching {}", link)),
        );
    }
    DownloadError::transport(anyhow::Error::new(err).context(format!("while fetching {}", link)))
}

/// Convert an unsuccessful HTTP status into a classified error.  Client errors are
/// permanent, except for timeouts and rate limiting.
fn status_error(link: &str, status: StatusCode) -> DownloadError {
    let source = anyhow!("{} returned status {}", link, status);
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        DownloadError::NotFound {
            link: link.to_owned(),
            source,
        }
    } else {
        DownloadError::Transport {
            status: Some(status),
            source,
        }
    }
}

/// Parse the first byte position from a `Content-Range: bytes <first>-<last>/<len>` header.
fn content_range_start(value: &header::HeaderValue) -> Option<u64> {
    let value = value.to_str().ok()?;
    let range = value.strip_prefix("bytes ")?;
    let (first, _) = range.split_once('-')?;
    first.trim().parse().ok()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, link: &str, offset: u64) -> Result<Opened> {
        // ranges refer to stored bytes, so ask for them unencoded
        let mut request = self
            .client
            .get(link)
            .header(header::ACCEPT_ENCODING, "identity");
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let res = request.send().await.map_err(|e| send_error(link, e))?;
        let status = res.status();
        if !status.is_success() {
            return Err(status_error(link, status));
        }

        let resumed = if status == StatusCode::PARTIAL_CONTENT {
            match res.headers().get(header::CONTENT_RANGE) {
                Some(value) if content_range_start(value) != Some(offset) => {
                    return Err(DownloadError::transport(anyhow!(
                        "{} answered a request for offset {} with range {:?}",
                        link,
                        offset,
                        value
                    )));
                }
                _ => true,
            }
        } else {
            offset == 0
        };
        let content_length = res.content_length();

        // convert the Result::Err type to std::io::Error
        let stream = res
            .bytes_stream()
            .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));

        Ok(Opened {
            body: Box::new(StreamReader::new(Box::pin(stream))),
            resumed,
            content_length,
        })
    }
}

/// Copies artifacts from local paths.  Seeking always succeeds, so the offset is always
/// honored.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn open(&self, link: &str, offset: u64) -> Result<Opened> {
        let mut file = match File::open(link).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::NotFound {
                    link: link.to_owned(),
                    source: e.into(),
                })
            }
            Err(e) => {
                return Err(DownloadError::transport(
                    anyhow::Error::new(e).context(format!("while opening {}", link)),
                ))
            }
        };
        let len = file
            .metadata()
            .await
            .with_context(|| format!("while reading metadata of {}", link))
            .map_err(DownloadError::transport)?
            .len();
        file.seek(SeekFrom::Start(offset))
            .await
            .with_context(|| format!("while seeking {} to {}", link, offset))
            .map_err(DownloadError::transport)?;

        Ok(Opened {
            body: Box::new(file),
            resumed: true,
            content_length: Some(len.saturating_sub(offset)),
        })
    }
}
