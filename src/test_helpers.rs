//! Utilities for testing downloads
use crate::error::{DownloadError, Result};
use crate::transport::{Opened, Transport};
use anyhow::anyhow;
use async_trait::async_trait;
use httptest::{matchers::*, responders::*, Expectation};
use reqwest::StatusCode;
use slog::{o, Drain, Logger};
use std::collections::VecDeque;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Digests of [`test_data`]
pub(crate) const TEST_MD5: &str = "9cc60713923528a1dd94e1c1ab0ebc9e";
pub(crate) const TEST_SHA1: &str = "fefb71740a82b94a2da3bcd2fd72fc64a7fb8666";
pub(crate) const TEST_SHA256: &str =
    "4b640d85ab3ba30fd02c9fc9db4a8928f416322ad27022ea58a65aaee68a4df2";

/// 64KiB of data that does not repeat on any power-of-two boundary.
pub(crate) fn test_data() -> Vec<u8> {
    (0..65536u32).map(|i| (i % 251) as u8).collect()
}

/// Create a Logger for use in tests
pub(crate) fn test_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();

    Logger::root(drain, o!())
}

/// Event logger, used to log events from various places and then assert on them.
#[derive(Default, Clone)]
pub(crate) struct EventLogger {
    logged: Arc<Mutex<Vec<String>>>,
}

impl EventLogger {
    pub(crate) fn log<S: Into<String>>(&self, message: S) {
        self.logged.lock().unwrap().push(message.into())
    }

    pub(crate) fn assert(&self, expected: Vec<String>) {
        assert_eq!(*self.logged.lock().unwrap(), expected);
    }
}

/// Behavior of a single [`FakeTransport::open`] call.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// Serve the data from the requested offset
    Serve,
    /// Serve all of the data, regardless of offset
    IgnoreRange,
    /// Fail with the given HTTP status
    Status(StatusCode),
    /// Serve this many bytes from the requested offset, then fail with a connection reset
    Truncate(usize),
    /// Serve the data from the requested offset, with every byte inverted
    Corrupt,
    /// Accept the request, but never deliver any data
    Stall,
    /// Fail certificate verification
    Untrusted,
}

/// Fake implementation of a transport, following a script of behaviors and then serving
/// normally.
pub(crate) struct FakeTransport {
    pub(crate) logger: EventLogger,
    data: Vec<u8>,
    script: Mutex<VecDeque<Behavior>>,
}

impl FakeTransport {
    pub(crate) fn new(data: Vec<u8>, script: Vec<Behavior>) -> Self {
        Self {
            logger: EventLogger::default(),
            data,
            script: Mutex::new(script.into()),
        }
    }

    fn from_offset(&self, offset: u64) -> Vec<u8> {
        self.data
            .get(offset as usize..)
            .map(|d| d.to_vec())
            .unwrap_or_default()
    }
}

fn opened<R: AsyncRead + Send + Unpin + 'static>(body: R, resumed: bool, len: usize) -> Opened {
    Opened {
        body: Box::new(body),
        resumed,
        content_length: Some(len as u64),
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, link: &str, offset: u64) -> Result<Opened> {
        self.logger.log(format!("open {} {}", link, offset));
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Serve);
        match behavior {
            Behavior::Serve => {
                let data = self.from_offset(offset);
                let len = data.len();
                Ok(opened(Cursor::new(data), true, len))
            }
            Behavior::IgnoreRange => {
                let data = self.data.clone();
                let len = data.len();
                Ok(opened(Cursor::new(data), offset == 0, len))
            }
            Behavior::Status(status) if status.is_client_error() => Err(DownloadError::NotFound {
                link: link.to_owned(),
                source: anyhow!("status {}", status),
            }),
            Behavior::Status(status) => Err(DownloadError::Transport {
                status: Some(status),
                source: anyhow!("status {}", status),
            }),
            Behavior::Truncate(n) => {
                let data = self.from_offset(offset);
                let len = data.len();
                let served = data.into_iter().take(n).collect();
                Ok(opened(TruncatedBody(Cursor::new(served)), true, len))
            }
            Behavior::Corrupt => {
                let data: Vec<u8> = self.from_offset(offset).iter().map(|b| !b).collect();
                let len = data.len();
                Ok(opened(Cursor::new(data), true, len))
            }
            Behavior::Stall => {
                let len = self.from_offset(offset).len();
                Ok(opened(StalledBody, true, len))
            }
            Behavior::Untrusted => Err(DownloadError::TlsTrust(anyhow!(
                "invalid peer certificate: UnknownIssuer"
            ))),
        }
    }
}

/// A body that delivers its content and then fails as if the connection was reset.
pub(crate) struct TruncatedBody(pub(crate) Cursor<Vec<u8>>);

impl AsyncRead for TruncatedBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.0.position() >= self.0.get_ref().len() as u64 {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

/// A body that never delivers any data.
pub(crate) struct StalledBody;

impl AsyncRead for StalledBody {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

/// A fake server of data blobs.  Serves [`test_data`] at the given URL.
pub(crate) struct FakeDataServer {
    server: httptest::Server,
}

impl FakeDataServer {
    /// Build an httptest::Server that responds with a sequence of responses, cycling through
    /// them.  For 200, the body is the full test data, whatever range was requested.
    pub(crate) fn new(responses: &[u16]) -> Self {
        let server = httptest::Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/data"))
                .times(..)
                .respond_with(cycle(
                    responses
                        .iter()
                        .map(|response| {
                            let responder: Box<dyn Responder> = Box::new(if *response == 200 {
                                status_code(200)
                                    .append_header("Content-Type", "application/octet-stream")
                                    .body(test_data())
                            } else {
                                status_code(*response).body(Vec::<u8>::new())
                            });
                            responder
                        })
                        .collect(),
                )),
        );
        Self { server }
    }

    /// Build an httptest::Server that honors range requests starting at the given offsets, and
    /// serves the full test data to requests without a range.
    pub(crate) fn with_ranges(offsets: &[usize]) -> Self {
        let server = httptest::Server::run();
        let data = test_data();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/data"),
                request::headers(not(contains(key("range")))),
            ])
            .times(..)
            .respond_with(status_code(200).body(data.clone())),
        );
        for offset in offsets {
            server.expect(
                Expectation::matching(all_of![
                    request::method_path("GET", "/data"),
                    request::headers(contains(("range", matches(format!("^bytes={}-$", offset))))),
                ])
                .times(..)
                .respond_with(
                    status_code(206)
                        .append_header(
                            "Content-Range",
                            format!("bytes {}-{}/{}", offset, data.len() - 1, data.len()),
                        )
                        .body(data[*offset..].to_vec()),
                ),
            );
        }
        Self { server }
    }

    pub(crate) fn data_url(&self) -> String {
        self.server.url_str("/data")
    }
}
