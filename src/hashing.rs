use crate::artifact::HashAlgorithm;
use crate::error::{DownloadError, Result};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// A streaming digest over one of the supported algorithms.
pub(crate) struct Verifier(State);

enum State {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Skip,
}

impl Verifier {
    pub(crate) fn new(algorithm: HashAlgorithm) -> Self {
        Self(match algorithm {
            HashAlgorithm::Md5 => State::Md5(Md5::new()),
            HashAlgorithm::Sha1 => State::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => State::Sha256(Sha256::new()),
            HashAlgorithm::None => State::Skip,
        })
    }

    pub(crate) fn update(&mut self, buf: &[u8]) {
        match &mut self.0 {
            State::Md5(h) => h.update(buf),
            State::Sha1(h) => h.update(buf),
            State::Sha256(h) => h.update(buf),
            State::Skip => {}
        }
    }

    /// Feed up to `len` bytes from the reader into the digest, returning the number of bytes
    /// actually read.
    pub(crate) async fn update_from<R: AsyncRead + Unpin>(
        &mut self,
        reader: R,
        len: u64,
    ) -> std::io::Result<u64> {
        let mut reader = reader.take(len);
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            self.update(&buf[..n]);
            total += n as u64;
        }
    }

    /// The lowercase hex digest, or None when verification is disabled.
    pub(crate) fn finalize(self) -> Option<String> {
        match self.0 {
            State::Md5(h) => Some(format!("{:x}", h.finalize())),
            State::Sha1(h) => Some(format!("{:x}", h.finalize())),
            State::Sha256(h) => Some(format!("{:x}", h.finalize())),
            State::Skip => None,
        }
    }

    /// Compare the digest to the expected hex value, ignoring case.
    pub(crate) fn verify(self, expected: &str) -> Result<()> {
        match self.finalize() {
            Some(actual) if !actual.eq_ignore_ascii_case(expected) => {
                Err(DownloadError::ChecksumMismatch {
                    expected: expected.to_owned(),
                    actual,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Wrapper for an AsyncWrite that will also feed a verifier with every chunk written
pub(crate) struct HashingAsyncWrite<AW: AsyncWrite + Unpin> {
    inner: AW,
    verifier: Verifier,
}

impl<AW: AsyncWrite + Unpin> HashingAsyncWrite<AW> {
    pub(crate) fn new(inner: AW, verifier: Verifier) -> Self {
        Self { inner, verifier }
    }

    pub(crate) fn into_parts(self) -> (AW, Verifier) {
        (self.inner, self.verifier)
    }
}

impl<AW: AsyncWrite + Unpin> AsyncWrite for HashingAsyncWrite<AW> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(size)) = res {
            // only the bytes successfully written are hashed
            self.verifier.update(&buf[..size]);
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
