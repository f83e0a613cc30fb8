use crate::error::{DownloadError, Result};
use anyhow::{anyhow, Context};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Limits and signals for a single copy.
pub(crate) struct CopyParams<'a> {
    /// Bytes already present in the destination; progress is reported from here.
    pub(crate) start: u64,
    /// The destination may never hold more than this many bytes.
    pub(crate) limit: u64,
    pub(crate) chunk_size: usize,
    /// Longest wait for a single read.
    pub(crate) read_timeout: Duration,
    pub(crate) cancel: &'a CancellationToken,
}

/// Copy bytes from reader to writer a chunk at a time, calling `progress` with the cumulative
/// size of the destination after each chunk.  Cancellation is checked while waiting for data
/// and after every progress call.  Whatever was written is flushed before returning, even on
/// error, so that a later attempt can resume from it.  Returns the number of bytes copied.
pub(crate) async fn copy_chunks<R, W, P>(
    reader: &mut R,
    writer: &mut W,
    params: CopyParams<'_>,
    progress: &mut P,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    P: FnMut(u64) + Send + ?Sized,
{
    let mut total = params.start;
    let result = copy_loop(reader, writer, &params, progress, &mut total).await;
    let flushed = writer
        .flush()
        .await
        .context("while flushing partial file")
        .map_err(DownloadError::storage);
    result.and(flushed)?;
    Ok(total - params.start)
}

async fn copy_loop<R, W, P>(
    reader: &mut R,
    writer: &mut W,
    params: &CopyParams<'_>,
    progress: &mut P,
    total: &mut u64,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    P: FnMut(u64) + Send + ?Sized,
{
    let mut buf = vec![0u8; params.chunk_size];
    loop {
        let n = tokio::select! {
            biased;
            _ = params.cancel.cancelled() => return Err(DownloadError::Cancelled),
            read = tokio::time::timeout(params.read_timeout, reader.read(&mut buf)) => match read {
                Err(_) => {
                    return Err(DownloadError::transport(anyhow!(
                        "no data received for {:?}",
                        params.read_timeout
                    )))
                }
                Ok(Err(e)) => {
                    return Err(DownloadError::transport(
                        anyhow::Error::new(e).context("while reading artifact data"),
                    ))
                }
                Ok(Ok(n)) => n,
            },
        };
        if n == 0 {
            return Ok(());
        }

        if *total + n as u64 > params.limit {
            return Err(DownloadError::Oversize {
                expected: params.limit,
            });
        }
        writer
            .write_all(&buf[..n])
            .await
            .context("while writing partial file")
            .map_err(DownloadError::storage)?;
        *total += n as u64;

        progress(*total);
        // the callback itself may have requested cancellation
        if params.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
    }
}
