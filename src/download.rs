use crate::artifact::{Artifact, HashAlgorithm};
use crate::copy::{copy_chunks, CopyParams};
use crate::error::{DownloadError, ErrorKind, Result};
use crate::hashing::{HashingAsyncWrite, Verifier};
use crate::options::DownloadOptions;
use crate::partial::{PartialFile, Prepared};
use crate::retry::{self, Attempt};
use crate::transport::{LazyHttpTransport, LocalTransport, Transport};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use slog::{debug, info, o, warn, Logger};
use std::path::Path;
use tokio::fs::{self, File};
use tokio_util::sync::CancellationToken;

/// A progress callback, called with the number of bytes in the partial file after each chunk.
pub type Progress<'a> = &'a mut (dyn FnMut(u64) + Send);

/// Download an artifact to `target`, resuming any partial file left by an earlier call and
/// verifying the result against the artifact's checksum.
///
/// If `artifact.local` is set, the artifact's link is a local path to copy from; otherwise it
/// is fetched over HTTP(S).  Attempts are retried according to `options`; cancelling `cancel`
/// stops the download promptly, leaving the partial file in place for a later call.
///
/// On success, `target` holds exactly the artifact's content.  On failure, `target` does not
/// exist.
pub async fn download_artifact(
    target: &Path,
    artifact: &Artifact,
    options: &DownloadOptions,
    progress: Option<Progress<'_>>,
    cancel: &CancellationToken,
) -> Result<()> {
    // fail fast on bad metadata, before any client is built
    artifact.validate()?;
    if artifact.local {
        download_with_transport(target, artifact, options, progress, cancel, &LocalTransport)
            .await
    } else {
        let transport = LazyHttpTransport::new(options);
        download_with_transport(target, artifact, options, progress, cancel, &transport).await
    }
}

/// Download an artifact using the given [`Transport`].  This is useful for advanced cases where
/// neither the HTTP nor the local transport is adequate.
pub async fn download_with_transport<T: Transport>(
    target: &Path,
    artifact: &Artifact,
    options: &DownloadOptions,
    progress: Option<Progress<'_>>,
    cancel: &CancellationToken,
    transport: &T,
) -> Result<()> {
    let algorithm = artifact.validate()?;
    let partial = PartialFile::for_target(target, artifact.size)?;
    let logger = options.logger.new(o!(
        "artifact" => artifact.file_name.clone(),
        "target" => target.display().to_string(),
    ));

    if target_is_complete(target, artifact, algorithm).await? {
        info!(logger, "target already holds a verified copy");
        return Ok(());
    }

    let mut ignore = |_: u64| {};
    let progress: &mut (dyn FnMut(u64) + Send) = match progress {
        Some(progress) => progress,
        None => &mut ignore,
    };

    let mut attempt = TransferAttempt {
        target,
        artifact,
        algorithm,
        partial,
        transport,
        options,
        progress,
        cancel,
        logger: logger.clone(),
    };
    let result = retry::run(&options.retry, cancel, &logger, &mut attempt).await;
    match &result {
        Ok(()) => info!(logger, "download complete"; "bytes" => artifact.size),
        Err(err) if err.kind() == ErrorKind::Cancelled => info!(logger, "download cancelled"),
        Err(err) => {
            warn!(logger, "download failed"; "error" => %err);
            // a fatal failure before any byte arrived leaves nothing worth resuming
            if err.kind() != ErrorKind::RetriesExhausted {
                if let Err(e) = attempt.partial.remove_if_empty().await {
                    warn!(logger, "could not remove empty partial file"; "error" => %e);
                }
            }
        }
    }
    result
}

/// Check whether the target already holds the artifact.  A target that does not verify is
/// removed, so that it is never mistaken for a completed download.
async fn target_is_complete(
    target: &Path,
    artifact: &Artifact,
    algorithm: HashAlgorithm,
) -> Result<bool> {
    let metadata = match fs::metadata(target).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(DownloadError::storage(
                anyhow::Error::new(e).context(format!("while checking {}", target.display())),
            ))
        }
    };

    if metadata.is_file() && metadata.len() == artifact.size {
        let file = File::open(target)
            .await
            .with_context(|| format!("while opening {}", target.display()))
            .map_err(DownloadError::storage)?;
        let mut verifier = Verifier::new(algorithm);
        verifier
            .update_from(file, artifact.size)
            .await
            .with_context(|| format!("while reading {}", target.display()))
            .map_err(DownloadError::storage)?;
        if verifier.verify(&artifact.hash_value).is_ok() {
            return Ok(true);
        }
    }

    fs::remove_file(target)
        .await
        .with_context(|| format!("while removing stale {}", target.display()))
        .map_err(DownloadError::storage)?;
    Ok(false)
}

/// One attempt at transferring an artifact: prepare the partial file, open the transport at
/// the resume offset, copy, verify, and promote.
struct TransferAttempt<'a, T: Transport> {
    target: &'a Path,
    artifact: &'a Artifact,
    algorithm: HashAlgorithm,
    partial: PartialFile,
    transport: &'a T,
    options: &'a DownloadOptions,
    progress: &'a mut (dyn FnMut(u64) + Send),
    cancel: &'a CancellationToken,
    logger: Logger,
}

#[async_trait]
impl<'a, T: Transport> Attempt for TransferAttempt<'a, T> {
    async fn attempt(&mut self) -> Result<()> {
        let size = self.artifact.size;
        let Prepared {
            mut offset,
            truncated,
            mut file,
        } = self.partial.prepare().await?;
        if truncated {
            warn!(self.logger, "partial file is larger than the artifact; starting over";
                "path" => %self.partial.path().display());
        }

        if offset == size {
            // everything is already on disk; only verification remains
            debug!(self.logger, "partial file is complete"; "offset" => offset);
            let mut verifier = Verifier::new(self.algorithm);
            self.partial.hash_prefix(&mut verifier, offset).await?;
            return finish(
                &self.partial,
                self.target,
                &self.artifact.hash_value,
                &self.logger,
                file,
                verifier,
            )
            .await;
        }

        debug!(self.logger, "opening artifact";
            "link" => &self.artifact.link, "offset" => offset);
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            opened = self.transport.open(&self.artifact.link, offset) => opened?,
        };

        if !opened.resumed && offset > 0 {
            info!(self.logger, "source does not support resuming; starting over";
                "offset" => offset);
            self.partial.truncate(&mut file).await?;
            offset = 0;
        }

        if let Some(len) = opened.content_length {
            if offset + len > size {
                drop(file);
                self.partial.reset().await?;
                return Err(DownloadError::Oversize { expected: size });
            }
        }

        let mut verifier = Verifier::new(self.algorithm);
        self.partial.hash_prefix(&mut verifier, offset).await?;

        let mut body = opened.body;
        let mut writer = HashingAsyncWrite::new(file, verifier);
        let params = CopyParams {
            start: offset,
            limit: size,
            chunk_size: self.options.chunk_size,
            read_timeout: self.options.read_timeout,
            cancel: self.cancel,
        };
        let copied = copy_chunks(&mut body, &mut writer, params, &mut *self.progress).await;
        let (file, verifier) = writer.into_parts();
        let copied = match copied {
            Ok(copied) => copied,
            Err(err @ DownloadError::Oversize { .. }) => {
                drop(file);
                self.partial.reset().await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let total = offset + copied;
        if total < size {
            return Err(DownloadError::transport(anyhow!(
                "{} ended after {} of {} bytes",
                self.artifact.link,
                total,
                size
            )));
        }
        finish(
            &self.partial,
            self.target,
            &self.artifact.hash_value,
            &self.logger,
            file,
            verifier,
        )
        .await
    }
}

/// Verify the complete partial file and promote it to the target.  Content that does not
/// verify cannot be resumed from, so the partial file is discarded.
async fn finish(
    partial: &PartialFile,
    target: &Path,
    hash_value: &str,
    logger: &Logger,
    file: File,
    verifier: Verifier,
) -> Result<()> {
    if let Err(err) = verifier.verify(hash_value) {
        warn!(logger, "checksum mismatch; discarding partial file"; "error" => %err);
        drop(file);
        partial.reset().await?;
        return Err(err);
    }
    partial.promote(file, target).await
}
