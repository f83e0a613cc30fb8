use crate::error::{DownloadError, Result};
use crate::hashing::Verifier;
use anyhow::Context;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Prefix given to the base name of a target file to form the name of its partial file.
pub const PARTIAL_PREFIX: &str = "_temporary-";

/// Return the path of the partial file for the given target: the same directory, with the
/// base name prefixed by [`PARTIAL_PREFIX`].
pub fn partial_path(target: &Path) -> Result<PathBuf> {
    let name = target.file_name().ok_or_else(|| {
        DownloadError::InvalidMetadata(format!("target {} has no file name", target.display()))
    })?;
    let mut partial_name = std::ffi::OsString::from(PARTIAL_PREFIX);
    partial_name.push(name);
    Ok(target.with_file_name(partial_name))
}

/// The on-disk state of a transfer in progress.  The partial file is kept between attempts
/// (and between calls) so that a later attempt can resume where an earlier one stopped.
#[derive(Debug)]
pub(crate) struct PartialFile {
    path: PathBuf,
    expected_size: u64,
}

/// The result of [`PartialFile::prepare`].
pub(crate) struct Prepared {
    /// Offset at which the transfer resumes; also the number of bytes already on disk.
    pub(crate) offset: u64,
    /// True if an existing partial file was larger than the expected size and was truncated.
    pub(crate) truncated: bool,
    /// The partial file, opened for appending.
    pub(crate) file: File,
}

impl PartialFile {
    pub(crate) fn for_target(target: &Path, expected_size: u64) -> Result<Self> {
        Ok(Self {
            path: partial_path(target)?,
            expected_size,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Open the partial file, creating it if necessary, and determine the resume offset.  A
    /// file larger than the expected size cannot be a prefix of the artifact, so it is truncated
    /// and the transfer starts over.
    pub(crate) async fn prepare(&self) -> Result<Prepared> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("while opening {}", self.path.display()))
            .map_err(DownloadError::storage)?;
        let size = file
            .metadata()
            .await
            .with_context(|| format!("while reading metadata of {}", self.path.display()))
            .map_err(DownloadError::storage)?
            .len();

        if size > self.expected_size {
            file.set_len(0)
                .await
                .with_context(|| format!("while truncating {}", self.path.display()))
                .map_err(DownloadError::storage)?;
            return Ok(Prepared {
                offset: 0,
                truncated: true,
                file,
            });
        }

        Ok(Prepared {
            offset: size,
            truncated: false,
            file,
        })
    }

    /// Feed the first `len` bytes already on disk into the verifier, so that the digest covers
    /// the resumed prefix as well as the bytes still to come.
    pub(crate) async fn hash_prefix(&self, verifier: &mut Verifier, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("while opening {}", self.path.display()))
            .map_err(DownloadError::storage)?;
        let read = verifier
            .update_from(file, len)
            .await
            .with_context(|| format!("while reading {}", self.path.display()))
            .map_err(DownloadError::storage)?;
        if read != len {
            return Err(DownloadError::storage(anyhow::anyhow!(
                "{} shrank while being read",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Discard all bytes in an open partial file, so that writing starts again at offset zero.
    pub(crate) async fn truncate(&self, file: &mut File) -> Result<()> {
        file.set_len(0)
            .await
            .with_context(|| format!("while truncating {}", self.path.display()))
            .map_err(DownloadError::storage)
    }

    /// Remove the partial file, if it exists.
    pub(crate) async fn reset(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::storage(anyhow::Error::new(e).context(format!(
                "while removing {}",
                self.path.display()
            )))),
        }
    }

    /// Remove the partial file if it holds no bytes.  Returns true if it was removed.
    pub(crate) async fn remove_if_empty(&self) -> Result<bool> {
        match fs::metadata(&self.path).await {
            Ok(metadata) if metadata.len() == 0 => {
                self.reset().await?;
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DownloadError::storage(anyhow::Error::new(e).context(format!(
                "while reading metadata of {}",
                self.path.display()
            )))),
        }
    }

    /// Make the verified partial file visible at the target path.  The data is synced before
    /// the rename, so the target never appears with incomplete content.
    pub(crate) async fn promote(&self, mut file: File, target: &Path) -> Result<()> {
        let synced = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        synced
            .with_context(|| format!("while syncing {}", self.path.display()))
            .map_err(DownloadError::storage)?;
        drop(file);
        fs::rename(&self.path, target)
            .await
            .with_context(|| {
                format!(
                    "while renaming {} to {}",
                    self.path.display(),
                    target.display()
                )
            })
            .map_err(DownloadError::storage)
    }
}
