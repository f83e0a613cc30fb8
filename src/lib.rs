/*! Resumable, verified downloads of update artifacts.

This crate fetches a single artifact (an update package, a firmware image, and so on) into a
target file, either over HTTP(S) or by copying from a local path.  The artifact's metadata comes
from elsewhere, typically a management server, in the form of an [`Artifact`].

A download follows these rules:

* All bytes land in a partial file next to the target, named by prefixing the target's file
  name with [`PARTIAL_PREFIX`].  The target only appears, by rename, once the full content has
  been verified against the artifact's checksum.
* A partial file left by an interrupted or cancelled download is resumed with a byte-range
  request.  If the server ignores the range, the partial file is discarded and the download
  starts over from the response it sent.
* Transient failures (connection errors, server errors, checksum mismatches) are retried
  according to a [`Retry`] configuration, with a fixed delay between attempts.  Checksum
  mismatches discard the partial file, since the corrupt bytes cannot be located.
* Certificate failures, missing artifacts, and oversized content are not retried.
* Cancelling the [`CancellationToken`] stops the download
  at the next chunk boundary, or during the delay between attempts, and always yields
  [`DownloadError::Cancelled`].

## Usage

The main entry point is [`download_artifact`]:

```no_run
# use anyhow::Result;
# use std::path::Path;
# use std::time::Duration;
use artifact_download::{download_artifact, Artifact, CancellationToken, DownloadOptions, Retry};
# async fn example() -> Result<()> {
let artifact = Artifact {
    file_name: "firmware.bin".into(),
    size: 65536,
    link: "https://updates.example.com/firmware.bin".into(),
    hash_type: "SHA256".into(),
    hash_value: "4b640d85ab3ba30fd02c9fc9db4a8928f416322ad27022ea58a65aaee68a4df2".into(),
    local: false,
};
let options = DownloadOptions::new()
    .retry(Retry::new(5, Duration::from_secs(2)))
    .trust_anchor("/etc/updates/ca.pem");
let mut progress = |bytes: u64| println!("{} bytes", bytes);
download_artifact(
    Path::new("/var/lib/updates/firmware.bin"),
    &artifact,
    &options,
    Some(&mut progress),
    &CancellationToken::new(),
).await?;
# Ok(())
# }
```

## Transports

Bytes come from a [`Transport`]: [`HttpTransport`] for remote artifacts and [`LocalTransport`]
for local ones.  [`download_with_transport`] accepts any other implementation, which is useful
for sources with special requirements and for injecting failures in tests.
 */
mod artifact;
mod copy;
mod download;
mod error;
mod hashing;
mod options;
mod partial;
mod retry;
mod tls;
mod transport;

#[cfg(test)]
mod test_helpers;

pub use artifact::{Artifact, HashAlgorithm};
pub use download::{download_artifact, download_with_transport, Progress};
pub use error::{DownloadError, ErrorKind, Result};
pub use options::DownloadOptions;
pub use partial::{partial_path, PARTIAL_PREFIX};
pub use retry::Retry;
pub use tokio_util::sync::CancellationToken;
pub use transport::{HttpTransport, LocalTransport, Opened, Transport};
