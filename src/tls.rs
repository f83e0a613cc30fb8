//! Server-certificate trust configuration for HTTPS downloads.
use crate::error::{DownloadError, Result};
use anyhow::{anyhow, Context};
use reqwest::Certificate;
use std::error::Error as StdError;
use std::path::Path;

/// Load every PEM certificate in the trust anchor file.  A file that cannot be read or that
/// contains no certificates is a trust failure, since no server could be verified with it.
pub(crate) async fn load_trust_anchor(path: &Path) -> Result<Vec<Certificate>> {
    let pem = tokio::fs::read(path)
        .await
        .with_context(|| format!("while reading trust anchor {}", path.display()))
        .map_err(DownloadError::TlsTrust)?;
    let certs = Certificate::from_pem_bundle(&pem)
        .with_context(|| format!("while parsing trust anchor {}", path.display()))
        .map_err(DownloadError::TlsTrust)?;
    if certs.is_empty() {
        return Err(DownloadError::TlsTrust(anyhow!(
            "trust anchor {} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}

/// Configure the trust store of a client builder.  With a trust anchor, the anchor's
/// certificates replace the built-in roots entirely; without one, the platform roots are used.
pub(crate) fn configure_trust(
    builder: reqwest::ClientBuilder,
    anchors: Option<Vec<Certificate>>,
) -> reqwest::ClientBuilder {
    match anchors {
        None => builder.tls_built_in_root_certs(true),
        Some(anchors) => anchors
            .into_iter()
            .fold(builder.tls_built_in_root_certs(false), |b, cert| {
                b.add_root_certificate(cert)
            }),
    }
}

/// Find a rustls error in an error's chain of sources.
fn find_rustls_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a rustls::Error> {
    let mut next = Some(err);
    while let Some(err) = next {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            return Some(tls);
        }
        // io::Error hides a custom inner error from `source()`, so look at it directly
        if let Some(inner) = err
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
        {
            if let Some(tls) = find_rustls_error(inner) {
                return Some(tls);
            }
        }
        next = err.source();
    }
    None
}

/// Determine whether an error, or anything in its chain of sources, is a failure to verify the
/// server's certificate (expired, untrusted issuer, wrong host name).
pub(crate) fn is_certificate_error(err: &(dyn StdError + 'static)) -> bool {
    matches!(
        find_rustls_error(err),
        Some(
            rustls::Error::InvalidCertificate(_)
                | rustls::Error::NoCertificatesPresented
                | rustls::Error::UnsupportedNameType
        )
    )
}

/// Determine whether a failure to build a client came from the TLS configuration, such as a
/// trust anchor certificate that rustls rejects.
pub(crate) fn is_tls_config_error(err: &(dyn StdError + 'static)) -> bool {
    find_rustls_error(err).is_some()
}
