use crate::error::{DownloadError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Description of an artifact to download, as supplied by the management server.  The
/// descriptor is not modified by a download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Artifact {
    /// Logical name of the artifact
    pub file_name: String,

    /// Expected size of the completed file, in bytes
    pub size: u64,

    /// URL of the artifact, or a filesystem path if `local` is set
    pub link: String,

    /// Name of the hash algorithm: one of `MD5`, `SHA1`, `SHA256`, or `NONE`
    pub hash_type: String,

    /// Expected digest, hex-encoded
    pub hash_value: String,

    /// If true, `link` is a local path to copy from rather than a URL
    pub local: bool,
}

/// A supported checksum algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    /// Integrity checking is explicitly disabled.
    None,
}

impl HashAlgorithm {
    /// Length of the hex-encoded digest, or None if there is no digest.
    pub fn hex_len(self) -> Option<usize> {
        match self {
            HashAlgorithm::Md5 => Some(32),
            HashAlgorithm::Sha1 => Some(40),
            HashAlgorithm::Sha256 => Some(64),
            HashAlgorithm::None => None,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MD5" => Ok(HashAlgorithm::Md5),
            "SHA1" => Ok(HashAlgorithm::Sha1),
            "SHA256" => Ok(HashAlgorithm::Sha256),
            "NONE" => Ok(HashAlgorithm::None),
            _ => Err(DownloadError::InvalidMetadata(format!(
                "unsupported hash type {:?}",
                s
            ))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::None => "NONE",
        };
        f.write_str(name)
    }
}

impl Artifact {
    /// Check the descriptor before any transfer work, returning the parsed hash algorithm.
    pub fn validate(&self) -> Result<HashAlgorithm> {
        if self.link.is_empty() {
            return Err(DownloadError::InvalidMetadata(format!(
                "artifact {:?} has no link",
                self.file_name
            )));
        }

        let algorithm: HashAlgorithm = self.hash_type.parse()?;
        if let Some(expected_len) = algorithm.hex_len() {
            if self.hash_value.is_empty() {
                return Err(DownloadError::InvalidMetadata(format!(
                    "artifact {:?} has no {} checksum",
                    self.file_name, algorithm
                )));
            }
            if self.hash_value.len() != expected_len || hex::decode(&self.hash_value).is_err() {
                return Err(DownloadError::InvalidMetadata(format!(
                    "artifact {:?} checksum {:?} is not a valid {} digest",
                    self.file_name, self.hash_value, algorithm
                )));
            }
        }
        Ok(algorithm)
    }
}
