use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::OnnxBackendError;

/// On-disk file pinned to a recorded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtefact {
    pub path: PathBuf,
    /// Expected digest as hexadecimal; case and surrounding whitespace are
    /// ignored.
    pub sha256: String,
}

impl ModelArtefact {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, sha256: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sha256: sha256.into(),
        }
    }

    /// Hashes the file and compares it with the recorded digest.
    ///
    /// # Errors
    ///
    /// Returns [`OnnxBackendError::ChecksumMismatch`] when the digests differ
    /// and [`OnnxBackendError::Io`] when the file cannot be read.
    pub fn verify(&self) -> Result<(), OnnxBackendError> {
        let expected = self.sha256.trim().to_ascii_lowercase();
        let actual = compute_sha256(&self.path)?;
        if actual != expected {
            return Err(OnnxBackendError::ChecksumMismatch {
                path: self.path.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// Lowercase hexadecimal SHA-256 of the file at `path`.
///
/// # Errors
///
/// Returns [`OnnxBackendError::Io`] when the file cannot be opened or read.
pub fn compute_sha256(path: &Path) -> Result<String, OnnxBackendError> {
    let io_error = |source| OnnxBackendError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(io_error)?;
    Ok(format!("{:x}", hasher.finalize()))
}
