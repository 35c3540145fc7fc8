//! # Artifact Store
//!
//! Persists uploaded files (payment proofs) and hands back a stable
//! reference. The transaction engine never inspects artifact content; it
//! only records the [`ArtifactRef`].
//!
//! [`FsArtifactStore`] is content-addressed: the file name is the BLAKE3
//! digest of the bytes, so re-uploading the same proof yields the same
//! reference and never overwrites different content.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{ALLOWED_ARTIFACT_EXTENSIONS, ARTIFACT_URL_PREFIX, MAX_ARTIFACT_BYTES};

/// Errors returned by an [`ArtifactStore`].
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact is empty")]
    Empty,

    #[error("artifact too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("file type not allowed: {0:?}")]
    DisallowedExtension(String),

    #[error("artifact not found: {0}")]
    Missing(String),

    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtifactError {
    /// Whether the upload itself was unacceptable, as opposed to a store failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Missing(_))
    }
}

/// Stable reference to a stored artifact, e.g. `/uploads/<digest>.png`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The file name portion of the reference.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// MIME type implied by the extension. Unknown extensions are opaque bytes.
    pub fn content_type(&self) -> &'static str {
        let ext = self.file_name().rsplit_once('.').map(|(_, ext)| ext);
        match ext {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            Some("pdf") => "application/pdf",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persists opaque files and returns a stable reference.
pub trait ArtifactStore: Send + Sync {
    /// Stores `bytes`; `suggested_name` only contributes its extension.
    fn store(&self, bytes: &[u8], suggested_name: &str) -> Result<ArtifactRef, ArtifactError>;

    /// Reads back the bytes behind a reference this store handed out.
    fn load(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ArtifactError>;
}

/// Extracts and validates the lowercase extension of `name`.
pub fn checked_extension(name: &str) -> Result<String, ArtifactError> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or_else(|| ArtifactError::DisallowedExtension(name.to_string()))?;

    if ALLOWED_ARTIFACT_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(ArtifactError::DisallowedExtension(ext))
    }
}

// ---------------------------------------------------------------------------
// FsArtifactStore
// ---------------------------------------------------------------------------

/// Filesystem-backed, content-addressed artifact store.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, ArtifactError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolves a reference back to its on-disk path.
    pub fn path_of(&self, reference: &ArtifactRef) -> PathBuf {
        self.root.join(reference.file_name())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn store(&self, bytes: &[u8], suggested_name: &str) -> Result<ArtifactRef, ArtifactError> {
        if bytes.is_empty() {
            return Err(ArtifactError::Empty);
        }
        if bytes.len() > MAX_ARTIFACT_BYTES {
            return Err(ArtifactError::TooLarge {
                size: bytes.len(),
                limit: MAX_ARTIFACT_BYTES,
            });
        }
        let ext = checked_extension(suggested_name)?;

        let digest = blake3::hash(bytes).to_hex();
        let file_name = format!("{digest}.{ext}");
        let path = self.root.join(&file_name);

        if !path.exists() {
            // Write-then-rename so readers never observe a partial file.
            let tmp = self.root.join(format!(".{file_name}.tmp"));
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, &path)?;
        }

        tracing::debug!(file = %file_name, size = bytes.len(), "artifact stored");
        Ok(ArtifactRef::new(format!("{ARTIFACT_URL_PREFIX}/{file_name}")))
    }

    fn load(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        let name = reference.file_name();
        // Stored names are `<digest>.<ext>`; anything else never came from here.
        if name.is_empty() || name.starts_with('.') {
            return Err(ArtifactError::Missing(reference.to_string()));
        }
        match std::fs::read(self.path_of(reference)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::Missing(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
