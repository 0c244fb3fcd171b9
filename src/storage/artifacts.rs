//! Storage for the raw CSR and certificate files of each issuance.

use crate::error::StorageError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// What an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Csr,
    Certificate,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Csr => "csr",
            ArtifactKind::Certificate => "crt",
        }
    }
}

/// Reference to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub kind: ArtifactKind,
    pub file_name: String,
}

/// Where CSRs and certificates are kept.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` as `<stem>.<ext>`. Never overwrites.
    async fn put(
        &self,
        kind: ArtifactKind,
        stem: &str,
        bytes: &[u8],
    ) -> Result<ArtifactHandle, StorageError>;

    async fn get(&self, handle: &ArtifactHandle) -> Result<Vec<u8>, StorageError>;

    /// Remove an artifact. Removing one that is already gone succeeds.
    async fn delete(&self, handle: &ArtifactHandle) -> Result<(), StorageError>;
}

/// Artifacts as files under two directories.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    csr_dir: PathBuf,
    cert_dir: PathBuf,
}

impl FsArtifactStore {
    /// Create the directories if needed.
    pub fn open(csr_dir: &Path, cert_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(csr_dir)?;
        std::fs::create_dir_all(cert_dir)?;

        Ok(Self {
            csr_dir: csr_dir.to_path_buf(),
            cert_dir: cert_dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, handle: &ArtifactHandle) -> PathBuf {
        let dir = match handle.kind {
            ArtifactKind::Csr => &self.csr_dir,
            ArtifactKind::Certificate => &self.cert_dir,
        };
        dir.join(&handle.file_name)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        kind: ArtifactKind,
        stem: &str,
        bytes: &[u8],
    ) -> Result<ArtifactHandle, StorageError> {
        check_stem(stem)?;

        let handle = ArtifactHandle {
            kind,
            file_name: format!("{}.{}", stem, kind.extension()),
        };
        let path = self.path_for(&handle);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;

        Ok(handle)
    }

    async fn get(&self, handle: &ArtifactHandle) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.path_for(handle)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(handle.file_name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, handle: &ArtifactHandle) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(handle)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn check_stem(stem: &str) -> Result<(), StorageError> {
    let valid = !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StorageError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("Invalid artifact name '{}'", stem),
        )))
    }
}
