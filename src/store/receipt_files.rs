use crate::store::naming::{ImageArtifact, NamingError, derive_upload_path, download_path};
use crate::utils::types::SizeLabel;
use log::{debug, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error("{0} does not exist")]
    NotFound(PathBuf),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::NotFound {
            StoreError::NotFound(path.to_path_buf())
        } else {
            StoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

pub struct StoredImage {
    pub artifact: ImageArtifact,
    pub data: Vec<u8>,
    pub modified: Option<SystemTime>,
}

/// Filesystem side of the handlers: originals go in, resized variants come out.
/// Holds no state beyond the two roots, readers never coordinate with resize workers
#[derive(Debug, Clone)]
pub struct ReceiptFiles {
    uploads_dir: PathBuf,
    resized_dir: PathBuf,
}

impl ReceiptFiles {
    pub fn new(uploads_dir: impl Into<PathBuf>, resized_dir: impl Into<PathBuf>) -> Self {
        ReceiptFiles {
            uploads_dir: uploads_dir.into(),
            resized_dir: resized_dir.into(),
        }
    }

    pub fn resized_dir(&self) -> &Path {
        &self.resized_dir
    }

    pub async fn create_dirs(&self) -> Result<(), StoreError> {
        for dir in [&self.uploads_dir, &self.resized_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|err| StoreError::io(dir, err))?;
        }
        Ok(())
    }

    /// Writes an original under a freshly generated receipt id
    pub async fn store_original(
        &self,
        owner: &str,
        extension: &str,
        data: &[u8],
    ) -> Result<ImageArtifact, StoreError> {
        let artifact = derive_upload_path(owner, extension, &self.uploads_dir)?;
        tokio::fs::write(&artifact.path, data)
            .await
            .map_err(|err| StoreError::io(&artifact.path, err))?;
        debug!("Stored original {}", artifact.path.display());

        Ok(artifact)
    }

    /// Drops an original nobody is going to resize
    pub async fn discard_original(&self, artifact: &ImageArtifact) {
        if let Err(err) = tokio::fs::remove_file(&artifact.path).await {
            warn!("Can't remove {}: {}", artifact.path.display(), err);
        }
    }

    /// Reads whatever the workers published so far, `NotFound` until then
    pub async fn load_variant(
        &self,
        receipt_id: &str,
        label: &SizeLabel,
        owner: &str,
    ) -> Result<StoredImage, StoreError> {
        let artifact = download_path(receipt_id, label, owner, &self.resized_dir);
        let data = tokio::fs::read(&artifact.path)
            .await
            .map_err(|err| StoreError::io(&artifact.path, err))?;
        let modified = tokio::fs::metadata(&artifact.path)
            .await
            .and_then(|meta| meta.modified())
            .ok();

        Ok(StoredImage {
            artifact,
            data,
            modified,
        })
    }
}
