//! Mapping between (owner, receipt id, size label) and artifact paths.
//!
//! Nothing here touches the filesystem: uploads, resize workers and downloads all agree on
//! locations only through these functions.

use crate::image_ops::image_types::Extensions;
use crate::utils::types::{Owner, ReceiptId, SizeLabel};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Separates owner and receipt id in upload file names
pub const OWNER_DELIMITER: char = '#';

/// Separates receipt id and size label in resized file names
pub const SIZE_DELIMITER: char = '_';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("malformed artifact name: {0}")]
    MalformedName(String),
    #[error("owner {0:?} is empty or contains a reserved character")]
    InvalidOwner(String),
    #[error("extension {0:?} is empty or contains a reserved character")]
    InvalidExtension(String),
}

/// Location and identity of one concrete file, original or resized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub file_name: String,
    /// Without the leading dot
    pub extension: String,
    pub owner: Owner,
    pub receipt_id: ReceiptId,
}

fn is_valid_part(part: &str) -> bool {
    !part.is_empty()
        && !part.contains(OWNER_DELIMITER)
        && !part.contains(std::path::is_separator)
}

/// Allocates a new receipt id for `owner` and places the original upload in `upload_dir`
///
/// Owners or extensions that would make the name unparsable are rejected rather than
/// producing a file that [`parse_upload_path`] can't read back.
pub fn derive_upload_path(
    owner: &str,
    extension: &str,
    upload_dir: &Path,
) -> Result<ImageArtifact, NamingError> {
    if !is_valid_part(owner) {
        return Err(NamingError::InvalidOwner(owner.to_string()));
    }
    let extension = extension.trim_start_matches('.');
    if !is_valid_part(extension) || extension.contains('.') {
        return Err(NamingError::InvalidExtension(extension.to_string()));
    }

    let receipt_id = Uuid::new_v4().simple().to_string();
    let file_name = format!("{owner}{OWNER_DELIMITER}{receipt_id}.{extension}");

    parse_upload_path(&upload_dir.join(file_name))
}

/// Inverse of [`derive_upload_path`], fails closed on anything it could not have produced
pub fn parse_upload_path(full_path: &Path) -> Result<ImageArtifact, NamingError> {
    let malformed = || NamingError::MalformedName(full_path.display().to_string());

    let file_name = full_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(malformed)?;
    let extension = full_path
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .ok_or_else(malformed)?;
    let stem = file_name
        .strip_suffix(extension)
        .and_then(|rest| rest.strip_suffix('.'))
        .ok_or_else(malformed)?;

    let tokens: Vec<&str> = stem.split(OWNER_DELIMITER).collect();
    let [owner, receipt_id] = tokens.as_slice() else {
        return Err(malformed());
    };
    if owner.is_empty() || receipt_id.is_empty() {
        return Err(malformed());
    }

    Ok(ImageArtifact {
        path: full_path.to_path_buf(),
        dir: full_path.parent().map(Path::to_path_buf).unwrap_or_default(),
        file_name: file_name.to_string(),
        extension: extension.to_string(),
        owner: owner.to_string(),
        receipt_id: receipt_id.to_string(),
    })
}

fn resized_file_name(receipt_id: &str, label: &SizeLabel, extension: &str) -> String {
    if label.is_empty() {
        format!("{receipt_id}.{extension}")
    } else {
        format!("{receipt_id}{SIZE_DELIMITER}{label}.{extension}")
    }
}

/// Where the resize of `artifact` to `label` lands inside `dest_dir`
pub fn resized_path(artifact: &ImageArtifact, dest_dir: &Path, label: &SizeLabel) -> PathBuf {
    dest_dir.join(resized_file_name(
        &artifact.receipt_id,
        label,
        &artifact.extension,
    ))
}

/// Rebuilds the path a resize worker writes to, from request data only
pub fn download_path(
    receipt_id: &str,
    label: &SizeLabel,
    owner: &str,
    src_dir: &Path,
) -> ImageArtifact {
    let extension = Extensions::Jpeg.name();
    let file_name = resized_file_name(receipt_id, label, extension);
    let dir = src_dir.join(owner);

    ImageArtifact {
        path: dir.join(&file_name),
        dir,
        file_name,
        extension: extension.to_string(),
        owner: owner.to_string(),
        receipt_id: receipt_id.to_string(),
    }
}
