use crate::config::{Dimension, Dimensions};
use crate::image_ops::operations;
use crate::queue::task::{ArtifactGenerator, ResizeTask};
use crate::store::naming::{ImageArtifact, resized_path};
use async_trait::async_trait;
use log::debug;
use rayon::prelude::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::task::spawn_blocking;

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to resize to {label}: {source}")]
    Resize {
        label: String,
        source: fast_image_resize::ResizeError,
    },
    #[error("failed to encode {label}: {source}")]
    Encode {
        label: String,
        source: image::ImageError,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("resize operation aborted: {0}")]
    Aborted(String),
}

/// Mode of published artifacts, temp files start out owner-only
#[cfg(unix)]
const PUBLISHED_MODE: u32 = 0o644;

/// Output written to a temp file next to its final location, not yet visible to readers
struct StagedFile {
    file: NamedTempFile,
    path: PathBuf,
}

fn stage(dir: &Path, path: PathBuf, data: &[u8]) -> Result<StagedFile, ResizeError> {
    let write_err = |source| ResizeError::Write {
        path: path.clone(),
        source,
    };
    let mut file = NamedTempFile::new_in(dir).map_err(write_err)?;
    file.write_all(data).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    make_readable(&file).map_err(write_err)?;

    Ok(StagedFile { file, path })
}

#[cfg(unix)]
fn make_readable(file: &NamedTempFile) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.as_file()
        .set_permissions(fs::Permissions::from_mode(PUBLISHED_MODE))
}

#[cfg(not(unix))]
fn make_readable(_file: &NamedTempFile) -> std::io::Result<()> {
    Ok(())
}

fn render_variant(
    source: &image::DynamicImage,
    dimension: &Dimension,
    quality: u8,
) -> Result<Vec<u8>, ResizeError> {
    let resized = operations::resize(source, dimension).map_err(|source| ResizeError::Resize {
        label: dimension.name.clone(),
        source,
    })?;
    operations::encode_jpeg(&resized, quality).map_err(|source| ResizeError::Encode {
        label: dimension.name.clone(),
        source,
    })
}

/// Writes the unscaled copy and one JPEG per dimension into `dest_dir/<owner>/`
///
/// Files are staged in the owner directory and renamed into place only once every output
/// was produced. If one of the renames fails, the outputs already renamed are removed again,
/// so a failed run leaves no final files for this receipt. Returns the final paths, the
/// unscaled copy first.
pub fn generate_resized_artifacts(
    artifact: &ImageArtifact,
    dest_dir: &Path,
    dimensions: &[Dimension],
    quality: u8,
) -> Result<Vec<PathBuf>, ResizeError> {
    let original = fs::read(&artifact.path).map_err(|source| ResizeError::Read {
        path: artifact.path.clone(),
        source,
    })?;

    let owner_dir = dest_dir.join(&artifact.owner);
    fs::create_dir_all(&owner_dir).map_err(|source| ResizeError::Write {
        path: owner_dir.clone(),
        source,
    })?;

    let mut staged = Vec::with_capacity(dimensions.len() + 1);
    staged.push(stage(
        &owner_dir,
        resized_path(artifact, &owner_dir, ""),
        &original,
    )?);

    let decoded = image::load_from_memory(&original).map_err(|source| ResizeError::Decode {
        path: artifact.path.clone(),
        source,
    })?;

    let variants = dimensions
        .par_iter()
        .map(|dimension| render_variant(&decoded, dimension, quality))
        .collect::<Result<Vec<_>, _>>()?;

    for (dimension, data) in dimensions.iter().zip(variants) {
        staged.push(stage(
            &owner_dir,
            resized_path(artifact, &owner_dir, &dimension.name),
            &data,
        )?);
    }

    let mut written = Vec::with_capacity(staged.len());
    for StagedFile { file, path } in staged {
        if let Err(err) = file.persist(&path) {
            for published in &written {
                let _ = fs::remove_file(published);
            }
            return Err(ResizeError::Write {
                path,
                source: err.error,
            });
        }
        written.push(path);
    }

    Ok(written)
}

/// Resize operation used by the worker pool, runs the CPU work on the blocking pool
pub struct JpegVariantGenerator {
    dimensions: Arc<Dimensions>,
    quality: u8,
}

impl JpegVariantGenerator {
    pub fn new(dimensions: Dimensions, quality: u8) -> Self {
        JpegVariantGenerator {
            dimensions: Arc::new(dimensions),
            quality,
        }
    }
}

#[async_trait]
impl ArtifactGenerator for JpegVariantGenerator {
    async fn generate(&self, task: &ResizeTask) -> Result<(), ResizeError> {
        let artifact = task.artifact.clone();
        let dest_dir = task.dest_dir.clone();
        let dimensions = self.dimensions.clone();
        let quality = self.quality;

        let start = Instant::now();
        let written = spawn_blocking(move || {
            generate_resized_artifacts(&artifact, &dest_dir, dimensions.as_slice(), quality)
        })
        .await
        .map_err(|err| ResizeError::Aborted(err.to_string()))??;

        debug!(
            "Generated {} artifacts for {} in {:?}",
            written.len(),
            task.artifact.receipt_id,
            start.elapsed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::naming::parse_upload_path;
    use crate::utils::test_utils::write_test_jpeg;
    use image::GenericImageView;
    use tempfile::tempdir;

    fn upload(dir: &Path, name: &str, width: u32, height: u32) -> (ImageArtifact, Vec<u8>) {
        let path = dir.join(name);
        let bytes = write_test_jpeg(&path, width, height);
        (parse_upload_path(&path).unwrap(), bytes)
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn writes_copy_and_one_file_per_dimension() {
        let root = tempdir().unwrap();
        let (artifact, original) = upload(&root.path().join("uploads"), "user1#abc123.jpg", 80, 120);
        let dest = root.path().join("resized");
        let dimensions: Dimensions = "small=0x12,medium=0x60,exact=30x20,wide=40x0"
            .parse()
            .unwrap();

        let written =
            generate_resized_artifacts(&artifact, &dest, dimensions.as_slice(), 80).unwrap();

        assert_eq!(written.len(), dimensions.as_slice().len() + 1);
        assert_eq!(
            files_in(&dest.join("user1")),
            [
                "abc123.jpg",
                "abc123_exact.jpg",
                "abc123_medium.jpg",
                "abc123_small.jpg",
                "abc123_wide.jpg",
            ]
        );

        let copy = fs::read(dest.join("user1").join("abc123.jpg")).unwrap();
        assert_eq!(copy, original);

        for (label, expected) in [
            ("small", (8, 12)),
            ("medium", (40, 60)),
            ("exact", (30, 20)),
            ("wide", (40, 60)),
        ] {
            let img = image::open(dest.join("user1").join(format!("abc123_{label}.jpg"))).unwrap();
            assert_eq!(img.dimensions(), expected, "{label}");
        }
    }

    #[test]
    fn missing_source_writes_nothing() {
        let root = tempdir().unwrap();
        let artifact = parse_upload_path(&root.path().join("user1#missing.jpg")).unwrap();
        let dest = root.path().join("resized");

        let result = generate_resized_artifacts(
            &artifact,
            &dest,
            Dimensions::default().as_slice(),
            75,
        );

        assert!(matches!(result, Err(ResizeError::Read { .. })));
        assert!(!dest.exists());
    }

    #[test]
    fn undecodable_source_leaves_no_files() {
        let root = tempdir().unwrap();
        let path = root.path().join("user1#broken.jpg");
        fs::write(&path, b"this is not an image").unwrap();
        let artifact = parse_upload_path(&path).unwrap();
        let dest = root.path().join("resized");

        let result = generate_resized_artifacts(
            &artifact,
            &dest,
            Dimensions::default().as_slice(),
            75,
        );

        assert!(matches!(result, Err(ResizeError::Decode { .. })));
        assert!(files_in(&dest.join("user1")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn published_files_are_readable_by_others() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempdir().unwrap();
        let (artifact, _) = upload(root.path(), "u#abc.jpg", 40, 40);
        let dest = root.path().join("resized");

        let written = generate_resized_artifacts(
            &artifact,
            &dest,
            Dimensions::default().as_slice(),
            75,
        )
        .unwrap();

        assert_eq!(written.len(), 4);
        for path in written {
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, PUBLISHED_MODE, "{}", path.display());
        }
    }

    #[test]
    fn failed_rename_takes_back_published_files() {
        let root = tempdir().unwrap();
        let (artifact, _) = upload(&root.path().join("uploads"), "user1#abc123.jpg", 40, 40);
        let dest = root.path().join("resized");
        let owner_dir = dest.join("user1");
        // a directory where the variant should land makes its rename fail
        fs::create_dir_all(owner_dir.join("abc123_small.jpg").join("blocker")).unwrap();
        let dimensions: Dimensions = "small=0x10".parse().unwrap();

        let result = generate_resized_artifacts(&artifact, &dest, dimensions.as_slice(), 75);

        assert!(matches!(result, Err(ResizeError::Write { .. })));
        assert_eq!(files_in(&owner_dir), ["abc123_small.jpg"]);
    }

    #[test]
    fn rerun_overwrites_with_same_content() {
        let root = tempdir().unwrap();
        let (artifact, _) = upload(root.path(), "user1#again.jpg", 40, 40);
        let dest = root.path().join("resized");
        let dimensions: Dimensions = "small=0x10".parse().unwrap();

        let first = generate_resized_artifacts(&artifact, &dest, dimensions.as_slice(), 75).unwrap();
        let before = fs::read(&first[1]).unwrap();
        let second =
            generate_resized_artifacts(&artifact, &dest, dimensions.as_slice(), 75).unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read(&second[1]).unwrap(), before);
        assert_eq!(files_in(&dest.join("user1")).len(), 2);
    }

    #[tokio::test]
    async fn generator_runs_on_blocking_pool() {
        let root = tempdir().unwrap();
        let (artifact, _) = upload(root.path(), "user2#gen.jpg", 60, 90);
        let dest = root.path().join("resized");
        let generator = JpegVariantGenerator::new("small=0x30".parse().unwrap(), 75);

        generator
            .generate(&ResizeTask::new(artifact, dest.clone()))
            .await
            .unwrap();

        let small = image::open(dest.join("user2").join("gen_small.jpg")).unwrap();
        assert_eq!(small.dimensions(), (20, 30));
    }
}
