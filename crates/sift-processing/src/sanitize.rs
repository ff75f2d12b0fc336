//! Metadata stripping and post-strip structural checks.
//!
//! Stripping is best-effort: the pipeline logs a stripper error and carries on. What
//! is not optional is [`verify_structure`], which runs afterwards and decides whether
//! the artifact is still a well-formed file of its declared type.
//!
//! Strippers never touch the artifact itself. They hand back a [`StagedArtifact`]
//! and the caller decides whether to install it.

use async_trait::async_trait;
use sift_core::AllowedType;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::sniff;

const PDF_TRAILER_WINDOW: u64 = 1024;

/// Produces a metadata-free copy of an artifact.
#[async_trait]
pub trait MetadataStripper: Send + Sync {
    /// Strip all metadata the implementation understands into a staged copy of
    /// `path`. Returns `None` when there is nothing to remove. `path` is never
    /// modified.
    async fn strip_all(
        &self,
        path: &Path,
        cancel: CancellationToken,
    ) -> anyhow::Result<Option<StagedArtifact>>;
}

/// A rewritten artifact waiting to replace the original.
///
/// Dropping it deletes the staged file.
#[derive(Debug)]
pub struct StagedArtifact {
    path: tempfile::TempPath,
}

impl StagedArtifact {
    pub fn new(path: tempfile::TempPath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically rename the staged file over `target`.
    pub async fn persist(self, target: &Path) -> std::io::Result<()> {
        let target = target.to_path_buf();
        let staged = self.path;
        tokio::task::spawn_blocking(move || staged.persist(&target).map_err(|e| e.error))
            .await
            .map_err(std::io::Error::other)?
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    /// Leading bytes are not the declared type's signature
    #[error("signature does not match {declared}")]
    SignatureMismatch { declared: String },

    #[error("malformed {mime}: {detail}")]
    Malformed { mime: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check that the file at `path` is still a structurally valid `expected` file.
///
/// Images must have a decodable header; PDFs need their header and an `%%EOF`
/// trailer near the end of the file.
pub async fn verify_structure(expected: &AllowedType, path: &Path) -> Result<(), StructureError> {
    let head = sniff::read_head(path, expected.sniff_len()).await?;
    if !expected.matches(&head) {
        return Err(StructureError::SignatureMismatch {
            declared: expected.mime.to_string(),
        });
    }

    if expected.is_image {
        return check_image_header(expected, path).await;
    }

    if expected.mime == "application/pdf" {
        return check_pdf_trailer(path).await;
    }

    Ok(())
}

#[cfg(feature = "image")]
async fn check_image_header(expected: &AllowedType, path: &Path) -> Result<(), StructureError> {
    let owned: PathBuf = path.to_path_buf();
    let mime = expected.mime;

    let result = tokio::task::spawn_blocking(move || -> Result<(u32, u32), String> {
        image::ImageReader::open(&owned)
            .map_err(|e| e.to_string())?
            .with_guessed_format()
            .map_err(|e| e.to_string())?
            .into_dimensions()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| StructureError::Malformed {
        mime: mime.to_string(),
        detail: format!("header check task failed: {}", e),
    })?;

    match result {
        Ok((width, height)) if width > 0 && height > 0 => Ok(()),
        Ok((width, height)) => Err(StructureError::Malformed {
            mime: mime.to_string(),
            detail: format!("invalid dimensions {}x{}", width, height),
        }),
        Err(detail) => Err(StructureError::Malformed {
            mime: mime.to_string(),
            detail,
        }),
    }
}

#[cfg(not(feature = "image"))]
async fn check_image_header(_expected: &AllowedType, _path: &Path) -> Result<(), StructureError> {
    Ok(())
}

async fn check_pdf_trailer(path: &Path) -> Result<(), StructureError> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(PDF_TRAILER_WINDOW)))
        .await?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail).await?;

    if tail.windows(5).any(|w| w == b"%%EOF") {
        Ok(())
    } else {
        Err(StructureError::Malformed {
            mime: "application/pdf".to_string(),
            detail: "missing %%EOF trailer".to_string(),
        })
    }
}

/// Strips EXIF from JPEG, PNG and WebP files using `img-parts`.
///
/// Files without EXIF are not rewritten. Rewrites go to a sibling temporary file.
#[cfg(feature = "image")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifStripper;

#[cfg(feature = "image")]
impl ExifStripper {
    pub fn new() -> Self {
        Self
    }

    /// Remove EXIF metadata from image bytes.
    ///
    /// Returns `None` when the bytes carry no EXIF or are not a supported container.
    pub fn remove_exif(data: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        use bytes::Bytes;
        use img_parts::{jpeg::Jpeg, png::Png, webp::WebP, ImageEXIF};

        let input = Bytes::copy_from_slice(data);

        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            let mut jpeg = Jpeg::from_bytes(input)?;
            if jpeg.exif().is_none() {
                return Ok(None);
            }
            jpeg.set_exif(None);
            return Ok(Some(jpeg.encoder().bytes().to_vec()));
        }

        if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            let mut png = Png::from_bytes(input)?;
            if png.exif().is_none() {
                return Ok(None);
            }
            png.set_exif(None);
            return Ok(Some(png.encoder().bytes().to_vec()));
        }

        if data.starts_with(b"RIFF") && data.get(8..12) == Some(b"WEBP".as_slice()) {
            let mut webp = WebP::from_bytes(input)?;
            if webp.exif().is_none() {
                return Ok(None);
            }
            webp.set_exif(None);
            return Ok(Some(webp.encoder().bytes().to_vec()));
        }

        Ok(None)
    }

    fn strip_file(
        path: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<StagedArtifact>> {
        use std::io::Write;

        let data = std::fs::read(path)?;
        let Some(stripped) = Self::remove_exif(&data)? else {
            return Ok(None);
        };

        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("artifact {} has no parent", path.display()))?;
        let mut staged = tempfile::NamedTempFile::new_in(parent)?;
        staged.write_all(&stripped)?;
        staged.as_file().sync_all()?;

        if cancel.is_cancelled() {
            anyhow::bail!("metadata strip cancelled");
        }

        Ok(Some(StagedArtifact::new(staged.into_temp_path())))
    }
}

#[cfg(feature = "image")]
#[async_trait]
impl MetadataStripper for ExifStripper {
    async fn strip_all(
        &self,
        path: &Path,
        cancel: CancellationToken,
    ) -> anyhow::Result<Option<StagedArtifact>> {
        let owned = path.to_path_buf();
        let staged =
            tokio::task::spawn_blocking(move || Self::strip_file(&owned, &cancel)).await??;

        tracing::debug!(
            path = %path.display(),
            rewritten = staged.is_some(),
            "Metadata strip finished"
        );
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::types;
    use tempfile::TempDir;

    fn png_bytes() -> Vec<u8> {
        use image::{ImageFormat, Rgba, RgbaImage};
        let img = RgbaImage::from_pixel(16, 16, Rgba([255, 0, 0, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn jpeg_with_exif() -> Vec<u8> {
        use bytes::Bytes;
        use image::{ImageFormat, Rgb, RgbImage};
        use img_parts::{jpeg::Jpeg, ImageEXIF};

        let img = RgbImage::from_pixel(16, 16, Rgb([0, 128, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buffer), ImageFormat::Jpeg)
            .unwrap();

        let mut jpeg = Jpeg::from_bytes(Bytes::from(buffer)).unwrap();
        jpeg.set_exif(Some(Bytes::from_static(b"MM\x00\x2a\x00\x00\x00\x08\x00\x00")));
        jpeg.encoder().bytes().to_vec()
    }

    #[tokio::test]
    async fn test_strip_removes_exif_and_keeps_structure() {
        use img_parts::{jpeg::Jpeg, ImageEXIF};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.part");
        let original = jpeg_with_exif();
        std::fs::write(&path, &original).unwrap();

        let staged = ExifStripper::new()
            .strip_all(&path, CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        // The artifact is untouched until the staged copy is installed
        assert_eq!(std::fs::read(&path).unwrap(), original);
        assert_ne!(staged.path(), path.as_path());
        staged.persist(&path).await.unwrap();

        let stripped = std::fs::read(&path).unwrap();
        let jpeg = Jpeg::from_bytes(stripped.into()).unwrap();
        assert!(jpeg.exif().is_none());

        let jpeg_type = types::lookup("image/jpeg").unwrap();
        assert!(verify_structure(jpeg_type, &path).await.is_ok());
        // No staging files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_staged_copy_is_deleted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.part");
        let original = jpeg_with_exif();
        std::fs::write(&path, &original).unwrap();

        let staged = ExifStripper::new()
            .strip_all(&path, CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
        drop(staged);

        assert_eq!(std::fs::read(&path).unwrap(), original);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_strip_without_exif_stages_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.part");
        std::fs::write(&path, png_bytes()).unwrap();

        let staged = ExifStripper::new()
            .strip_all(&path, CancellationToken::new())
            .await
            .unwrap();
        assert!(staged.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_exif_without_metadata_is_noop() {
        assert!(ExifStripper::remove_exif(&png_bytes()).unwrap().is_none());
        assert!(ExifStripper::remove_exif(b"%PDF-1.4").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_strip_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.part");
        let original = jpeg_with_exif();
        std::fs::write(&path, &original).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(ExifStripper::new().strip_all(&path, cancel).await.is_err());

        assert_eq!(std::fs::read(&path).unwrap(), original);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_verify_structure_detects_truncated_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.part");
        let mut data = png_bytes();
        data.truncate(12);
        std::fs::write(&path, data).unwrap();

        let png_type = types::lookup("image/png").unwrap();
        assert!(matches!(
            verify_structure(png_type, &path).await,
            Err(StructureError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_structure_signature_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.part");
        std::fs::write(&path, b"%PDF-1.4\n%%EOF\n").unwrap();

        let jpeg_type = types::lookup("image/jpeg").unwrap();
        assert!(matches!(
            verify_structure(jpeg_type, &path).await,
            Err(StructureError::SignatureMismatch { .. })
        ));

        let pdf_type = types::lookup("application/pdf").unwrap();
        assert!(verify_structure(pdf_type, &path).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_structure_requires_pdf_trailer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.part");
        std::fs::write(&path, b"%PDF-1.4\n1 0 obj\n<<>>\n").unwrap();

        let pdf_type = types::lookup("application/pdf").unwrap();
        assert!(matches!(
            verify_structure(pdf_type, &path).await,
            Err(StructureError::Malformed { .. })
        ));
    }
}
