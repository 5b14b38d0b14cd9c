//! Input handling: the uploaded document and its on-disk staging.
//!
//! ## Why generated names?
//!
//! Staging an upload under its client-supplied filename lets `../../etc/x`
//! escape the upload directory and lets two concurrent uploads of
//! `receipt.jpg` overwrite each other between write and read. Each staged
//! file is instead named `<uuid-v4>.<ext>`, where only a short alphanumeric
//! extension survives from the client name. The file is read back once and
//! removed before the pipeline continues.

use crate::error::ReceiptError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// An uploaded image as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    /// Raw file bytes.
    pub bytes: Vec<u8>,
    /// Client-supplied filename; informational only, never used as a path.
    pub filename: String,
}

impl UploadedDocument {
    pub fn new(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
        }
    }

    /// Read a local image file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ReceiptError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReceiptError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ReceiptError::StagingFailed {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self { bytes, filename })
    }
}

/// Extract a safe extension (≤ 5 ASCII alphanumerics, lower-cased) from a
/// client filename. Falls back to `bin`.
pub fn safe_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

/// Generate the staging path for an upload inside `upload_dir`.
pub fn staging_path(upload_dir: &Path, filename: &str) -> PathBuf {
    upload_dir.join(format!("{}.{}", Uuid::new_v4(), safe_extension(filename)))
}

/// Write `bytes` under a unique name in `upload_dir` (created if absent),
/// read them back once, and remove the staged file.
///
/// Returns the document as read from disk.
pub async fn stage_upload(
    upload_dir: &Path,
    bytes: &[u8],
    filename: &str,
) -> Result<UploadedDocument, ReceiptError> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| ReceiptError::StagingFailed {
            path: upload_dir.to_path_buf(),
            source: e,
        })?;

    let path = staging_path(upload_dir, filename);
    let staging_err = |e| ReceiptError::StagingFailed {
        path: path.clone(),
        source: e,
    };

    tokio::fs::write(&path, bytes).await.map_err(staging_err)?;
    let read_back = read_and_remove(&path).await.map_err(staging_err)?;
    debug!("Staged {} bytes at {}", read_back.len(), path.display());

    Ok(UploadedDocument {
        bytes: read_back,
        filename: filename.to_string(),
    })
}

/// Read a staged file once and remove it, whether or not the read succeeded.
async fn read_and_remove(path: &Path) -> std::io::Result<Vec<u8>> {
    let read = tokio::fs::read(path).await;
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Could not remove staged upload {}: {}", path.display(), e);
    }
    read
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_extension() {
        assert_eq!(safe_extension("receipt.JPG"), "jpg");
        assert_eq!(safe_extension("scan.png"), "png");
        assert_eq!(safe_extension("noext"), "bin");
        assert_eq!(safe_extension("../../etc/passwd"), "bin");
        assert_eq!(safe_extension("evil.p/ng"), "bin");
        assert_eq!(safe_extension("x.toolongext"), "bin");
        assert_eq!(safe_extension(""), "bin");
    }

    #[test]
    fn staging_path_ignores_client_name() {
        let dir = Path::new("uploads");
        let p = staging_path(dir, "../../secret.jpg");
        assert_eq!(p.parent(), Some(dir));
        let name = p.file_name().unwrap().to_string_lossy();
        assert!(!name.contains("secret"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn staging_paths_are_unique() {
        let dir = Path::new("uploads");
        assert_ne!(staging_path(dir, "a.png"), staging_path(dir, "a.png"));
    }

    #[tokio::test]
    async fn stage_upload_round_trips_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/uploads");
        let doc = stage_upload(&dir, b"\x89PNG fake", "r.png").await.unwrap();
        assert_eq!(doc.bytes, b"\x89PNG fake");
        assert_eq!(doc.filename, "r.png");
        assert!(dir.is_dir(), "upload dir should be created");
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0, "staged file removed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_read_still_removes_staged_file() {
        let tmp = tempfile::tempdir().unwrap();
        let link = tmp.path().join("staged.png");
        std::os::unix::fs::symlink(tmp.path().join("gone.png"), &link).unwrap();

        assert!(read_and_remove(&link).await.is_err());
        assert!(
            std::fs::symlink_metadata(&link).is_err(),
            "staged entry must be removed after a failed read"
        );
    }

    #[tokio::test]
    async fn from_path_missing_file() {
        let err = UploadedDocument::from_path("/definitely/not/here.png")
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiptError::FileNotFound { .. }));
    }
}
