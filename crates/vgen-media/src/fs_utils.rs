//! Filesystem helpers for moving rendered media into place.

use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Move `src` to `dst`, copying when they live on different filesystems.
///
/// Cross-device moves copy to a sibling temp file first and rename it over
/// `dst`, so readers never observe a half-written destination.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(EXDEV) => {
            tracing::debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device rename, copying instead"
            );
            let staging = dst.with_extension("partial");
            if let Err(e) = fs::copy(src, &staging).await {
                let _ = fs::remove_file(&staging).await;
                return Err(MediaError::from(e));
            }
            fs::rename(&staging, dst).await?;
            if let Err(e) = fs::remove_file(src).await {
                tracing::warn!(src = %src.display(), "Failed to remove moved source: {}", e);
            }
            Ok(())
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

const EXDEV: i32 = 18;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_into_new_directory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("render.mp4");
        let dst = dir.path().join("out").join("final.mp4");

        fs::write(&src, b"frames").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let result = move_file(dir.path().join("nope"), dir.path().join("dst")).await;
        assert!(matches!(result, Err(MediaError::Io(_))));
    }
}
