//! Per-task working directory.
//!
//! ```text
//! <work_dir>/<task_id>/
//!     audio/       voice segments (line_000.mp3, ...)
//!     clips/       downloaded stock footage
//!     scratch/     encoder intermediates
//!     output.mp4   final artifact
//! ```

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use vgen_models::TaskId;

#[derive(Debug, Clone)]
pub struct TaskWorkspace {
    root: PathBuf,
}

impl TaskWorkspace {
    pub fn new(work_dir: &Path, task_id: &TaskId) -> Self {
        Self {
            root: work_dir.join(task_id.as_str()),
        }
    }

    /// Create the directory tree.
    pub async fn create(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.audio_dir()).await?;
        fs::create_dir_all(self.clips_dir()).await?;
        fs::create_dir_all(self.scratch_dir()).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.root.join("clips")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn output_path(&self) -> PathBuf {
        self.root.join("output.mp4")
    }

    /// Audio file for a script line.
    pub fn line_audio_path(&self, line_index: usize, extension: &str) -> PathBuf {
        self.audio_dir()
            .join(format!("line_{:03}.{}", line_index, extension))
    }

    /// Remove encoder intermediates.
    pub async fn cleanup_scratch(&self) {
        remove_dir(&self.scratch_dir()).await;
    }

    /// Remove intermediates but keep the rendered artifact.
    pub async fn cleanup_intermediates(&self) {
        remove_dir(&self.scratch_dir()).await;
        remove_dir(&self.audio_dir()).await;
        remove_dir(&self.clips_dir()).await;
    }

    /// Remove the whole workspace.
    pub async fn remove(&self) {
        remove_dir(&self.root).await;
    }
}

async fn remove_dir(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Removed directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), "Failed to remove directory: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_layout_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let ws = TaskWorkspace::new(dir.path(), &TaskId::from_string("t-42"));
        ws.create().await.unwrap();

        assert_eq!(
            ws.line_audio_path(7, "mp3"),
            dir.path().join("t-42/audio/line_007.mp3")
        );
        fs::write(ws.output_path(), b"video").await.unwrap();
        fs::write(ws.line_audio_path(0, "mp3"), b"audio").await.unwrap();

        ws.cleanup_intermediates().await;
        assert!(ws.output_path().exists());
        assert!(!ws.audio_dir().exists());
        assert!(!ws.scratch_dir().exists());

        ws.remove().await;
        assert!(!ws.root().exists());
        // Idempotent
        ws.remove().await;
    }
}
